use std::collections::BTreeMap;

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};
use crate::types::timeframe::Timeframe;

/// A single OHLCV candle. `timestamp` is the bar open time in unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
}

impl Candle {
    /// High bounds every price, low is bounded by every price, nothing is
    /// negative.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.low > Decimal::ZERO
            && self.volume >= Decimal::ZERO
            && self.high >= self.open.max(self.close).max(self.low)
            && self.low <= self.open.min(self.close).min(self.high)
    }

    #[must_use]
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    #[must_use]
    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    #[must_use]
    pub fn body(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    /// High minus low.
    #[must_use]
    pub fn spread(&self) -> Decimal {
        self.high - self.low
    }

    #[must_use]
    pub fn upper_wick(&self) -> Decimal {
        self.high - self.open.max(self.close)
    }

    #[must_use]
    pub fn lower_wick(&self) -> Decimal {
        self.open.min(self.close) - self.low
    }

    /// Position of the close within the bar range, 0 = low, 1 = high.
    /// Returns 0.5 for a zero-range bar.
    #[must_use]
    pub fn close_location(&self) -> Decimal {
        let range = self.spread();
        if range.is_zero() {
            return Decimal::new(5, 1);
        }
        (self.close - self.low) / range
    }
}

/// Ordered candles for one (instrument, timeframe).
pub type CandleSeries = Vec<Candle>;

/// Validate and normalise a freshly fetched series: reject empty or malformed
/// input, sort ascending by timestamp and drop duplicate timestamps (the later
/// entry wins).
pub fn normalize_series(mut candles: Vec<Candle>) -> EngineResult<CandleSeries> {
    if candles.is_empty() {
        return Err(EngineError::InvalidData {
            reason: "empty candle series".into(),
        });
    }

    if let Some(bad) = candles.iter().find(|c| !c.is_well_formed()) {
        return Err(EngineError::InvalidData {
            reason: format!(
                "malformed candle at {}: o={} h={} l={} c={} v={}",
                bad.timestamp, bad.open, bad.high, bad.low, bad.close, bad.volume
            ),
        });
    }

    candles.sort_by_key(|c| c.timestamp);

    let mut deduped: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        match deduped.last_mut() {
            Some(last) if last.timestamp == candle.timestamp => *last = candle,
            _ => deduped.push(candle),
        }
    }

    Ok(deduped)
}

// ---------------------------------------------------------------------------
// Column extraction helpers
// ---------------------------------------------------------------------------

pub fn closes(candles: &[Candle]) -> Vec<Decimal> {
    candles.iter().map(|c| c.close).collect()
}

pub fn highs(candles: &[Candle]) -> Vec<Decimal> {
    candles.iter().map(|c| c.high).collect()
}

pub fn lows(candles: &[Candle]) -> Vec<Decimal> {
    candles.iter().map(|c| c.low).collect()
}

pub fn volumes(candles: &[Candle]) -> Vec<Decimal> {
    candles.iter().map(|c| c.volume).collect()
}

/// Closes as `f64` for statistical routines.
pub fn closes_f64(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .map(|c| c.close.to_f64().unwrap_or(0.0))
        .collect()
}

// ---------------------------------------------------------------------------
// Multi-timeframe snapshot
// ---------------------------------------------------------------------------

/// Candle series keyed by timeframe, assembled once per analysis pass.
///
/// Fetch failures are embedded per timeframe; a missing or errored timeframe
/// reads as an empty series so analyzers see "insufficient data".
#[derive(Debug, Clone, Default, Serialize)]
pub struct MultiTimeframeData {
    pub symbol: String,
    pub series: BTreeMap<Timeframe, CandleSeries>,
    pub errors: BTreeMap<Timeframe, String>,
}

impl MultiTimeframeData {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    /// Builder used by tests and the backtester.
    #[must_use]
    pub fn with_series(mut self, tf: Timeframe, candles: CandleSeries) -> Self {
        self.series.insert(tf, candles);
        self
    }

    /// Candles for `tf`, or an empty slice when the timeframe is missing.
    pub fn get(&self, tf: Timeframe) -> &[Candle] {
        self.series.get(&tf).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Candles on [`Timeframe::PRIMARY`].
    pub fn primary(&self) -> &[Candle] {
        self.get(Timeframe::PRIMARY)
    }

    /// Last close on the primary timeframe, falling back to the shortest
    /// timeframe that has data.
    pub fn current_price(&self) -> Option<Decimal> {
        self.primary()
            .last()
            .or_else(|| self.series.values().find_map(|s| s.last()))
            .map(|c| c.close)
    }

    pub fn has_bars(&self, tf: Timeframe, required: usize) -> bool {
        self.get(tf).len() >= required
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(ts: i64, o: Decimal, h: Decimal, l: Decimal, c: Decimal) -> Candle {
        Candle {
            timestamp: ts,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: dec!(100),
        }
    }

    #[test]
    fn test_well_formed_candle() {
        assert!(candle(0, dec!(1.1), dec!(1.2), dec!(1.0), dec!(1.15)).is_well_formed());
        // high below close
        assert!(!candle(0, dec!(1.1), dec!(1.12), dec!(1.0), dec!(1.15)).is_well_formed());
        // low above open
        assert!(!candle(0, dec!(1.1), dec!(1.2), dec!(1.11), dec!(1.15)).is_well_formed());
    }

    #[test]
    fn test_normalize_sorts_and_dedups() {
        let raw = vec![
            candle(3, dec!(1), dec!(2), dec!(0.5), dec!(1.5)),
            candle(1, dec!(1), dec!(2), dec!(0.5), dec!(1.5)),
            candle(2, dec!(1), dec!(2), dec!(0.5), dec!(1.2)),
            candle(2, dec!(1), dec!(2), dec!(0.5), dec!(1.8)),
        ];
        let series = normalize_series(raw).unwrap();
        let ts: Vec<i64> = series.iter().map(|c| c.timestamp).collect();
        assert_eq!(ts, vec![1, 2, 3]);
        assert_eq!(series[1].close, dec!(1.8));
    }

    #[test]
    fn test_normalize_rejects_empty_and_malformed() {
        assert!(matches!(
            normalize_series(Vec::new()),
            Err(EngineError::InvalidData { .. })
        ));
        let bad = vec![candle(1, dec!(1), dec!(0.9), dec!(0.5), dec!(1))];
        assert!(normalize_series(bad).is_err());
    }

    #[test]
    fn test_close_location() {
        let c = candle(0, dec!(1), dec!(2), dec!(1), dec!(1.75));
        assert_eq!(c.close_location(), dec!(0.75));
        let flat = candle(0, dec!(1), dec!(1), dec!(1), dec!(1));
        assert_eq!(flat.close_location(), dec!(0.5));
    }

    #[test]
    fn test_mtf_missing_timeframe_is_empty() {
        let data = MultiTimeframeData::new("EURUSD")
            .with_series(Timeframe::H1, vec![candle(1, dec!(1), dec!(2), dec!(0.5), dec!(1.5))]);
        assert!(data.get(Timeframe::H4).is_empty());
        assert_eq!(data.current_price(), Some(dec!(1.5)));
        assert!(data.has_bars(Timeframe::H1, 1));
        assert!(!data.has_bars(Timeframe::H1, 2));
    }
}
