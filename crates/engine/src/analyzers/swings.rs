//! Fractal swing points and the market structure they describe.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::{Bias, Candle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwingKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SwingPoint {
    pub index: usize,
    pub timestamp: i64,
    pub price: Decimal,
    pub kind: SwingKind,
}

/// Fractal swings: a high strictly above the `strength` bars on each side
/// (a low strictly below). Ordered by index.
pub fn find_swings(candles: &[Candle], strength: usize) -> Vec<SwingPoint> {
    let strength = strength.max(1);
    if candles.len() < 2 * strength + 1 {
        return Vec::new();
    }

    let mut swings = Vec::new();
    for i in strength..candles.len() - strength {
        let c = &candles[i];
        let neighbours = (i - strength..i).chain(i + 1..=i + strength);

        let mut is_high = true;
        let mut is_low = true;
        for j in neighbours {
            is_high &= c.high > candles[j].high;
            is_low &= c.low < candles[j].low;
        }

        if is_high {
            swings.push(SwingPoint {
                index: i,
                timestamp: c.timestamp,
                price: c.high,
                kind: SwingKind::High,
            });
        }
        if is_low {
            swings.push(SwingPoint {
                index: i,
                timestamp: c.timestamp,
                price: c.low,
                kind: SwingKind::Low,
            });
        }
    }
    swings
}

pub fn highs_of(swings: &[SwingPoint]) -> impl Iterator<Item = &SwingPoint> {
    swings.iter().filter(|s| s.kind == SwingKind::High)
}

pub fn lows_of(swings: &[SwingPoint]) -> impl Iterator<Item = &SwingPoint> {
    swings.iter().filter(|s| s.kind == SwingKind::Low)
}

/// Alternating high/low pivots: consecutive swings of the same kind collapse
/// to the more extreme one.
pub fn zigzag(swings: &[SwingPoint]) -> Vec<SwingPoint> {
    let mut pivots: Vec<SwingPoint> = Vec::with_capacity(swings.len());
    for &s in swings {
        match pivots.last_mut() {
            Some(last) if last.kind == s.kind => {
                let more_extreme = match s.kind {
                    SwingKind::High => s.price > last.price,
                    SwingKind::Low => s.price < last.price,
                };
                if more_extreme {
                    *last = s;
                }
            }
            Some(last) if last.index == s.index => {
                // Outside bar that is both a swing high and low; keep the first.
            }
            _ => pivots.push(s),
        }
    }
    pivots
}

/// Trend from the last two swing highs and lows: higher highs and higher
/// lows read bullish, lower highs and lower lows bearish.
pub fn structure_bias(swings: &[SwingPoint]) -> Bias {
    let last_two = |kind: SwingKind| {
        let mut it = swings.iter().rev().filter(move |s| s.kind == kind);
        match (it.next(), it.next()) {
            (Some(latest), Some(prior)) => Some((prior.price, latest.price)),
            _ => None,
        }
    };

    match (last_two(SwingKind::High), last_two(SwingKind::Low)) {
        (Some((ph, lh)), Some((pl, ll))) => {
            if lh > ph && ll > pl {
                Bias::Bullish
            } else if lh < ph && ll < pl {
                Bias::Bearish
            } else {
                Bias::Neutral
            }
        }
        _ => Bias::Neutral,
    }
}

/// Nearest swing low strictly below `price`, latest first on ties.
pub fn nearest_low_below(swings: &[SwingPoint], price: Decimal) -> Option<SwingPoint> {
    lows_of(swings)
        .filter(|s| s.price < price)
        .max_by(|a, b| a.price.cmp(&b.price).then(a.index.cmp(&b.index)))
        .copied()
}

/// Nearest swing high strictly above `price`.
pub fn nearest_high_above(swings: &[SwingPoint], price: Decimal) -> Option<SwingPoint> {
    highs_of(swings)
        .filter(|s| s.price > price)
        .min_by(|a, b| a.price.cmp(&b.price).then(b.index.cmp(&a.index)))
        .copied()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    /// Candles whose highs and lows follow `mids` with a fixed half-range.
    pub(crate) fn from_mids(mids: &[Decimal]) -> Vec<Candle> {
        mids.iter()
            .enumerate()
            .map(|(i, &m)| Candle {
                timestamp: i as i64 * 3600,
                open: m,
                high: m + dec!(0.5),
                low: m - dec!(0.5),
                close: m,
                volume: dec!(100),
            })
            .collect()
    }

    #[test]
    fn test_find_single_peak_and_trough() {
        let mids: Vec<Decimal> = [1, 2, 5, 2, 1, 0, -3, 0, 1]
            .into_iter()
            .map(|v| Decimal::from(10 + v))
            .collect();
        let swings = find_swings(&from_mids(&mids), 2);
        assert_eq!(swings.len(), 2);
        assert_eq!(swings[0].kind, SwingKind::High);
        assert_eq!(swings[0].index, 2);
        assert_eq!(swings[1].kind, SwingKind::Low);
        assert_eq!(swings[1].index, 6);
    }

    #[test]
    fn test_short_series_has_no_swings() {
        let mids = vec![dec!(1), dec!(2), dec!(1)];
        assert!(find_swings(&from_mids(&mids), 2).is_empty());
    }

    #[test]
    fn test_structure_bias_uptrend() {
        // Zigzag with rising peaks and troughs.
        let pattern = [0, 3, 6, 3, 1, 4, 8, 5, 3, 6, 10, 7, 5];
        let mids: Vec<Decimal> = pattern.iter().map(|&v| Decimal::from(v + 10)).collect();
        let swings = find_swings(&from_mids(&mids), 1);
        assert_eq!(structure_bias(&swings), Bias::Bullish);

        let inverted: Vec<Decimal> = pattern.iter().map(|&v| Decimal::from(30 - v)).collect();
        let swings = find_swings(&from_mids(&inverted), 1);
        assert_eq!(structure_bias(&swings), Bias::Bearish);
    }

    #[test]
    fn test_zigzag_alternates() {
        let s = |index, price, kind| SwingPoint {
            index,
            timestamp: index as i64,
            price,
            kind,
        };
        let swings = vec![
            s(1, dec!(10), SwingKind::High),
            s(3, dec!(12), SwingKind::High),
            s(5, dec!(8), SwingKind::Low),
            s(7, dec!(7), SwingKind::Low),
            s(9, dec!(11), SwingKind::High),
        ];
        let pivots = zigzag(&swings);
        assert_eq!(pivots.len(), 3);
        assert_eq!(pivots[0].price, dec!(12));
        assert_eq!(pivots[1].price, dec!(7));
    }

    #[test]
    fn test_nearest_levels() {
        let s = |index, price, kind| SwingPoint {
            index,
            timestamp: 0,
            price,
            kind,
        };
        let swings = vec![
            s(1, dec!(1.0950), SwingKind::Low),
            s(2, dec!(1.0980), SwingKind::Low),
            s(3, dec!(1.1050), SwingKind::High),
            s(4, dec!(1.1100), SwingKind::High),
        ];
        assert_eq!(nearest_low_below(&swings, dec!(1.1000)).unwrap().price, dec!(1.0980));
        assert_eq!(nearest_high_above(&swings, dec!(1.1000)).unwrap().price, dec!(1.1050));
        assert!(nearest_low_below(&swings, dec!(1.0900)).is_none());
    }
}
