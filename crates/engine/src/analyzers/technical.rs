//! Classical technical analysis: moving-average trend, momentum, candlestick
//! patterns, RSI divergence and higher-timeframe alignment.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use super::indicators::{self, compute_snapshot, IndicatorSnapshot};
use super::swings::{
    find_swings, highs_of, lows_of, nearest_high_above, nearest_low_below, SwingPoint,
};
use super::{Analyzer, AnalysisInput, AnalyzerResult, DomainFindings};
use crate::config::{IndicatorParams, LookbackConfig};
use crate::errors::EngineResult;
use crate::types::market_data::closes;
use crate::types::{Bias, Candle, Domain, Timeframe};

/// Bars scanned for candlestick patterns.
const PATTERN_WINDOW: usize = 5;
/// Bars scanned for RSI divergence.
const DIVERGENCE_WINDOW: usize = 60;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TrendAssessment {
    pub direction: Bias,
    /// 0-100.
    pub strength: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandlePatternKind {
    BullishEngulfing,
    BearishEngulfing,
    BullishPinBar,
    BearishPinBar,
    Doji,
    MorningStar,
    EveningStar,
}

impl CandlePatternKind {
    pub fn bias(&self) -> Bias {
        match self {
            Self::BullishEngulfing | Self::BullishPinBar | Self::MorningStar => Bias::Bullish,
            Self::BearishEngulfing | Self::BearishPinBar | Self::EveningStar => Bias::Bearish,
            Self::Doji => Bias::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CandlePattern {
    pub kind: CandlePatternKind,
    pub bias: Bias,
    /// Timestamp of the completing candle.
    pub timestamp: i64,
}

/// Regular divergence between price and RSI at two swing points.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Divergence {
    pub bias: Bias,
    pub first_price: Decimal,
    pub second_price: Decimal,
    pub first_rsi: Decimal,
    pub second_rsi: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct TechnicalFindings {
    pub trend: TrendAssessment,
    pub indicators: IndicatorSnapshot,
    pub patterns: Vec<CandlePattern>,
    pub divergence: Option<Divergence>,
    /// EMA trend on the other analysis timeframes that had enough data.
    pub timeframe_trends: BTreeMap<Timeframe, Bias>,
    pub support: Option<Decimal>,
    pub resistance: Option<Decimal>,
}

pub struct TechnicalAnalyzer {
    min_bars: usize,
    swing_strength: usize,
    params: IndicatorParams,
}

impl TechnicalAnalyzer {
    pub fn new(lookbacks: &LookbackConfig, params: &IndicatorParams) -> Self {
        Self {
            min_bars: lookbacks.technical_min_bars,
            swing_strength: lookbacks.swing_strength,
            params: params.clone(),
        }
    }

    fn trend(&self, snap: &IndicatorSnapshot, candles: &[Candle]) -> TrendAssessment {
        let checks = [
            snap.price.cmp(&snap.ema_fast),
            snap.ema_fast.cmp(&snap.ema_slow),
            snap.ema_slow.cmp(&snap.ema_trend),
            snap.macd.line.cmp(&Decimal::ZERO),
        ];
        let bull = checks.iter().filter(|o| o.is_gt()).count() as i64;
        let bear = checks.iter().filter(|o| o.is_lt()).count() as i64;

        let direction = if bull >= 3 {
            Bias::Bullish
        } else if bear >= 3 {
            Bias::Bearish
        } else {
            Bias::Neutral
        };

        let window = &candles[candles.len().saturating_sub(50)..];
        let efficiency = indicators::from_f64(indicators::efficiency_ratio(&closes(window)));
        let alignment = Decimal::from((bull - bear).abs() * 25);
        TrendAssessment {
            direction,
            strength: (alignment * (dec!(0.5) + efficiency / dec!(2))).round_dp(2),
        }
    }

    fn timeframe_trend(&self, candles: &[Candle]) -> Option<Bias> {
        if candles.len() < self.params.ema_slow + 1 {
            return None;
        }
        let closes = closes(candles);
        let fast = *indicators::ema(&closes, self.params.ema_fast).last()?;
        let slow = *indicators::ema(&closes, self.params.ema_slow).last()?;
        let price = *closes.last()?;
        Some(if price > slow && fast > slow {
            Bias::Bullish
        } else if price < slow && fast < slow {
            Bias::Bearish
        } else {
            Bias::Neutral
        })
    }
}

/// Engulfing, pin bar, doji and star patterns completing in the last
/// [`PATTERN_WINDOW`] candles.
pub fn detect_patterns(candles: &[Candle]) -> Vec<CandlePattern> {
    let mut out = Vec::new();
    let start = candles.len().saturating_sub(PATTERN_WINDOW);

    for i in start..candles.len() {
        let c = &candles[i];
        let spread = c.spread();
        if spread.is_zero() {
            continue;
        }
        let body = c.body();
        let mut push = |kind: CandlePatternKind| {
            out.push(CandlePattern {
                kind,
                bias: kind.bias(),
                timestamp: c.timestamp,
            })
        };

        if body <= spread * dec!(0.1) {
            push(CandlePatternKind::Doji);
        } else if c.lower_wick() >= body * dec!(2) && c.lower_wick() >= spread * dec!(0.6) {
            push(CandlePatternKind::BullishPinBar);
        } else if c.upper_wick() >= body * dec!(2) && c.upper_wick() >= spread * dec!(0.6) {
            push(CandlePatternKind::BearishPinBar);
        }

        if i >= 1 {
            let p = &candles[i - 1];
            if p.is_bearish() && c.is_bullish() && c.open <= p.close && c.close >= p.open {
                push(CandlePatternKind::BullishEngulfing);
            } else if p.is_bullish() && c.is_bearish() && c.open >= p.close && c.close <= p.open {
                push(CandlePatternKind::BearishEngulfing);
            }
        }

        if i >= 2 {
            let (a, b) = (&candles[i - 2], &candles[i - 1]);
            let small_middle = b.body() <= a.body() * dec!(0.3);
            let a_mid = (a.open + a.close) / dec!(2);
            if a.is_bearish() && small_middle && c.is_bullish() && c.close > a_mid {
                push(CandlePatternKind::MorningStar);
            } else if a.is_bullish() && small_middle && c.is_bearish() && c.close < a_mid {
                push(CandlePatternKind::EveningStar);
            }
        }
    }
    out
}

/// Regular RSI divergence over the last two swing lows (bullish) or swing
/// highs (bearish). The more recent divergence wins when both exist.
pub fn detect_divergence(candles: &[Candle], rsi_period: usize, strength: usize) -> Option<Divergence> {
    let start = candles.len().saturating_sub(DIVERGENCE_WINDOW);
    let rsi = indicators::rsi_series(&closes(candles), rsi_period);
    let rsi_at = |i: usize| i.checked_sub(rsi_period).and_then(|k| rsi.get(k).copied());

    let swings = find_swings(&candles[start..], strength);
    let lows: Vec<&SwingPoint> = lows_of(&swings).collect();
    let highs: Vec<&SwingPoint> = highs_of(&swings).collect();

    let check = |pair: &[&SwingPoint], bias: Bias| -> Option<(usize, Divergence)> {
        let [.., a, b] = pair else { return None };
        let ra = rsi_at(start + a.index)?;
        let rb = rsi_at(start + b.index)?;
        let diverges = match bias {
            Bias::Bullish => b.price < a.price && rb > ra,
            _ => b.price > a.price && rb < ra,
        };
        diverges.then(|| {
            (
                b.index,
                Divergence {
                    bias,
                    first_price: a.price,
                    second_price: b.price,
                    first_rsi: ra.round_dp(2),
                    second_rsi: rb.round_dp(2),
                },
            )
        })
    };

    [check(&lows, Bias::Bullish), check(&highs, Bias::Bearish)]
        .into_iter()
        .flatten()
        .max_by_key(|(idx, _)| *idx)
        .map(|(_, d)| d)
}

impl Analyzer for TechnicalAnalyzer {
    fn domain(&self) -> Domain {
        Domain::Technical
    }

    fn analyze(&self, input: &AnalysisInput) -> EngineResult<AnalyzerResult> {
        let Some(candles) = input.primary_window(self.min_bars, usize::MAX) else {
            return Ok(AnalyzerResult::empty(Domain::Technical));
        };

        let snap = compute_snapshot(candles, &self.params);
        let trend = self.trend(&snap, candles);
        let patterns = detect_patterns(candles);
        let divergence = detect_divergence(candles, self.params.rsi_period, self.swing_strength);

        let timeframe_trends: BTreeMap<Timeframe, Bias> = Timeframe::ANALYSIS_SET
            .iter()
            .filter(|&&tf| tf != Timeframe::PRIMARY)
            .filter_map(|&tf| self.timeframe_trend(input.data.get(tf)).map(|b| (tf, b)))
            .collect();

        let swings = find_swings(candles, self.swing_strength);
        let support = nearest_low_below(&swings, snap.price).map(|s| s.price);
        let resistance = nearest_high_above(&swings, snap.price).map(|s| s.price);

        // Secondary evidence: patterns and divergence.
        let mut secondary: Vec<Bias> = patterns.iter().map(|p| p.bias).collect();
        if let Some(d) = &divergence {
            secondary.push(d.bias);
            secondary.push(d.bias);
        }
        let secondary_net: i64 = secondary.iter().map(|b| bias_sign(*b)).sum();

        let bias = match trend.direction {
            Bias::Neutral if secondary_net >= 2 => Bias::Bullish,
            Bias::Neutral if secondary_net <= -2 => Bias::Bearish,
            direction => direction,
        };

        let mut score = trend.strength * dec!(0.4);
        let rsi = snap.rsi;
        score += match bias {
            Bias::Bullish if rsi > dec!(50) && rsi < dec!(70) => dec!(15),
            Bias::Bullish if rsi >= dec!(70) => dec!(7),
            Bias::Bearish if rsi < dec!(50) && rsi > dec!(30) => dec!(15),
            Bias::Bearish if rsi <= dec!(30) => dec!(7),
            _ => Decimal::ZERO,
        };
        let sign = bias_sign(bias);
        if sign != 0 {
            if decimal_sign(snap.macd.histogram) == sign {
                score += dec!(10);
            }
            if decimal_sign(snap.macd.line) == sign {
                score += dec!(5);
            }
            let agreeing = timeframe_trends.values().filter(|b| **b == bias).count();
            if !timeframe_trends.is_empty() {
                score += dec!(20) * Decimal::from(agreeing as u64)
                    / Decimal::from(timeframe_trends.len() as u64);
            }
            let net_secondary = secondary_net * sign;
            if net_secondary > 0 {
                score += dec!(10);
            } else if net_secondary < 0 {
                score -= dec!(10);
            }
        }

        Ok(AnalyzerResult::new(
            Domain::Technical,
            score,
            bias,
            DomainFindings::Technical(TechnicalFindings {
                trend,
                indicators: snap,
                patterns,
                divergence,
                timeframe_trends,
                support,
                resistance,
            }),
        ))
    }
}

fn bias_sign(bias: Bias) -> i64 {
    match bias {
        Bias::Bullish => 1,
        Bias::Bearish => -1,
        Bias::Neutral => 0,
    }
}

fn decimal_sign(value: Decimal) -> i64 {
    if value > Decimal::ZERO {
        1
    } else if value < Decimal::ZERO {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn analyzer() -> TechnicalAnalyzer {
        TechnicalAnalyzer::new(&LookbackConfig::default(), &IndicatorParams::default())
    }

    fn findings(result: &AnalyzerResult) -> &TechnicalFindings {
        match &result.findings {
            DomainFindings::Technical(f) => f,
            other => panic!("unexpected findings {other:?}"),
        }
    }

    #[test]
    fn test_rising_series_trend_bullish() {
        let result = analyzer().analyze(&input_with(rising(250))).unwrap();
        let f = findings(&result);
        assert_eq!(f.trend.direction, Bias::Bullish);
        assert!(f.trend.strength > Decimal::ZERO);
        assert_eq!(result.bias, Bias::Bullish);
        assert!(result.score > Decimal::ZERO);
    }

    #[test]
    fn test_falling_series_trend_bearish() {
        let result = analyzer().analyze(&input_with(falling(250))).unwrap();
        assert_eq!(findings(&result).trend.direction, Bias::Bearish);
        assert_eq!(result.bias, Bias::Bearish);
    }

    #[test]
    fn test_needs_two_hundred_bars() {
        let result = analyzer().analyze(&input_with(rising(199))).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_higher_timeframe_alignment_recorded() {
        let mut input = input_with(rising(250));
        input.data.series.insert(Timeframe::H4, rising(120));
        let result = analyzer().analyze(&input).unwrap();
        assert_eq!(
            findings(&result).timeframe_trends.get(&Timeframe::H4),
            Some(&Bias::Bullish)
        );
    }

    fn c(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            timestamp: 0,
            open,
            high,
            low,
            close,
            volume: dec!(1),
        }
    }

    #[test]
    fn test_bullish_engulfing_detected() {
        let candles = vec![
            c(dec!(10), dec!(10.2), dec!(9.4), dec!(9.5)),
            c(dec!(9.4), dec!(10.4), dec!(9.3), dec!(10.3)),
        ];
        let kinds: Vec<_> = detect_patterns(&candles).into_iter().map(|p| p.kind).collect();
        assert!(kinds.contains(&CandlePatternKind::BullishEngulfing));
    }

    #[test]
    fn test_pin_bars_and_doji() {
        let hammer = c(dec!(10), dec!(10.2), dec!(9), dec!(10.15));
        let star = c(dec!(10), dec!(11), dec!(9.8), dec!(9.85));
        let doji = c(dec!(10), dec!(10.5), dec!(9.5), dec!(10.02));
        let kinds: Vec<_> = detect_patterns(&[hammer, star, doji])
            .into_iter()
            .map(|p| p.kind)
            .collect();
        assert!(kinds.contains(&CandlePatternKind::BullishPinBar));
        assert!(kinds.contains(&CandlePatternKind::BearishPinBar));
        assert!(kinds.contains(&CandlePatternKind::Doji));
    }

    #[test]
    fn test_bullish_divergence() {
        // Sharp drop to a low, bounce, then a slow grind to a marginally lower
        // low: price makes a lower low while RSI makes a higher one.
        let mut closes: Vec<Decimal> = Vec::new();
        closes.extend((0..20).map(|i| dec!(100) - Decimal::from(i) * dec!(0.1)));
        closes.extend((0..8).map(|i| dec!(98) - Decimal::from(i) * dec!(1)));
        closes.extend((1..=8).map(|i| dec!(91) + Decimal::from(i) * dec!(0.8)));
        closes.extend((0..14).map(|i| dec!(97) - Decimal::from(i) * dec!(0.47)));
        closes.extend((0..4).map(|i| dec!(91.5) + Decimal::from(i) * dec!(0.5)));
        let candles = candles_from_closes(&closes, dec!(0.05));
        let d = detect_divergence(&candles, 14, 2).expect("divergence");
        assert_eq!(d.bias, Bias::Bullish);
        assert!(d.second_price < d.first_price);
        assert!(d.second_rsi > d.first_rsi);
    }
}
