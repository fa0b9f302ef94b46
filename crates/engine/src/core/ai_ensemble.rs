//! Ensemble over the analyzer outputs: chart-pattern recognition, regime
//! classification, a probability estimate and a majority-vote prediction,
//! blended into one direction and confidence.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::analyzers::indicators::{
    efficiency_ratio, from_f64, linear_regression, range_extremes, return_volatility, to_f64,
};
use crate::analyzers::swings::{find_swings, highs_of, lows_of};
use crate::analyzers::AnalyzerResult;
use crate::config::{ConfluenceWeights, ThresholdConfig};
use crate::constants::{
    AI_BLEND_PATTERN, AI_BLEND_PREDICTION, AI_BLEND_PROBABILITY, AI_BLEND_REGIME,
    AI_MIN_AGREEING_BIASES,
};
use crate::types::market_data::{closes, highs, lows};
use crate::types::{clamp_score, Bias, Blackout, Candle, ConfluenceResult, RejectionReason};

/// Bars scanned for chart patterns.
const PATTERN_WINDOW: usize = 30;
/// Bars behind the regime reading.
const REGIME_WINDOW: usize = 50;
/// Trend-line travel over the window, as a share of the window's range,
/// below which the line counts as flat.
const FLAT_TRAVEL: f64 = 0.2;
/// End width under this share of the start width means the lines converge.
const CONVERGING: f64 = 0.7;
/// Efficiency ratio above which the market is trending.
const TRENDING_EFFICIENCY: f64 = 0.3;
const VOLATILE_RATIO: f64 = 1.5;
const QUIET_RATIO: f64 = 0.6;

// ═══════════════════════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartPattern {
    HeadAndShoulders,
    InverseHeadAndShoulders,
    DoubleTop,
    DoubleBottom,
    AscendingTriangle,
    DescendingTriangle,
    SymmetricalTriangle,
    RisingWedge,
    FallingWedge,
    AscendingChannel,
    DescendingChannel,
}

impl ChartPattern {
    pub fn bias(&self) -> Bias {
        match self {
            Self::InverseHeadAndShoulders
            | Self::DoubleBottom
            | Self::AscendingTriangle
            | Self::FallingWedge
            | Self::AscendingChannel => Bias::Bullish,
            Self::HeadAndShoulders
            | Self::DoubleTop
            | Self::DescendingTriangle
            | Self::RisingWedge
            | Self::DescendingChannel => Bias::Bearish,
            Self::SymmetricalTriangle => Bias::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PatternMatch {
    pub pattern: ChartPattern,
    pub bias: Bias,
    /// 0-100.
    pub confidence: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
    LowVolatility,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegimeReading {
    pub regime: MarketRegime,
    /// Efficiency ratio, 0-1.
    pub trend_strength: Decimal,
    /// Recent return volatility over the longer-run level.
    pub volatility_ratio: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Prediction {
    pub bias: Bias,
    pub bullish: usize,
    pub bearish: usize,
    pub neutral: usize,
}

impl Prediction {
    /// Share of directional votes on the predicted side, 0-1.
    pub fn agreement(&self) -> Decimal {
        let directional = self.bullish + self.bearish;
        let agreeing = match self.bias {
            Bias::Bullish => self.bullish,
            Bias::Bearish => self.bearish,
            Bias::Neutral => return Decimal::ZERO,
        };
        if directional == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(agreeing as u64) / Decimal::from(directional as u64)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AiAssessment {
    pub direction: Bias,
    /// Blended confidence, 0-100.
    pub confidence: Decimal,
    pub patterns: Vec<PatternMatch>,
    pub regime: RegimeReading,
    /// Estimated probability the next move is up, 0-1.
    pub probability_up: Decimal,
    pub prediction: Prediction,
}

// ═══════════════════════════════════════════════════════════════════════════
// Pattern recognition
// ═══════════════════════════════════════════════════════════════════════════

/// Chart patterns in the last [`PATTERN_WINDOW`] bars.
pub fn detect_patterns(candles: &[Candle]) -> Vec<PatternMatch> {
    let start = candles.len().saturating_sub(PATTERN_WINDOW);
    let window = &candles[start..];
    let Some((range_high, range_low)) = range_extremes(window) else {
        return Vec::new();
    };
    let range = range_high - range_low;
    if window.len() < 10 || range.is_zero() {
        return Vec::new();
    }

    let mut found = Vec::new();
    if let Some(m) = trendline_pattern(window, to_f64(range)) {
        found.push(m);
    }
    found.extend(swing_patterns(window, range_high, range_low));
    found
}

fn trendline_pattern(window: &[Candle], range: f64) -> Option<PatternMatch> {
    let to_f = |v: Vec<Decimal>| v.into_iter().map(to_f64).collect::<Vec<f64>>();
    let high_fit = linear_regression(&to_f(highs(window)));
    let low_fit = linear_regression(&to_f(lows(window)));
    let last = (window.len() - 1) as f64;

    let travel = |slope: f64| slope * last / range;
    let direction = |slope: f64| {
        let t = travel(slope);
        if t > FLAT_TRAVEL {
            1
        } else if t < -FLAT_TRAVEL {
            -1
        } else {
            0
        }
    };
    let start_width = high_fit.intercept - low_fit.intercept;
    let end_width = (high_fit.intercept + high_fit.slope * last) - (low_fit.intercept + low_fit.slope * last);
    let converging = start_width > 0.0 && end_width < start_width * CONVERGING;

    let pattern = match (direction(high_fit.slope), direction(low_fit.slope)) {
        (0, 1) => ChartPattern::AscendingTriangle,
        (-1, 0) => ChartPattern::DescendingTriangle,
        (-1, 1) => ChartPattern::SymmetricalTriangle,
        (1, 1) if converging => ChartPattern::RisingWedge,
        (1, 1) => ChartPattern::AscendingChannel,
        (-1, -1) if converging => ChartPattern::FallingWedge,
        (-1, -1) => ChartPattern::DescendingChannel,
        _ => return None,
    };

    // Flat lines carry no r² information; score only the sloped ones.
    let fits: Vec<f64> = [(high_fit, direction(high_fit.slope)), (low_fit, direction(low_fit.slope))]
        .into_iter()
        .filter(|(_, d)| *d != 0)
        .map(|(f, _)| f.r_squared)
        .collect();
    let fit_quality = fits.iter().sum::<f64>() / fits.len().max(1) as f64;

    Some(PatternMatch {
        pattern,
        bias: pattern.bias(),
        confidence: clamp_score(from_f64(50.0 + 40.0 * fit_quality).round_dp(2)),
    })
}

fn swing_patterns(window: &[Candle], range_high: Decimal, range_low: Decimal) -> Vec<PatternMatch> {
    let swings = find_swings(window, 2);
    let tolerance = (range_high - range_low) * dec!(0.1);
    let tops: Vec<Decimal> = highs_of(&swings).map(|s| s.price).collect();
    let bottoms: Vec<Decimal> = lows_of(&swings).map(|s| s.price).collect();
    let mut found = Vec::new();

    let mut push = |pattern: ChartPattern, confidence: Decimal| {
        found.push(PatternMatch {
            pattern,
            bias: pattern.bias(),
            confidence,
        });
    };

    if let [.., l, head, r] = tops[..] {
        if head > l + tolerance && head > r + tolerance && (l - r).abs() <= tolerance {
            push(ChartPattern::HeadAndShoulders, dec!(65));
        }
    }
    if let [.., l, head, r] = bottoms[..] {
        if head < l - tolerance && head < r - tolerance && (l - r).abs() <= tolerance {
            push(ChartPattern::InverseHeadAndShoulders, dec!(65));
        }
    }
    if let [.., a, b] = tops[..] {
        let near_top = range_high - tolerance * dec!(2);
        if (a - b).abs() <= tolerance && a >= near_top && b >= near_top {
            push(ChartPattern::DoubleTop, dec!(60));
        }
    }
    if let [.., a, b] = bottoms[..] {
        let near_bottom = range_low + tolerance * dec!(2);
        if (a - b).abs() <= tolerance && a <= near_bottom && b <= near_bottom {
            push(ChartPattern::DoubleBottom, dec!(60));
        }
    }
    found
}

// ═══════════════════════════════════════════════════════════════════════════
// Regime
// ═══════════════════════════════════════════════════════════════════════════

pub fn classify_regime(candles: &[Candle]) -> RegimeReading {
    let closes = closes(candles);
    let start = closes.len().saturating_sub(REGIME_WINDOW);
    let recent = &closes[start..];

    let efficiency = efficiency_ratio(recent);
    let short_vol = return_volatility(&closes, REGIME_WINDOW / 2);
    let long_vol = return_volatility(&closes, REGIME_WINDOW * 2);
    let vol_ratio = if long_vol > 0.0 { short_vol / long_vol } else { 1.0 };
    let net = match (recent.first(), recent.last()) {
        (Some(first), Some(last)) => *last - *first,
        _ => Decimal::ZERO,
    };

    let regime = if vol_ratio > VOLATILE_RATIO {
        MarketRegime::Volatile
    } else if efficiency > TRENDING_EFFICIENCY && net > Decimal::ZERO {
        MarketRegime::TrendingUp
    } else if efficiency > TRENDING_EFFICIENCY && net < Decimal::ZERO {
        MarketRegime::TrendingDown
    } else if vol_ratio < QUIET_RATIO {
        MarketRegime::LowVolatility
    } else {
        MarketRegime::Ranging
    };

    RegimeReading {
        regime,
        trend_strength: from_f64(efficiency).round_dp(3),
        volatility_ratio: from_f64(vol_ratio).round_dp(3),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Ensemble
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct AiEnsemble {
    weights: ConfluenceWeights,
    min_agreeing: usize,
}

impl AiEnsemble {
    pub fn new(weights: ConfluenceWeights) -> Self {
        Self {
            weights,
            min_agreeing: AI_MIN_AGREEING_BIASES,
        }
    }

    /// Weighted lean of the analyzer scores mapped onto [0, 1].
    fn probability_up(&self, results: &[AnalyzerResult]) -> Decimal {
        let lean: Decimal = results
            .iter()
            .map(|r| r.bias.sign() * r.score / dec!(100) * self.weights.weight(r.domain))
            .sum();
        (dec!(0.5) + lean / dec!(2)).clamp(Decimal::ZERO, dec!(1))
    }

    fn predict(&self, results: &[AnalyzerResult]) -> Prediction {
        let count = |bias: Bias| results.iter().filter(|r| r.bias == bias).count();
        let (bullish, bearish, neutral) = (
            count(Bias::Bullish),
            count(Bias::Bearish),
            count(Bias::Neutral),
        );
        let bias = if bullish >= self.min_agreeing && bullish > bearish {
            Bias::Bullish
        } else if bearish >= self.min_agreeing && bearish > bullish {
            Bias::Bearish
        } else {
            Bias::Neutral
        };
        Prediction {
            bias,
            bullish,
            bearish,
            neutral,
        }
    }

    fn pattern_score(patterns: &[PatternMatch], direction: Bias) -> Decimal {
        if direction == Bias::Neutral {
            return dec!(40);
        }
        let aligned = patterns
            .iter()
            .filter(|p| p.bias == direction)
            .map(|p| p.confidence)
            .max();
        match aligned {
            Some(confidence) => confidence,
            None if patterns.iter().any(|p| p.bias == direction.opposite()) => dec!(15),
            None => dec!(40),
        }
    }

    fn regime_score(regime: &RegimeReading, direction: Bias) -> Decimal {
        let with_trend = dec!(80) + regime.trend_strength * dec!(20);
        match (regime.regime, direction) {
            (MarketRegime::TrendingUp, Bias::Bullish) | (MarketRegime::TrendingDown, Bias::Bearish) => {
                with_trend
            }
            (MarketRegime::TrendingUp, Bias::Bearish) | (MarketRegime::TrendingDown, Bias::Bullish) => {
                dec!(20)
            }
            (MarketRegime::Ranging, _) => dec!(40),
            (MarketRegime::LowVolatility, _) => dec!(35),
            _ => dec!(30),
        }
    }

    /// Assessment from the primary candles and the ten analyzer results.
    pub fn assess(&self, candles: &[Candle], results: &[AnalyzerResult]) -> AiAssessment {
        let patterns = detect_patterns(candles);
        let regime = classify_regime(candles);
        let probability_up = self.probability_up(results);
        let prediction = self.predict(results);

        let direction = match prediction.bias {
            Bias::Neutral if probability_up > dec!(0.55) => Bias::Bullish,
            Bias::Neutral if probability_up < dec!(0.45) => Bias::Bearish,
            bias => bias,
        };

        let probability_score = match direction {
            Bias::Bullish => probability_up * dec!(100),
            Bias::Bearish => (dec!(1) - probability_up) * dec!(100),
            Bias::Neutral => dec!(50),
        };
        let prediction_score = if prediction.bias == direction {
            prediction.agreement() * dec!(100)
        } else {
            Decimal::ZERO
        };

        let confidence = Self::pattern_score(&patterns, direction) * AI_BLEND_PATTERN
            + Self::regime_score(&regime, direction) * AI_BLEND_REGIME
            + probability_score * AI_BLEND_PROBABILITY
            + prediction_score * AI_BLEND_PREDICTION;

        AiAssessment {
            direction,
            confidence: clamp_score(confidence.round_dp(2)),
            patterns,
            regime,
            probability_up: probability_up.round_dp(4),
            prediction,
        }
    }

    /// Every reason the assessment argues against trading, in the order
    /// they should be reported.
    pub fn rejection_reasons(
        &self,
        assessment: &AiAssessment,
        confluence: &ConfluenceResult,
        blackout: Option<&Blackout>,
        thresholds: &ThresholdConfig,
    ) -> Vec<RejectionReason> {
        let mut reasons = Vec::new();
        let p = &assessment.prediction;
        if p.bullish >= self.min_agreeing
            && p.bearish >= self.min_agreeing
            && p.bullish.abs_diff(p.bearish) <= 1
        {
            reasons.push(RejectionReason::ConflictingSignals {
                bullish: p.bullish,
                bearish: p.bearish,
            });
        }
        if let Some(b) = blackout {
            reasons.push(RejectionReason::NewsBlackout {
                event: format!("{} {}", b.event.currency, b.event.title),
                minutes_to_event: b.minutes_to_event,
            });
        }
        if confluence.score < thresholds.min_confluence {
            reasons.push(RejectionReason::LowConfluence {
                score: confluence.score,
                minimum: thresholds.min_confluence,
            });
        }
        if assessment.confidence < thresholds.min_ai_confidence {
            reasons.push(RejectionReason::LowAiConfidence {
                confidence: assessment.confidence,
                minimum: thresholds.min_ai_confidence,
            });
        }
        reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::{falling, rising, T0};
    use crate::analyzers::DomainFindings;
    use crate::types::Direction;
    use crate::core::validator::fixtures::aligned_results;
    use crate::types::{Domain, EconomicEvent, EventImpact, SignalQuality};

    fn ensemble() -> AiEnsemble {
        AiEnsemble::new(ConfluenceWeights::default())
    }

    fn results(biases: &[Bias]) -> Vec<AnalyzerResult> {
        Domain::ALL
            .into_iter()
            .zip(biases)
            .map(|(d, b)| AnalyzerResult::new(d, dec!(70), *b, DomainFindings::Empty))
            .collect()
    }

    #[test]
    fn test_rising_series_reads_trending_up() {
        let regime = classify_regime(&rising(120));
        assert_eq!(regime.regime, MarketRegime::TrendingUp);
        assert!(regime.trend_strength > dec!(0.3));
        assert_eq!(classify_regime(&falling(120)).regime, MarketRegime::TrendingDown);
    }

    #[test]
    fn test_channels_from_steady_trends() {
        let up = detect_patterns(&rising(60));
        assert!(up.iter().any(|p| p.pattern == ChartPattern::AscendingChannel));
        let down = detect_patterns(&falling(60));
        assert!(down.iter().any(|p| p.pattern == ChartPattern::DescendingChannel));
        assert!(down.iter().all(|p| p.confidence <= dec!(100)));
    }

    #[test]
    fn test_ascending_triangle() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let low = dec!(1.1000) + Decimal::from(i) * dec!(0.00015);
                Candle {
                    timestamp: T0 + i * 3600,
                    open: low + dec!(0.0005),
                    high: dec!(1.1050),
                    low,
                    close: dec!(1.1045),
                    volume: dec!(1000),
                }
            })
            .collect();
        let found = detect_patterns(&candles);
        let triangle = found
            .iter()
            .find(|p| p.pattern == ChartPattern::AscendingTriangle)
            .expect("ascending triangle");
        assert_eq!(triangle.bias, Bias::Bullish);
    }

    #[test]
    fn test_majority_needs_three_agreeing() {
        use Bias::*;
        let e = ensemble();
        let p = e.predict(&results(&[Bullish, Bullish, Neutral, Neutral, Neutral, Neutral, Neutral, Neutral, Neutral, Neutral]));
        assert_eq!(p.bias, Neutral);
        let p = e.predict(&results(&[Bullish, Bullish, Bullish, Bearish, Neutral, Neutral, Neutral, Neutral, Neutral, Neutral]));
        assert_eq!(p.bias, Bullish);
        assert_eq!(p.agreement(), dec!(0.75));
    }

    #[test]
    fn test_aligned_inputs_give_confident_direction() {
        let assessment = ensemble().assess(&rising(120), &aligned_results(Bias::Bullish));
        assert_eq!(assessment.direction, Bias::Bullish);
        assert!(assessment.probability_up > dec!(0.8));
        assert!(assessment.confidence >= dec!(70), "{}", assessment.confidence);
        assert_eq!(Direction::from_bias(assessment.direction), Some(Direction::Buy));
    }

    #[test]
    fn test_rejection_reasons() {
        use Bias::*;
        let e = ensemble();
        let split = results(&[Bullish, Bullish, Bullish, Bearish, Bearish, Bearish, Bullish, Neutral, Neutral, Neutral]);
        let assessment = e.assess(&rising(120), &split);
        let confluence = ConfluenceResult {
            score: dec!(62),
            quality: SignalQuality::Moderate,
            breakdown: Vec::new(),
            meets_minimum: false,
            penalty: Decimal::ZERO,
        };
        let blackout = Blackout {
            event: EconomicEvent {
                time: chrono::Utc::now(),
                currency: "USD".into(),
                impact: EventImpact::High,
                title: "CPI".into(),
            },
            minutes_to_event: -5,
        };
        let reasons = e.rejection_reasons(&assessment, &confluence, Some(&blackout), &ThresholdConfig::default());
        assert_eq!(
            reasons[0],
            RejectionReason::ConflictingSignals { bullish: 4, bearish: 3 }
        );
        assert!(matches!(reasons[1], RejectionReason::NewsBlackout { minutes_to_event: -5, .. }));
        assert!(reasons.contains(&RejectionReason::LowConfluence {
            score: dec!(62),
            minimum: dec!(80)
        }));
    }
}
