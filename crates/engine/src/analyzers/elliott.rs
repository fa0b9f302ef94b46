//! Elliott wave structure from zigzag pivots, validated with Fibonacci ratios.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use super::fibonacci::matches_any;
use super::indicators::{from_f64, to_f64};
use super::swings::{find_swings, zigzag, SwingKind, SwingPoint};
use super::{Analyzer, AnalysisInput, AnalyzerResult, DomainFindings};
use crate::config::LookbackConfig;
use crate::errors::EngineResult;
use crate::types::{Bias, Domain};

const RATIO_TOLERANCE: f64 = 0.10;
const WAVE2_RETRACE: [f64; 2] = [0.5, 0.618];
const WAVE3_EXTENSION: [f64; 2] = [1.618, 2.618];
const WAVE4_RETRACE: [f64; 2] = [0.236, 0.382];
const WAVE_B_RETRACE: [f64; 3] = [0.5, 0.618, 0.786];
const WAVE_C_EXTENSION: [f64; 2] = [1.0, 1.618];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WavePattern {
    /// Waves 1-4 in place, wave 5 pending.
    ImpulseInProgress,
    /// Five waves complete; a correction is due.
    ImpulseComplete,
    /// A-B-C correction complete; the prior trend is due to resume.
    CorrectionComplete,
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct ElliottFindings {
    pub pattern: WavePattern,
    /// Direction of the counted structure (impulse or correction).
    pub wave_direction: Bias,
    pub pivots: Vec<Decimal>,
    /// Fibonacci relationships that held, e.g. `"wave2=0.618"`.
    pub fib_matches: Vec<String>,
    /// Share of checked Fibonacci relationships that held, 0-1.
    pub fib_score: Decimal,
}

struct Count {
    pattern: WavePattern,
    direction: Bias,
    pivots: Vec<SwingPoint>,
    checks: usize,
    matches: Vec<String>,
}

fn span(a: &SwingPoint, b: &SwingPoint) -> f64 {
    to_f64((b.price - a.price).abs())
}

fn ratio_check(
    matches: &mut Vec<String>,
    label: &str,
    value: f64,
    targets: &[f64],
) -> bool {
    let hit = matches_any(value, targets, RATIO_TOLERANCE);
    if hit {
        matches.push(format!("{label}={value:.3}"));
    }
    hit
}

/// Direction sign of a leg starting at `p`: a low start means an up leg.
fn leg_up(p: &SwingPoint) -> bool {
    p.kind == SwingKind::Low
}

/// Try the last five pivots (waves 1-4) and the last six (waves 1-5).
fn count_impulse(pivots: &[SwingPoint], waves: usize) -> Option<Count> {
    let n = waves + 1;
    if pivots.len() < n {
        return None;
    }
    let p = &pivots[pivots.len() - n..];
    let up = leg_up(&p[0]);
    let beyond = |a: Decimal, b: Decimal| if up { a > b } else { a < b };

    // Wave 2 never retraces all of wave 1; wave 3 exceeds wave 1's end.
    if !beyond(p[2].price, p[0].price) || !beyond(p[3].price, p[1].price) {
        return None;
    }
    // Wave 4 stays out of wave 1's territory.
    if !beyond(p[4].price, p[1].price) {
        return None;
    }

    let w1 = span(&p[0], &p[1]);
    let w2 = span(&p[1], &p[2]);
    let w3 = span(&p[2], &p[3]);
    let w4 = span(&p[3], &p[4]);
    if w1 == 0.0 || w3 == 0.0 {
        return None;
    }

    let mut matches = Vec::new();
    ratio_check(&mut matches, "wave2", w2 / w1, &WAVE2_RETRACE);
    ratio_check(&mut matches, "wave3", w3 / w1, &WAVE3_EXTENSION);
    ratio_check(&mut matches, "wave4", w4 / w3, &WAVE4_RETRACE);
    let mut checks = 3;

    let pattern = if waves == 5 {
        let w5 = span(&p[4], &p[5]);
        // Wave 3 is never the shortest, and wave 5 makes a new extreme.
        if w3 < w1.min(w5) || !beyond(p[5].price, p[3].price) {
            return None;
        }
        checks += 1;
        ratio_check(&mut matches, "wave5", w5 / w1, &[0.618, 1.0, 1.618]);
        WavePattern::ImpulseComplete
    } else {
        if w3 < w1 {
            return None;
        }
        WavePattern::ImpulseInProgress
    };

    Some(Count {
        pattern,
        direction: if up { Bias::Bullish } else { Bias::Bearish },
        pivots: p.to_vec(),
        checks,
        matches,
    })
}

/// Last four pivots as a completed A-B-C.
fn count_correction(pivots: &[SwingPoint]) -> Option<Count> {
    if pivots.len() < 4 {
        return None;
    }
    let p = &pivots[pivots.len() - 4..];
    let up = leg_up(&p[0]);
    let beyond = |a: Decimal, b: Decimal| if up { a > b } else { a < b };

    // B stays inside A; C runs past A's end.
    if !beyond(p[2].price, p[0].price) || !beyond(p[3].price, p[1].price) {
        return None;
    }
    let a = span(&p[0], &p[1]);
    let b = span(&p[1], &p[2]);
    let c = span(&p[2], &p[3]);
    if a == 0.0 {
        return None;
    }

    let mut matches = Vec::new();
    let b_ok = ratio_check(&mut matches, "waveB", b / a, &WAVE_B_RETRACE);
    let c_ok = ratio_check(&mut matches, "waveC", c / a, &WAVE_C_EXTENSION);
    if !b_ok && !c_ok {
        return None;
    }

    Some(Count {
        pattern: WavePattern::CorrectionComplete,
        direction: if up { Bias::Bullish } else { Bias::Bearish },
        pivots: p.to_vec(),
        checks: 2,
        matches,
    })
}

pub struct ElliottAnalyzer {
    min_bars: usize,
    lookback: usize,
    swing_strength: usize,
}

impl ElliottAnalyzer {
    pub fn new(lookbacks: &LookbackConfig) -> Self {
        Self {
            min_bars: lookbacks.min_bars,
            lookback: lookbacks.elliott,
            swing_strength: lookbacks.swing_strength.max(2),
        }
    }
}

impl Analyzer for ElliottAnalyzer {
    fn domain(&self) -> Domain {
        Domain::Elliott
    }

    fn analyze(&self, input: &AnalysisInput) -> EngineResult<AnalyzerResult> {
        let Some(candles) = input.primary_window(self.min_bars, self.lookback) else {
            return Ok(AnalyzerResult::empty(Domain::Elliott));
        };

        let pivots = zigzag(&find_swings(candles, self.swing_strength));

        let count = count_impulse(&pivots, 5)
            .or_else(|| count_impulse(&pivots, 4))
            .or_else(|| count_correction(&pivots));

        let Some(count) = count else {
            let findings = ElliottFindings {
                pattern: WavePattern::None,
                wave_direction: Bias::Neutral,
                pivots: pivots.iter().rev().take(6).rev().map(|p| p.price).collect(),
                fib_matches: Vec::new(),
                fib_score: Decimal::ZERO,
            };
            return Ok(AnalyzerResult::new(
                Domain::Elliott,
                dec!(10),
                Bias::Neutral,
                DomainFindings::Elliott(findings),
            ));
        };

        let fib_score = from_f64(count.matches.len() as f64 / count.checks as f64).round_dp(3);
        let opposite = count.direction.opposite();
        let (bias, base) = match count.pattern {
            WavePattern::ImpulseInProgress => (count.direction, dec!(55)),
            WavePattern::ImpulseComplete => (opposite, dec!(45)),
            WavePattern::CorrectionComplete => (opposite, dec!(45)),
            WavePattern::None => (Bias::Neutral, dec!(10)),
        };
        let score = base + fib_score * dec!(40);

        Ok(AnalyzerResult::new(
            Domain::Elliott,
            score,
            bias,
            DomainFindings::Elliott(ElliottFindings {
                pattern: count.pattern,
                wave_direction: count.direction,
                pivots: count.pivots.iter().map(|p| p.price).collect(),
                fib_matches: count.matches,
                fib_score,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pivot(index: usize, price: Decimal, kind: SwingKind) -> SwingPoint {
        SwingPoint {
            index,
            timestamp: index as i64,
            price,
            kind,
        }
    }

    fn alternating(prices: &[Decimal], first: SwingKind) -> Vec<SwingPoint> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let kind = if (i % 2 == 0) == (first == SwingKind::Low) {
                    SwingKind::Low
                } else {
                    SwingKind::High
                };
                pivot(i * 5, p, kind)
            })
            .collect()
    }

    #[test]
    fn test_textbook_impulse_in_progress() {
        // 100 → 110 (w1), → 103.82 (w2 61.8%), → 120 (w3 161.8%), → 113.82 (w4 38.2%).
        let pivots = alternating(
            &[dec!(100), dec!(110), dec!(103.82), dec!(120), dec!(113.82)],
            SwingKind::Low,
        );
        let count = count_impulse(&pivots, 4).expect("impulse");
        assert_eq!(count.pattern, WavePattern::ImpulseInProgress);
        assert_eq!(count.direction, Bias::Bullish);
        assert_eq!(count.matches.len(), 3);
    }

    #[test]
    fn test_wave4_overlap_rejected() {
        let pivots = alternating(
            &[dec!(100), dec!(110), dec!(104), dec!(126), dec!(108)],
            SwingKind::Low,
        );
        assert!(count_impulse(&pivots, 4).is_none());
    }

    #[test]
    fn test_complete_impulse_down() {
        let pivots = alternating(
            &[dec!(200), dec!(190), dec!(196), dec!(175), dec!(182), dec!(170)],
            SwingKind::High,
        );
        let count = count_impulse(&pivots, 5).expect("impulse");
        assert_eq!(count.pattern, WavePattern::ImpulseComplete);
        assert_eq!(count.direction, Bias::Bearish);
    }

    #[test]
    fn test_abc_correction() {
        // A: 120 → 110, B: 116.18 (61.8%), C: 106.18 (C = A).
        let pivots = alternating(
            &[dec!(120), dec!(110), dec!(116.18), dec!(106.18)],
            SwingKind::High,
        );
        let count = count_correction(&pivots).expect("correction");
        assert_eq!(count.direction, Bias::Bearish);
        assert_eq!(count.matches.len(), 2);
    }
}
