//! Multi-layer validation: every analysis domain re-checked against a
//! proposed direction.
//!
//! Each layer scores 0-100 and passes at [`LAYER_PASS_SCORE`]. A direction is
//! valid only when enough layers pass and every critical layer passes on its
//! own. A news blackout fails the fundamental layer outright.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::analyzers::market_profile::ValuePosition;
use crate::analyzers::smc::PriceZone;
use crate::analyzers::wyckoff::WyckoffEventKind;
use crate::analyzers::{AnalyzerResult, DomainFindings, FundamentalFindings, SmcFindings, TechnicalFindings};
use crate::config::ThresholdConfig;
use crate::constants::LAYER_PASS_SCORE;
use crate::types::{
    clamp_score, Bias, Direction, Domain, Recommendation, ValidationLayerResult, ValidationReport,
};

/// Passed layers at or above which a valid direction is a strong signal.
const STRONG_LAYERS: usize = 9;
/// Passed layers at or above which an invalid direction is a weak signal.
const WEAK_LAYERS: usize = 6;

/// Points and the checks that earned them.
#[derive(Default)]
struct Tally {
    score: Decimal,
    details: Vec<String>,
}

impl Tally {
    fn add(&mut self, hit: bool, points: Decimal, detail: &str) {
        if hit {
            self.score += points;
            self.details.push(detail.to_string());
        }
    }
}

#[derive(Debug, Clone)]
pub struct MultiLayerValidator {
    min_layers: usize,
    critical: Vec<Domain>,
}

impl MultiLayerValidator {
    pub fn new(min_layers: usize, critical: Vec<Domain>) -> Self {
        Self {
            min_layers,
            critical,
        }
    }

    pub fn from_thresholds(thresholds: &ThresholdConfig) -> Self {
        Self::new(thresholds.min_layers, thresholds.critical_layers.clone())
    }

    /// One layer per domain, in [`Domain::ALL`] order. A domain missing from
    /// `results` fails its layer.
    pub fn validate(&self, results: &[AnalyzerResult], direction: Direction) -> ValidationReport {
        let layers: Vec<ValidationLayerResult> = Domain::ALL
            .into_iter()
            .map(|domain| match results.iter().find(|r| r.domain == domain) {
                Some(result) => validate_layer(result, direction),
                None => failed_layer(domain, "no analysis result"),
            })
            .collect();

        let passed_count = layers.iter().filter(|l| l.passed).count();
        let failed_critical: Vec<Domain> = self
            .critical
            .iter()
            .copied()
            .filter(|d| !layers.iter().any(|l| l.name == *d && l.passed))
            .collect();
        let critical_layers_passed = failed_critical.is_empty();
        let is_valid = passed_count >= self.min_layers && critical_layers_passed;

        let recommendation = if is_valid && passed_count >= STRONG_LAYERS {
            Recommendation::StrongSignal
        } else if is_valid {
            Recommendation::ValidSignal
        } else if !critical_layers_passed {
            Recommendation::CriticalLayersFailed
        } else if passed_count >= WEAK_LAYERS {
            Recommendation::WeakSignal
        } else {
            Recommendation::NoTrade
        };

        debug!(
            direction = %direction,
            passed = passed_count,
            critical_ok = critical_layers_passed,
            recommendation = ?recommendation,
            "validation complete"
        );

        ValidationReport {
            direction,
            is_valid,
            passed_count,
            critical_layers_passed,
            failed_critical,
            layers,
            recommendation,
        }
    }
}

fn failed_layer(domain: Domain, reason: impl Into<String>) -> ValidationLayerResult {
    ValidationLayerResult {
        name: domain,
        passed: false,
        score: Decimal::ZERO,
        reason: reason.into(),
        details: Vec::new(),
    }
}

fn finish_layer(domain: Domain, tally: Tally, bias: Bias, direction: Direction) -> ValidationLayerResult {
    let score = clamp_score(tally.score.round_dp(2));
    let passed = score >= LAYER_PASS_SCORE;
    let reason = if passed {
        format!("{domain} supports {direction}")
    } else if bias.opposes(direction) {
        format!("{domain} opposes {direction} ({bias})")
    } else {
        format!("{domain} does not confirm {direction} (score {score})")
    };
    ValidationLayerResult {
        name: domain,
        passed,
        score,
        reason,
        details: tally.details,
    }
}

fn validate_layer(result: &AnalyzerResult, direction: Direction) -> ValidationLayerResult {
    if let Some(error) = &result.error {
        return failed_layer(result.domain, format!("analyzer failed: {error}"));
    }
    let tally = match &result.findings {
        DomainFindings::Empty => return failed_layer(result.domain, "insufficient data"),
        DomainFindings::Fundamental(f) if f.in_blackout() => {
            let reason = f.blackout.as_ref().map_or_else(
                || "news blackout".to_string(),
                |b| format!("news blackout: {} in {} min", b.event.title, b.minutes_to_event),
            );
            return failed_layer(result.domain, reason);
        }
        DomainFindings::Intermarket(f) if f.related.is_empty() => {
            // Nothing to confirm or contradict.
            let mut tally = Tally {
                score: LAYER_PASS_SCORE,
                ..Tally::default()
            };
            tally.details.push("no_related_data".into());
            tally
        }
        DomainFindings::Smc(f) => smc_layer(f, direction),
        DomainFindings::Technical(f) => technical_layer(f, direction),
        DomainFindings::Fundamental(f) => fundamental_layer(f, result.bias, direction),
        DomainFindings::Sentiment(_) => sentiment_layer(result.bias, direction),
        findings => {
            let mut tally = directional_tally(result, direction);
            domain_extras(findings, direction, &mut tally);
            tally
        }
    };
    finish_layer(result.domain, tally, result.bias, direction)
}

fn smc_layer(f: &SmcFindings, direction: Direction) -> Tally {
    let bias = direction.bias();
    let mut t = Tally::default();
    t.add(f.structure == bias, dec!(25), "structure_aligned");
    t.add(f.latest_block(bias).is_some(), dec!(20), "order_block_aligned");
    t.add(f.has_gap(bias), dec!(20), "fair_value_gap_open");
    t.add(!f.liquidity.is_empty(), dec!(15), "liquidity_identified");
    if let Some(zone) = &f.zone {
        let favourable = match direction {
            Direction::Buy => PriceZone::Discount,
            Direction::Sell => PriceZone::Premium,
        };
        t.add(zone.zone == favourable, dec!(20), "zone_aligned");
        t.add(zone.zone == PriceZone::Equilibrium, dec!(10), "zone_equilibrium");
    }
    t
}

fn technical_layer(f: &TechnicalFindings, direction: Direction) -> Tally {
    let ind = &f.indicators;
    let mut t = Tally::default();
    t.add(f.trend.direction.agrees_with(direction), dec!(30), "trend_aligned");
    let rsi_room = match direction {
        Direction::Buy => ind.rsi < dec!(70),
        Direction::Sell => ind.rsi > dec!(30),
    };
    t.add(rsi_room, dec!(15), "rsi_not_extreme");
    t.add(
        ind.macd.histogram * direction.sign() > Decimal::ZERO,
        dec!(20),
        "macd_aligned",
    );
    let ema_aligned = match direction {
        Direction::Buy => ind.price > ind.ema_trend && ind.ema_fast > ind.ema_slow,
        Direction::Sell => ind.price < ind.ema_trend && ind.ema_fast < ind.ema_slow,
    };
    t.add(ema_aligned, dec!(20), "ema_stack_aligned");
    let opposed = f.divergence.is_some_and(|d| d.bias.opposes(direction))
        || f.patterns.last().is_some_and(|p| p.bias.opposes(direction));
    t.add(!opposed, dec!(15), "no_opposing_pattern");
    t
}

fn fundamental_layer(f: &FundamentalFindings, bias: Bias, direction: Direction) -> Tally {
    let mut t = Tally {
        score: dec!(60),
        details: vec!["no_blackout".into()],
    };
    t.add(bias.agrees_with(direction), dec!(30), "news_aligned");
    if bias.opposes(direction) {
        t.score -= dec!(40);
        t.details.push("news_opposed".into());
    }
    let events = Decimal::from(f.upcoming_events.len().min(3) as u64);
    if !events.is_zero() {
        t.score -= events * dec!(10);
        t.details.push(format!("upcoming_events={}", f.upcoming_events.len()));
    }
    t
}

fn sentiment_layer(bias: Bias, direction: Direction) -> Tally {
    if bias.agrees_with(direction) {
        Tally {
            score: dec!(70),
            details: vec!["contrarian_aligned".into()],
        }
    } else if bias == Bias::Neutral {
        Tally {
            score: dec!(55),
            details: vec!["crowd_balanced".into()],
        }
    } else {
        Tally {
            score: dec!(25),
            ..Tally::default()
        }
    }
}

/// Shared scoring for the remaining domains, driven by the analyzer's own
/// bias and score.
fn directional_tally(result: &AnalyzerResult, direction: Direction) -> Tally {
    let mut t = Tally::default();
    if result.bias.agrees_with(direction) {
        t.score = dec!(50) + result.score / dec!(2);
        t.details.push("bias_aligned".into());
    } else if result.bias == Bias::Neutral {
        t.score = result.score / dec!(3);
    } else {
        t.score = (dec!(100) - result.score) / dec!(4);
    }
    t
}

fn domain_extras(findings: &DomainFindings, direction: Direction, t: &mut Tally) {
    let bias = direction.bias();
    match findings {
        DomainFindings::Wyckoff(f) => {
            let spring_or_upthrust = match direction {
                Direction::Buy => WyckoffEventKind::Spring,
                Direction::Sell => WyckoffEventKind::Upthrust,
            };
            t.add(
                f.event.is_some_and(|e| e.kind == spring_or_upthrust),
                dec!(10),
                "wyckoff_event_aligned",
            );
        }
        DomainFindings::Elliott(f) => {
            t.add(f.fib_score >= dec!(0.5), dec!(5), "fib_ratios_hold");
        }
        DomainFindings::Vsa(f) => {
            let aligned = f.signals.iter().filter(|s| s.kind.bias() == bias).count();
            if aligned > 0 {
                t.details.push(format!("vsa_signals_aligned={aligned}"));
            }
        }
        DomainFindings::MarketProfile(f) => {
            let accepted = match direction {
                Direction::Buy => f.position == ValuePosition::AboveValue,
                Direction::Sell => f.position == ValuePosition::BelowValue,
            };
            t.add(accepted, dec!(5), "outside_value_aligned");
        }
        DomainFindings::OrderFlow(f) => {
            if f.divergence.is_some_and(|d| d.opposes(direction)) {
                t.score -= dec!(10);
                t.details.push("delta_divergence".into());
            }
        }
        DomainFindings::Intermarket(f) => {
            if !f.divergences.is_empty() {
                t.details.push(format!("diverging={}", f.divergences.join(",")));
            }
        }
        _ => {}
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::aligned_results;
    use super::*;
    use crate::types::{Blackout, EconomicEvent, EventImpact};
    use chrono::Utc;

    fn validator() -> MultiLayerValidator {
        MultiLayerValidator::from_thresholds(&ThresholdConfig::default())
    }

    fn layer(report: &ValidationReport, domain: Domain) -> &ValidationLayerResult {
        report.layers.iter().find(|l| l.name == domain).unwrap()
    }

    #[test]
    fn test_aligned_results_are_strong() {
        let report = validator().validate(&aligned_results(Bias::Bullish), Direction::Buy);
        assert_eq!(report.passed_count, 10);
        assert!(report.is_valid);
        assert!(report.critical_layers_passed);
        assert_eq!(report.recommendation, Recommendation::StrongSignal);
        let smc = layer(&report, Domain::Smc);
        assert!(smc.details.contains(&"order_block_aligned".to_string()));
        assert!(smc.details.contains(&"zone_aligned".to_string()));
    }

    #[test]
    fn test_sell_side_mirrors_buy() {
        let report = validator().validate(&aligned_results(Bias::Bearish), Direction::Sell);
        assert!(report.is_valid);
        let tech = layer(&report, Domain::Technical);
        assert_eq!(tech.score, dec!(100));
    }

    #[test]
    fn test_wrong_direction_fails_critical() {
        let report = validator().validate(&aligned_results(Bias::Bullish), Direction::Sell);
        assert!(!report.is_valid);
        assert!(report.failed_critical.contains(&Domain::Smc));
        assert!(report.failed_critical.contains(&Domain::Technical));
        assert_eq!(report.recommendation, Recommendation::CriticalLayersFailed);
    }

    #[test]
    fn test_blackout_fails_fundamental_regardless() {
        let mut results = aligned_results(Bias::Bullish);
        let event = EconomicEvent {
            time: Utc::now(),
            currency: "USD".into(),
            impact: EventImpact::High,
            title: "NFP".into(),
        };
        if let DomainFindings::Fundamental(f) = &mut results[8].findings {
            f.blackout = Some(Blackout {
                event,
                minutes_to_event: 12,
            });
        }
        let report = validator().validate(&results, Direction::Buy);
        let fundamental = layer(&report, Domain::Fundamental);
        assert!(!fundamental.passed);
        assert!(fundamental.reason.contains("NFP"));
        assert_eq!(report.passed_count, 9);
        assert!(!report.critical_layers_passed);
        assert!(!report.is_valid);
        assert_eq!(report.failed_critical, vec![Domain::Fundamental]);
    }

    #[test]
    fn test_empty_and_failed_results_fail_their_layer() {
        let mut results = aligned_results(Bias::Bullish);
        results[3] = AnalyzerResult::empty(Domain::Elliott);
        results[4] = AnalyzerResult::failed(Domain::Vsa, "boom");
        let report = validator().validate(&results, Direction::Buy);
        assert_eq!(report.passed_count, 8);
        assert!(report.is_valid);
        assert_eq!(report.recommendation, Recommendation::ValidSignal);
        assert!(layer(&report, Domain::Vsa).reason.contains("boom"));
    }

    #[test]
    fn test_weak_signal_below_min_layers() {
        let mut results = aligned_results(Bias::Bullish);
        for i in [2, 3, 4, 5] {
            results[i] = AnalyzerResult::empty(results[i].domain);
        }
        let report = validator().validate(&results, Direction::Buy);
        assert_eq!(report.passed_count, 6);
        assert!(!report.is_valid);
        assert_eq!(report.recommendation, Recommendation::WeakSignal);

        results[6] = AnalyzerResult::empty(Domain::OrderFlow);
        let report = validator().validate(&results, Direction::Buy);
        assert_eq!(report.recommendation, Recommendation::NoTrade);
    }

    #[test]
    fn test_missing_domain_fails() {
        let results: Vec<AnalyzerResult> = aligned_results(Bias::Bullish)
            .into_iter()
            .filter(|r| r.domain != Domain::Technical)
            .collect();
        let report = validator().validate(&results, Direction::Buy);
        assert_eq!(report.failed_critical, vec![Domain::Technical]);
    }
}
