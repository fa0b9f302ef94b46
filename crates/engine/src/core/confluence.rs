//! Weighted composite of the ten analyzer scores.
//!
//! When a direction is proposed, each component is scored against it: an
//! agreeing analyzer contributes its full score, a neutral one half, and an
//! opposing one nothing. Without a direction the raw scores are used.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::analyzers::AnalyzerResult;
use crate::config::ConfluenceWeights;
use crate::config::validate::validate_weights;
use crate::constants::CONFLUENCE_MINIMUM;
use crate::errors::{EngineError, EngineResult};
use crate::types::{
    clamp_score, Bias, ConfluenceComponent, ConfluenceResult, Direction, Domain, SignalQuality,
};

#[derive(Debug, Clone)]
pub struct ConfluenceCalculator {
    weights: ConfluenceWeights,
}

impl ConfluenceCalculator {
    /// Fails when the weights are negative or do not sum to 1.0 ± 0.001.
    pub fn new(weights: ConfluenceWeights) -> EngineResult<Self> {
        let mut errors = Vec::new();
        validate_weights(&weights, &mut errors);
        if !errors.is_empty() {
            return Err(EngineError::Config(errors.join("; ")));
        }
        Ok(Self { weights })
    }

    fn component_score(result: &AnalyzerResult, direction: Option<Direction>) -> Decimal {
        match direction {
            None => result.score,
            Some(d) if result.bias.agrees_with(d) => result.score,
            Some(_) if result.bias == Bias::Neutral => result.score * dec!(0.5),
            Some(_) => Decimal::ZERO,
        }
    }

    /// Composite over `results`. A domain missing from `results` scores 0.
    pub fn calculate(
        &self,
        results: &[AnalyzerResult],
        direction: Option<Direction>,
    ) -> ConfluenceResult {
        let breakdown: Vec<ConfluenceComponent> = Domain::ALL
            .into_iter()
            .map(|domain| {
                let score = results
                    .iter()
                    .find(|r| r.domain == domain)
                    .map_or(Decimal::ZERO, |r| Self::component_score(r, direction));
                let weight = self.weights.weight(domain);
                ConfluenceComponent {
                    component: domain,
                    score,
                    weight,
                    contribution: (score * weight).round_dp(2),
                }
            })
            .collect();

        let raw: Decimal = breakdown.iter().map(|c| c.score * c.weight).sum();
        Self::finish(raw, breakdown, Decimal::ZERO)
    }

    /// Deducts `penalty` points and recomputes quality and the minimum flag.
    pub fn apply_penalty(&self, result: ConfluenceResult, penalty: Decimal) -> ConfluenceResult {
        if penalty <= Decimal::ZERO {
            return result;
        }
        let raw = result.score - penalty;
        Self::finish(raw, result.breakdown, result.penalty + penalty)
    }

    fn finish(
        raw: Decimal,
        breakdown: Vec<ConfluenceComponent>,
        penalty: Decimal,
    ) -> ConfluenceResult {
        let score = clamp_score(raw.round());
        ConfluenceResult {
            score,
            quality: SignalQuality::from_score(score),
            breakdown,
            meets_minimum: score >= CONFLUENCE_MINIMUM,
            penalty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::DomainFindings;
    use proptest::prelude::*;

    fn result(domain: Domain, score: Decimal, bias: Bias) -> AnalyzerResult {
        AnalyzerResult::new(domain, score, bias, DomainFindings::Empty)
    }

    fn all(score: Decimal, bias: Bias) -> Vec<AnalyzerResult> {
        Domain::ALL.into_iter().map(|d| result(d, score, bias)).collect()
    }

    #[test]
    fn test_bad_weights_rejected() {
        let mut weights = ConfluenceWeights::default();
        weights.smc = dec!(0.5);
        let err = ConfluenceCalculator::new(weights).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_uniform_scores_pass_through() {
        let calc = ConfluenceCalculator::new(ConfluenceWeights::default()).unwrap();
        let r = calc.calculate(&all(dec!(85), Bias::Bullish), Some(Direction::Buy));
        assert_eq!(r.score, dec!(85));
        assert!(r.meets_minimum);
        assert_eq!(r.quality, SignalQuality::High);
        assert_eq!(r.breakdown.len(), 10);
    }

    #[test]
    fn test_opposing_and_neutral_components() {
        let calc = ConfluenceCalculator::new(ConfluenceWeights::default()).unwrap();
        let mut results = all(dec!(80), Bias::Bullish);
        results[0].bias = Bias::Bearish; // smc, weight 0.20
        results[1].bias = Bias::Neutral; // technical, weight 0.15
        let r = calc.calculate(&results, Some(Direction::Buy));
        // 80 * (1 - 0.20 - 0.15) + 40 * 0.15 = 52 + 6
        assert_eq!(r.score, dec!(58));
        assert_eq!(r.breakdown[0].score, Decimal::ZERO);
        assert_eq!(r.breakdown[1].score, dec!(40));

        let undirected = calc.calculate(&results, None);
        assert_eq!(undirected.score, dec!(80));
    }

    #[test]
    fn test_missing_domain_scores_zero() {
        let calc = ConfluenceCalculator::new(ConfluenceWeights::default()).unwrap();
        let results = vec![result(Domain::Smc, dec!(100), Bias::Bullish)];
        let r = calc.calculate(&results, Some(Direction::Buy));
        assert_eq!(r.score, dec!(20));
        assert!(!r.meets_minimum);
    }

    #[test]
    fn test_penalty_recomputes_minimum() {
        let calc = ConfluenceCalculator::new(ConfluenceWeights::default()).unwrap();
        let r = calc.calculate(&all(dec!(90), Bias::Bearish), Some(Direction::Sell));
        assert!(r.meets_minimum);
        let r = calc.apply_penalty(r, dec!(15));
        assert_eq!(r.score, dec!(75));
        assert_eq!(r.penalty, dec!(15));
        assert!(!r.meets_minimum);
        assert_eq!(r.quality, SignalQuality::Good);
    }

    fn bias_strategy() -> impl Strategy<Value = Bias> {
        prop_oneof![Just(Bias::Bullish), Just(Bias::Bearish), Just(Bias::Neutral)]
    }

    proptest! {
        #[test]
        fn prop_score_bounded_and_minimum_consistent(
            scores in proptest::collection::vec(0u32..=100, 10),
            biases in proptest::collection::vec(bias_strategy(), 10),
            penalty in 0u32..=40,
        ) {
            let calc = ConfluenceCalculator::new(ConfluenceWeights::default()).unwrap();
            let results: Vec<AnalyzerResult> = Domain::ALL
                .into_iter()
                .zip(scores.iter().zip(biases.iter()))
                .map(|(d, (s, b))| result(d, Decimal::from(*s), *b))
                .collect();
            for direction in [None, Some(Direction::Buy), Some(Direction::Sell)] {
                let r = calc.apply_penalty(calc.calculate(&results, direction), Decimal::from(penalty));
                prop_assert!(r.score >= Decimal::ZERO && r.score <= dec!(100));
                prop_assert_eq!(r.meets_minimum, r.score >= dec!(80));
            }
        }
    }
}
