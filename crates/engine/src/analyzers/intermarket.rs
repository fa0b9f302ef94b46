//! Cross-asset confirmation: what related instruments imply for this one,
//! given how the pair is expected to correlate.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use super::indicators::{correlation, from_f64, log_returns, to_f64};
use super::{bias_from_votes, Analyzer, AnalysisInput, AnalyzerResult, DomainFindings};
use crate::config::LookbackConfig;
use crate::errors::EngineResult;
use crate::types::market_data::closes;
use crate::types::{Bias, Domain};

/// Bars over which the related instrument's recent move is measured.
const MOVE_BARS: usize = 20;
/// Minimum overlapping bars for a correlation reading.
const MIN_OVERLAP: usize = 30;
/// Moves smaller than this fraction are treated as flat.
const FLAT_MOVE: f64 = 0.001;

/// Built-in expected correlations; config entries override these.
const DEFAULT_CORRELATIONS: &[(&str, &str, f64)] = &[
    ("EURUSD", "GBPUSD", 0.85),
    ("EURUSD", "USDCHF", -0.90),
    ("EURUSD", "XAUUSD", 0.45),
    ("EURUSD", "USDCAD", -0.60),
    ("GBPUSD", "EURGBP", -0.50),
    ("GBPUSD", "XAUUSD", 0.40),
    ("USDJPY", "SPX500", 0.50),
    ("USDJPY", "XAUUSD", -0.45),
    ("USDJPY", "EURJPY", 0.75),
    ("USDCHF", "XAUUSD", -0.45),
    ("AUDUSD", "NZDUSD", 0.90),
    ("AUDUSD", "XAUUSD", 0.55),
    ("AUDUSD", "SPX500", 0.50),
    ("USDCAD", "AUDUSD", -0.55),
    ("NZDUSD", "SPX500", 0.45),
    ("EURJPY", "GBPJPY", 0.85),
    ("GBPJPY", "USDJPY", 0.75),
    ("AUDJPY", "SPX500", 0.65),
    ("AUDJPY", "USDJPY", 0.70),
    ("EURAUD", "AUDUSD", -0.70),
    ("EURCHF", "USDCHF", 0.50),
    ("GBPCHF", "USDCHF", 0.50),
    ("CADJPY", "USDJPY", 0.70),
    ("CADJPY", "USDCAD", -0.50),
    ("XAUUSD", "XAGUSD", 0.85),
    ("XAGUSD", "EURUSD", 0.40),
    ("US30", "SPX500", 0.95),
    ("NAS100", "SPX500", 0.93),
    ("NAS100", "US30", 0.85),
    ("NAS100", "USDJPY", 0.40),
    ("GER40", "SPX500", 0.80),
    ("GER40", "EURUSD", 0.30),
    ("UK100", "SPX500", 0.75),
    ("UK100", "GBPUSD", -0.30),
];

/// Symmetric expected-correlation lookup.
#[derive(Debug, Clone, Default)]
pub struct CorrelationTable {
    pairs: BTreeMap<(String, String), f64>,
}

impl CorrelationTable {
    fn key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    /// Built-in table with `overrides` applied on top.
    pub fn with_overrides(overrides: &BTreeMap<String, BTreeMap<String, f64>>) -> Self {
        let mut pairs: BTreeMap<(String, String), f64> = DEFAULT_CORRELATIONS
            .iter()
            .map(|(a, b, c)| (Self::key(a, b), *c))
            .collect();
        for (symbol, related) in overrides {
            for (other, value) in related {
                pairs.insert(Self::key(symbol, other), value.clamp(-1.0, 1.0));
            }
        }
        Self { pairs }
    }

    pub fn expected(&self, a: &str, b: &str) -> Option<f64> {
        self.pairs.get(&Self::key(a, b)).copied()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedReading {
    pub symbol: String,
    pub expected_correlation: Decimal,
    /// Measured correlation of log returns; `None` with too little overlap.
    pub measured_correlation: Option<Decimal>,
    /// Fractional change over the last [`MOVE_BARS`] bars.
    pub recent_change: Decimal,
    pub implied_bias: Bias,
    /// Measured correlation has broken from the expected sign.
    pub decoupled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntermarketFindings {
    pub related: Vec<RelatedReading>,
    /// Instruments whose implied direction disagrees with this one's own move.
    pub divergences: Vec<String>,
}

pub struct IntermarketAnalyzer {
    min_bars: usize,
    lookback: usize,
    table: CorrelationTable,
}

impl IntermarketAnalyzer {
    pub fn new(
        lookbacks: &LookbackConfig,
        overrides: &BTreeMap<String, BTreeMap<String, f64>>,
    ) -> Self {
        Self {
            min_bars: lookbacks.min_bars,
            lookback: lookbacks.intermarket,
            table: CorrelationTable::with_overrides(overrides),
        }
    }
}

fn recent_change(prices: &[Decimal]) -> f64 {
    let n = prices.len();
    if n < 2 {
        return 0.0;
    }
    let first = prices[n.saturating_sub(MOVE_BARS + 1)];
    let last = prices[n - 1];
    if first.is_zero() {
        return 0.0;
    }
    to_f64((last - first) / first)
}

fn move_bias(change: f64) -> Bias {
    if change > FLAT_MOVE {
        Bias::Bullish
    } else if change < -FLAT_MOVE {
        Bias::Bearish
    } else {
        Bias::Neutral
    }
}

impl Analyzer for IntermarketAnalyzer {
    fn domain(&self) -> Domain {
        Domain::Intermarket
    }

    fn analyze(&self, input: &AnalysisInput) -> EngineResult<AnalyzerResult> {
        let Some(candles) = input.primary_window(self.min_bars, self.lookback) else {
            return Ok(AnalyzerResult::empty(Domain::Intermarket));
        };
        let own_closes = closes(candles);
        let own_returns = log_returns(&own_closes);
        let own_bias = move_bias(recent_change(&own_closes));
        let symbol = input.instrument.symbol;

        let mut readings = Vec::new();
        for related in input.instrument.related {
            let Some(series) = input.related.get(*related) else {
                continue;
            };
            if series.len() < MIN_OVERLAP {
                continue;
            }
            let start = series.len().saturating_sub(self.lookback);
            let rel_closes = closes(&series[start..]);
            let rel_returns = log_returns(&rel_closes);
            let measured = correlation(&own_returns, &rel_returns);

            // Fall back to the measured relationship for unlisted pairs.
            let Some(expected) = self.table.expected(symbol, related).or(measured) else {
                continue;
            };
            let change = recent_change(&rel_closes);
            let implied = match move_bias(change) {
                Bias::Neutral => Bias::Neutral,
                b if expected >= 0.0 => b,
                b => b.opposite(),
            };
            let decoupled = measured.is_some_and(|m| expected.abs() >= 0.3 && m * expected < 0.0);

            readings.push(RelatedReading {
                symbol: (*related).to_string(),
                expected_correlation: from_f64(expected).round_dp(2),
                measured_correlation: measured.map(|m| from_f64(m).round_dp(3)),
                recent_change: from_f64(change).round_dp(5),
                implied_bias: implied,
                decoupled,
            });
        }

        let divergences: Vec<String> = readings
            .iter()
            .filter(|r| own_bias != Bias::Neutral && r.implied_bias == own_bias.opposite())
            .map(|r| r.symbol.clone())
            .collect();

        // Coupled, strongly correlated instruments carry the most weight.
        let votes: Vec<(Bias, Decimal)> = readings
            .iter()
            .map(|r| {
                let weight = if r.decoupled {
                    r.expected_correlation.abs() * dec!(0.25)
                } else {
                    r.expected_correlation.abs()
                };
                (r.implied_bias, weight)
            })
            .collect();
        let (bias, net) = bias_from_votes(&votes, dec!(0.2));

        let score = if readings.is_empty() {
            Decimal::ZERO
        } else if bias == Bias::Neutral {
            dec!(20)
        } else {
            let confirming = readings.iter().filter(|r| r.implied_bias == bias).count();
            let own_agrees = own_bias == bias;
            dec!(30)
                + net.abs() * dec!(40)
                + Decimal::from(confirming.min(3)) * dec!(5)
                + if own_agrees { dec!(10) } else { Decimal::ZERO }
                - Decimal::from(divergences.len().min(2)) * dec!(5)
        };

        Ok(AnalyzerResult::new(
            Domain::Intermarket,
            score,
            bias,
            DomainFindings::Intermarket(IntermarketFindings {
                related: readings,
                divergences,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn analyzer() -> IntermarketAnalyzer {
        IntermarketAnalyzer::new(&LookbackConfig::default(), &BTreeMap::new())
    }

    fn findings(result: &AnalyzerResult) -> &IntermarketFindings {
        let DomainFindings::Intermarket(f) = &result.findings else {
            panic!("expected intermarket findings");
        };
        f
    }

    #[test]
    fn test_table_is_symmetric_and_overridable() {
        let table = CorrelationTable::with_overrides(&BTreeMap::new());
        assert_eq!(table.expected("EURUSD", "USDCHF"), Some(-0.90));
        assert_eq!(table.expected("USDCHF", "EURUSD"), Some(-0.90));

        let overrides = BTreeMap::from([(
            "USDCHF".to_string(),
            BTreeMap::from([("EURUSD".to_string(), -0.5)]),
        )]);
        let table = CorrelationTable::with_overrides(&overrides);
        assert_eq!(table.expected("EURUSD", "USDCHF"), Some(-0.5));
    }

    #[test]
    fn test_no_related_data_is_neutral_zero() {
        let result = analyzer().analyze(&input_with(rising(120))).unwrap();
        assert_eq!(result.bias, Bias::Neutral);
        assert_eq!(result.score, Decimal::ZERO);
        assert!(findings(&result).related.is_empty());
    }

    #[test]
    fn test_inverse_pair_falling_confirms_rally() {
        // EURUSD rising, GBPUSD rising (positive), USDCHF falling (negative).
        let mut input = input_with(rising(120));
        input.related.insert("GBPUSD".into(), rising(120));
        input.related.insert("USDCHF".into(), falling(120));

        let result = analyzer().analyze(&input).unwrap();
        let f = findings(&result);
        assert_eq!(f.related.len(), 2);
        assert!(f.related.iter().all(|r| r.implied_bias == Bias::Bullish));
        assert!(f.divergences.is_empty());
        assert_eq!(result.bias, Bias::Bullish);
        assert!(result.score >= dec!(60));
    }

    #[test]
    fn test_divergence_flagged() {
        let mut input = input_with(rising(120));
        input.related.insert("GBPUSD".into(), falling(120));
        let result = analyzer().analyze(&input).unwrap();
        assert_eq!(findings(&result).divergences, vec!["GBPUSD".to_string()]);
        assert_eq!(result.bias, Bias::Bearish);
    }
}
