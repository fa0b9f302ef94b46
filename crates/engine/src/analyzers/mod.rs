//! The ten analysis methodologies.
//!
//! Every analyzer is a pure, synchronous function of an [`AnalysisInput`]
//! snapshot. Below its minimum history it returns an empty result (score 0,
//! neutral) instead of an error, so "not enough bars" never aborts a pass.

pub mod elliott;
pub mod fibonacci;
pub mod fundamental;
pub mod indicators;
pub mod intermarket;
pub mod market_profile;
pub mod order_flow;
pub mod sentiment;
pub mod smc;
pub mod swings;
pub mod technical;
pub mod vsa;
pub mod wyckoff;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::AnalysisConfig;
use crate::errors::EngineResult;
use crate::types::{
    clamp_score, Bias, Candle, CandleSeries, Domain, Instrument, MarketContext, MultiTimeframeData,
};

pub use elliott::{ElliottAnalyzer, ElliottFindings};
pub use fundamental::{FundamentalAnalyzer, FundamentalFindings};
pub use intermarket::{IntermarketAnalyzer, IntermarketFindings};
pub use market_profile::{MarketProfileAnalyzer, MarketProfileFindings};
pub use order_flow::{OrderFlowAnalyzer, OrderFlowFindings};
pub use sentiment::{SentimentAnalyzer, SentimentFindings};
pub use smc::{SmcAnalyzer, SmcFindings};
pub use technical::{TechnicalAnalyzer, TechnicalFindings};
pub use vsa::{VsaAnalyzer, VsaFindings};
pub use wyckoff::{WyckoffAnalyzer, WyckoffFindings};

/// Immutable snapshot one analysis pass works on.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub instrument: &'static Instrument,
    pub data: MultiTimeframeData,
    /// Primary-timeframe series of related instruments, by symbol.
    pub related: HashMap<String, CandleSeries>,
    pub context: MarketContext,
    pub now: DateTime<Utc>,
}

impl AnalysisInput {
    pub fn new(instrument: &'static Instrument, data: MultiTimeframeData, now: DateTime<Utc>) -> Self {
        Self {
            instrument,
            data,
            related: HashMap::new(),
            context: MarketContext::default(),
            now,
        }
    }

    /// Last `lookback` primary candles, or `None` below `min_bars`.
    pub fn primary_window(&self, min_bars: usize, lookback: usize) -> Option<&[Candle]> {
        let candles = self.data.primary();
        if candles.len() < min_bars.max(1) {
            return None;
        }
        let start = candles.len().saturating_sub(lookback.max(min_bars));
        Some(&candles[start..])
    }
}

/// Domain-specific findings, one variant per analyzer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainFindings {
    Empty,
    Technical(TechnicalFindings),
    Smc(SmcFindings),
    Wyckoff(WyckoffFindings),
    Elliott(ElliottFindings),
    Vsa(VsaFindings),
    MarketProfile(MarketProfileFindings),
    OrderFlow(OrderFlowFindings),
    Intermarket(IntermarketFindings),
    Fundamental(FundamentalFindings),
    Sentiment(SentimentFindings),
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzerResult {
    pub domain: Domain,
    #[serde(with = "rust_decimal::serde::str")]
    pub score: Decimal,
    pub bias: Bias,
    pub findings: DomainFindings,
    /// Set when the analyzer failed and this is a stand-in neutral result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalyzerResult {
    /// Score is clamped to [0, 100].
    pub fn new(domain: Domain, score: Decimal, bias: Bias, findings: DomainFindings) -> Self {
        Self {
            domain,
            score: clamp_score(score.round_dp(2)),
            bias,
            findings,
            error: None,
        }
    }

    /// Neutral zero-score result for insufficient history.
    pub fn empty(domain: Domain) -> Self {
        Self::new(domain, Decimal::ZERO, Bias::Neutral, DomainFindings::Empty)
    }

    /// Neutral stand-in for an analyzer that errored or panicked.
    pub fn failed(domain: Domain, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::empty(domain)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.findings, DomainFindings::Empty)
    }
}

pub trait Analyzer: Send + Sync {
    fn domain(&self) -> Domain;

    fn analyze(&self, input: &AnalysisInput) -> EngineResult<AnalyzerResult>;
}

/// All ten analyzers configured from `config`, in [`Domain::ALL`] order.
pub fn build_suite(config: &AnalysisConfig) -> Vec<Arc<dyn Analyzer>> {
    vec![
        Arc::new(SmcAnalyzer::new(&config.lookbacks)),
        Arc::new(TechnicalAnalyzer::new(&config.lookbacks, &config.indicators)),
        Arc::new(WyckoffAnalyzer::new(&config.lookbacks, &config.indicators)),
        Arc::new(ElliottAnalyzer::new(&config.lookbacks)),
        Arc::new(VsaAnalyzer::new(&config.lookbacks)),
        Arc::new(MarketProfileAnalyzer::new(&config.lookbacks)),
        Arc::new(OrderFlowAnalyzer::new(&config.lookbacks)),
        Arc::new(IntermarketAnalyzer::new(&config.lookbacks, &config.correlations)),
        Arc::new(FundamentalAnalyzer::new(
            &config.lookbacks,
            config.thresholds.blackout_window_minutes,
        )),
        Arc::new(SentimentAnalyzer::new(&config.lookbacks, &config.indicators)),
    ]
}

/// Net of weighted votes in [-1, 1] → bias with a neutral deadband.
pub(crate) fn bias_from_votes(votes: &[(Bias, Decimal)], deadband: Decimal) -> (Bias, Decimal) {
    let total: Decimal = votes.iter().map(|(_, w)| *w).sum();
    if total.is_zero() {
        return (Bias::Neutral, Decimal::ZERO);
    }
    let net: Decimal = votes.iter().map(|(b, w)| b.sign() * *w).sum::<Decimal>() / total;
    (Bias::from_net(net, deadband), net)
}
