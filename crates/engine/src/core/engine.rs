//! Analysis orchestrator.
//!
//! One pass: fetch multi-timeframe data, related series and market context
//! concurrently, fan the ten analyzers out onto the blocking pool, then run
//! the AI ensemble, validator, confluence and kill-zone penalty over the
//! joined results. `generate_signal` adds the admission gates and hands
//! surviving passes to the [`SignalGenerator`].
//!
//! Every pass works on its own immutable [`AnalysisInput`] snapshot; the
//! candle cache inside the data provider is the only shared mutable state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::ai_ensemble::{AiAssessment, AiEnsemble};
use super::backtester::{self, BacktestConfig, BacktestReport, TradePlan};
use super::confluence::ConfluenceCalculator;
use super::kill_zone::{KillZone, KillZoneManager};
use super::risk_manager::RiskManager;
use super::signal_generator::{SignalGenerator, SignalInputs};
use super::validator::MultiLayerValidator;
use crate::analyzers::{build_suite, AnalysisInput, Analyzer, AnalyzerResult};
use crate::config::{validate::validate_config, EngineConfig};
use crate::data::{CandleCache, MarketDataProvider};
use crate::errors::{EngineError, EngineResult};
use crate::resilience::{safe_execute, with_timeout, CacheStats, CircuitBreakerMetrics};
use crate::types::{
    Blackout, Candle, ConfluenceResult, ContextProvider, Direction, Instrument, MarketContext,
    MultiTimeframeData, RejectionReason, Signal, StaticContextProvider, Timeframe,
    ValidationReport,
};

// ═══════════════════════════════════════════════════════════════════════════
// Pass outputs
// ═══════════════════════════════════════════════════════════════════════════

/// Everything one analysis pass concluded about a symbol.
#[derive(Debug, Clone, Serialize)]
pub struct MarketAnalysis {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub price: Option<Decimal>,
    /// One result per domain, in [`crate::types::Domain::ALL`] order.
    pub results: Vec<AnalyzerResult>,
    pub ai: AiAssessment,
    pub direction: Option<Direction>,
    /// Weighted direction vote in [-1, 1].
    #[serde(with = "rust_decimal::serde::str")]
    pub net_vote: Decimal,
    /// Absent when no direction could be resolved.
    pub validation: Option<ValidationReport>,
    pub confluence: ConfluenceResult,
    pub kill_zone: Option<KillZone>,
    pub blackout: Option<Blackout>,
    /// Timeframes that could not be fetched, with the fetch error.
    pub data_errors: BTreeMap<Timeframe, String>,
    pub analyzed_at: DateTime<Utc>,
}

/// Result of `generate_signal`: a signal, or the reason there is none.
#[derive(Debug, Clone, Serialize)]
pub struct SignalOutcome {
    pub signal: Option<Signal>,
    pub analysis: MarketAnalysis,
    pub reason: Option<RejectionReason>,
}

impl SignalOutcome {
    fn rejected(analysis: MarketAnalysis, reason: RejectionReason) -> Self {
        Self {
            signal: None,
            analysis,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub sources: Vec<CircuitBreakerMetrics>,
    pub cache: CacheStats,
}

// ═══════════════════════════════════════════════════════════════════════════
// SignalEngine
// ═══════════════════════════════════════════════════════════════════════════

pub struct SignalEngine {
    config: EngineConfig,
    provider: Arc<MarketDataProvider>,
    context: Arc<dyn ContextProvider>,
    analyzers: Vec<Arc<dyn Analyzer>>,
    ai: AiEnsemble,
    confluence: ConfluenceCalculator,
    validator: MultiLayerValidator,
    kill_zones: KillZoneManager,
    signals: SignalGenerator,
}

impl SignalEngine {
    /// Engine over an injected data provider and context feed. Fails when
    /// the configuration does not validate.
    pub fn new(
        config: EngineConfig,
        provider: Arc<MarketDataProvider>,
        context: Arc<dyn ContextProvider>,
    ) -> Result<Self> {
        validate_config(&config)?;

        let analysis = &config.analysis;
        let confluence = ConfluenceCalculator::new(analysis.weights.clone())
            .context("failed to build confluence calculator")?;
        let signals = SignalGenerator::new(
            RiskManager::new(config.risk.clone()),
            analysis.lookbacks.swing_strength,
            analysis.indicators.atr_period,
        );

        info!(
            min_confluence = %analysis.thresholds.min_confluence,
            min_ai_confidence = %analysis.thresholds.min_ai_confidence,
            min_layers = analysis.thresholds.min_layers,
            timeout_s = analysis.thresholds.analysis_timeout_secs,
            "signal engine initialised"
        );

        Ok(Self {
            analyzers: build_suite(analysis),
            ai: AiEnsemble::new(analysis.weights.clone()),
            validator: MultiLayerValidator::from_thresholds(&analysis.thresholds),
            kill_zones: KillZoneManager::new(analysis.thresholds.kill_zone_penalty),
            confluence,
            signals,
            provider,
            context,
            config,
        })
    }

    /// Engine over the HTTP sources and static calendar in `config`, with a
    /// fresh candle cache.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let cache = Arc::new(CandleCache::from_config(&config.data.cache));
        let provider = MarketDataProvider::from_config(&config.data, cache)
            .context("failed to build market data provider")?;
        let context = StaticContextProvider::from_calendar(config.calendar.clone());
        Self::new(config, Arc::new(provider), Arc::new(context))
    }

    /// Replace the analyzer suite.
    #[must_use]
    pub fn with_analyzers(mut self, analyzers: Vec<Arc<dyn Analyzer>>) -> Self {
        self.analyzers = analyzers;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CandleCache> {
        self.provider.cache()
    }

    pub fn health(&self) -> EngineHealth {
        EngineHealth {
            sources: self.provider.breaker_metrics(),
            cache: self.provider.cache().stats(),
        }
    }

    fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.config.analysis.thresholds.analysis_timeout_secs)
    }

    // -----------------------------------------------------------------------
    // Analysis
    // -----------------------------------------------------------------------

    pub async fn analyze(&self, symbol: &str) -> Result<MarketAnalysis> {
        self.analyze_at(symbol, Utc::now()).await
    }

    /// Full analysis pass as of `now`.
    pub async fn analyze_at(&self, symbol: &str, now: DateTime<Utc>) -> Result<MarketAnalysis> {
        let (_, analysis) = self.run_pass(symbol, now).await?;
        Ok(analysis)
    }

    async fn run_pass(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<(Arc<AnalysisInput>, MarketAnalysis)> {
        let instrument = Instrument::lookup(symbol)?;
        let start = Instant::now();

        let operation = format!("analysis of {}", instrument.symbol);
        let (input, results) = with_timeout(&operation, self.analysis_timeout(), async {
            let input = Arc::new(self.collect_input(instrument, now).await);
            let results = self.run_analyzers(&input).await;
            Ok((input, results))
        })
        .await
        .with_context(|| format!("analysis failed for {}", instrument.symbol))?;

        let analysis = self.evaluate(&input, results);
        debug!(
            symbol = %analysis.symbol,
            direction = ?analysis.direction,
            confluence = %analysis.confluence.score,
            ai_confidence = %analysis.ai.confidence,
            latency_ms = start.elapsed().as_millis() as u64,
            "analysis pass complete"
        );
        Ok((input, analysis))
    }

    /// Candles, related series and context, fetched concurrently.
    async fn collect_input(
        &self,
        instrument: &'static Instrument,
        now: DateTime<Utc>,
    ) -> AnalysisInput {
        let (data, related, context) = tokio::join!(
            self.provider.get_multi_timeframe(instrument.symbol),
            self.provider.get_many(
                instrument.related,
                Timeframe::PRIMARY,
                self.config.data.related_bars
            ),
            safe_execute(
                "market context",
                MarketContext::default(),
                self.context.context(instrument)
            ),
        );

        debug!(
            symbol = %instrument.symbol,
            timeframes = data.series.len(),
            failed_timeframes = data.errors.len(),
            related = related.len(),
            "analysis input collected"
        );

        AnalysisInput {
            instrument,
            data,
            related,
            context,
            now,
        }
    }

    /// Every analyzer on the blocking pool, all-settled. An error or panic
    /// becomes a neutral failed result for that domain.
    async fn run_analyzers(&self, input: &Arc<AnalysisInput>) -> Vec<AnalyzerResult> {
        let tasks = self.analyzers.iter().map(|analyzer| {
            let analyzer = Arc::clone(analyzer);
            let input = Arc::clone(input);
            let domain = analyzer.domain();
            async move {
                match tokio::task::spawn_blocking(move || analyzer.analyze(&input)).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => {
                        warn!(domain = %domain, error = %e, "analyzer failed");
                        AnalyzerResult::failed(domain, e.to_string())
                    }
                    Err(e) => {
                        error!(domain = %domain, error = %e, "analyzer task aborted");
                        AnalyzerResult::failed(domain, format!("analyzer aborted: {e}"))
                    }
                }
            }
        });

        let results = join_all(tasks).await;
        let failed = results.iter().filter(|r| r.error.is_some()).count();
        debug!(
            symbol = %input.instrument.symbol,
            analyzers = results.len(),
            failed,
            "analyzers joined"
        );
        results
    }

    /// Synchronous back half of a pass: AI, direction, validation,
    /// confluence and the kill-zone penalty.
    fn evaluate(&self, input: &AnalysisInput, results: Vec<AnalyzerResult>) -> MarketAnalysis {
        let thresholds = &self.config.analysis.thresholds;
        let candles = input.data.primary();

        let ai = self.ai.assess(candles, &results);
        let (direction, net_vote) = self.signals.resolve_direction(&results, &ai);
        let validation = direction.map(|d| self.validator.validate(&results, d));

        let confluence = self.confluence.calculate(&results, direction);
        let confluence = self
            .confluence
            .apply_penalty(confluence, self.kill_zones.penalty(input.now));

        MarketAnalysis {
            symbol: input.instrument.symbol.to_string(),
            price: input.data.current_price(),
            ai,
            direction,
            net_vote,
            validation,
            confluence,
            kill_zone: self.kill_zones.classify(input.now),
            blackout: input.context.active_blackout(
                input.instrument,
                input.now,
                thresholds.blackout_window_minutes,
            ),
            data_errors: input.data.errors.clone(),
            analyzed_at: input.now,
            results,
        }
    }

    // -----------------------------------------------------------------------
    // Signal admission
    // -----------------------------------------------------------------------

    pub async fn generate_signal(&self, symbol: &str) -> Result<SignalOutcome> {
        self.generate_signal_at(symbol, Utc::now()).await
    }

    pub async fn generate_signal_at(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<SignalOutcome> {
        let (input, analysis) = self.run_pass(symbol, now).await?;
        let outcome = self.decide(&input, analysis);

        match (&outcome.signal, &outcome.reason) {
            (Some(signal), _) => info!(
                symbol = %signal.symbol,
                id = %signal.id,
                quality = ?signal.quality,
                "signal emitted"
            ),
            (None, Some(reason)) => info!(
                symbol = %outcome.analysis.symbol,
                reason = %reason,
                "signal rejected"
            ),
            (None, None) => {}
        }
        Ok(outcome)
    }

    /// Gates in order: data, direction, AI ensemble reasons, layer count,
    /// critical layers, then the risk plan.
    fn decide(&self, input: &AnalysisInput, analysis: MarketAnalysis) -> SignalOutcome {
        let thresholds = &self.config.analysis.thresholds;
        let candles = input.data.primary();

        if candles.is_empty() {
            let reason = input
                .data
                .errors
                .get(&Timeframe::PRIMARY)
                .cloned()
                .unwrap_or_else(|| format!("no {} candles", Timeframe::PRIMARY));
            return SignalOutcome::rejected(analysis, RejectionReason::InsufficientData { reason });
        }

        let (Some(direction), Some(validation)) = (analysis.direction, analysis.validation.as_ref())
        else {
            return SignalOutcome::rejected(analysis, RejectionReason::NoDirection);
        };

        let ai_reasons = self.ai.rejection_reasons(
            &analysis.ai,
            &analysis.confluence,
            analysis.blackout.as_ref(),
            thresholds,
        );
        if let Some(reason) = ai_reasons.into_iter().next() {
            return SignalOutcome::rejected(analysis, reason);
        }

        if validation.passed_count < thresholds.min_layers {
            let reason = RejectionReason::InsufficientLayers {
                passed: validation.passed_count,
                minimum: thresholds.min_layers,
            };
            return SignalOutcome::rejected(analysis, reason);
        }
        if !validation.critical_layers_passed {
            let reason = RejectionReason::CriticalLayersFailed {
                layers: validation.failed_critical.clone(),
            };
            return SignalOutcome::rejected(analysis, reason);
        }

        let inputs = SignalInputs {
            instrument: input.instrument,
            candles,
            results: &analysis.results,
            ai: &analysis.ai,
            confluence: &analysis.confluence,
            validation,
            kill_zone: analysis.kill_zone,
            now: input.now,
        };
        match self.signals.generate(&inputs, direction, analysis.net_vote) {
            Ok(signal) => SignalOutcome {
                signal: Some(signal),
                analysis,
                reason: None,
            },
            Err(reason) => SignalOutcome::rejected(analysis, reason),
        }
    }

    /// `generate_signal` for every symbol concurrently, in input order.
    pub async fn scan(&self, symbols: &[&str]) -> Vec<(String, Result<SignalOutcome>)> {
        let tasks = symbols
            .iter()
            .map(|&symbol| async move { (symbol.to_string(), self.generate_signal(symbol).await) });
        let outcomes = join_all(tasks).await;

        let emitted = outcomes
            .iter()
            .filter(|(_, r)| matches!(r, Ok(o) if o.signal.is_some()))
            .count();
        info!(symbols = outcomes.len(), emitted, "scan complete");
        outcomes
    }

    // -----------------------------------------------------------------------
    // Backtesting
    // -----------------------------------------------------------------------

    /// Replays `candles` (primary timeframe, ascending) through the same
    /// analyzers and gates. Each bar is evaluated on the trailing window the
    /// live engine would fetch; the configured calendar still applies.
    pub fn backtest(
        &self,
        symbol: &str,
        candles: &[Candle],
        config: &BacktestConfig,
    ) -> EngineResult<BacktestReport> {
        let instrument = Instrument::lookup(symbol)?;
        if config.max_bars_in_trade == 0 {
            return Err(EngineError::Validation(
                "max_bars_in_trade must be at least 1".into(),
            ));
        }
        if candles.windows(2).any(|w| w[1].timestamp <= w[0].timestamp) {
            return Err(EngineError::Validation(
                "backtest candles must be in strictly ascending time order".into(),
            ));
        }
        let window = self.primary_bars();
        let context = MarketContext {
            events: self.config.calendar.clone(),
            ..MarketContext::default()
        };

        let report = backtester::run(candles, config, |history| {
            let start = history.len().saturating_sub(window);
            let last = history.last()?;
            let now = DateTime::from_timestamp(last.timestamp, 0)?;

            let data = MultiTimeframeData::new(instrument.symbol)
                .with_series(Timeframe::PRIMARY, history[start..].to_vec());
            let mut input = AnalysisInput::new(instrument, data, now);
            input.context = context.clone();

            let results = self
                .analyzers
                .iter()
                .map(|a| {
                    a.analyze(&input)
                        .unwrap_or_else(|e| AnalyzerResult::failed(a.domain(), e.to_string()))
                })
                .collect();
            let analysis = self.evaluate(&input, results);
            self.decide(&input, analysis)
                .signal
                .map(|s| TradePlan::from_signal(&s, instrument))
        });

        info!(
            symbol = %instrument.symbol,
            bars = candles.len(),
            trades = report.total_trades,
            win_rate = %report.win_rate,
            profit_factor = %report.profit_factor,
            "backtest complete"
        );
        Ok(report)
    }

    fn primary_bars(&self) -> usize {
        self.config
            .data
            .timeframes
            .iter()
            .find(|t| t.timeframe == Timeframe::PRIMARY)
            .map_or(Timeframe::PRIMARY.default_bar_count(), |t| t.bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::{rising, T0};
    use crate::config::{DataConfig, RetryConfig, TimeframeFetch};
    use crate::data::{CandleSource, StaticCandleSource};
    use crate::types::{Bias, Domain, EconomicEvent, EventImpact};
    use async_trait::async_trait;

    fn data_config() -> DataConfig {
        DataConfig {
            retry: RetryConfig {
                max_attempts: 1,
                base_delay_ms: 1,
                attempt_timeout_ms: 1_000,
            },
            timeframes: vec![TimeframeFetch {
                timeframe: Timeframe::H1,
                bars: 300,
            }],
            ..DataConfig::default()
        }
    }

    fn engine_with(source: Arc<dyn CandleSource>, calendar: Vec<EconomicEvent>) -> SignalEngine {
        let config = EngineConfig {
            data: data_config(),
            calendar: calendar.clone(),
            ..EngineConfig::default()
        };
        let cache = Arc::new(CandleCache::from_config(&config.data.cache));
        let provider = MarketDataProvider::new(vec![source], &config.data, cache);
        SignalEngine::new(
            config,
            Arc::new(provider),
            Arc::new(StaticContextProvider::from_calendar(calendar)),
        )
        .unwrap()
    }

    fn engine_over(candles: Vec<Candle>) -> SignalEngine {
        let source = StaticCandleSource::new("mem").with_series("EURUSD", Timeframe::H1, candles);
        engine_with(Arc::new(source), Vec::new())
    }

    fn at_hour(hours_after_t0: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(T0 + hours_after_t0 * 3600, 0).unwrap()
    }

    struct FailingAnalyzer;

    impl Analyzer for FailingAnalyzer {
        fn domain(&self) -> Domain {
            Domain::Vsa
        }

        fn analyze(&self, _input: &AnalysisInput) -> EngineResult<AnalyzerResult> {
            Err(EngineError::Analysis {
                domain: "vsa".into(),
                reason: "boom".into(),
            })
        }
    }

    struct PanickingAnalyzer;

    impl Analyzer for PanickingAnalyzer {
        fn domain(&self) -> Domain {
            Domain::Elliott
        }

        fn analyze(&self, _input: &AnalysisInput) -> EngineResult<AnalyzerResult> {
            panic!("wave count overflow")
        }
    }

    struct SlowSource;

    #[async_trait]
    impl CandleSource for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }

        async fn fetch(&self, _: &str, _: Timeframe, _: usize) -> EngineResult<Vec<Candle>> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(rising(10))
        }
    }

    #[tokio::test]
    async fn test_rising_series_reads_bullish() {
        let engine = engine_over(rising(250));
        let analysis = engine.analyze_at("EURUSD", at_hour(260)).await.unwrap();

        assert_eq!(analysis.symbol, "EURUSD");
        assert_eq!(analysis.results.len(), 10);
        let domains: Vec<Domain> = analysis.results.iter().map(|r| r.domain).collect();
        assert_eq!(domains, Domain::ALL.to_vec());

        let technical = &analysis.results[1];
        assert_eq!(technical.bias, Bias::Bullish);
        assert!(technical.score > Decimal::ZERO);
        assert_ne!(analysis.direction, Some(Direction::Sell));
        assert!(analysis.confluence.score <= Decimal::from(100));
        assert!(analysis.data_errors.is_empty());
    }

    #[tokio::test]
    async fn test_short_history_has_no_direction() {
        let engine = engine_over(rising(10));
        let outcome = engine
            .generate_signal_at("EURUSD", at_hour(20))
            .await
            .unwrap();

        assert!(outcome.signal.is_none());
        assert_eq!(outcome.reason, Some(RejectionReason::NoDirection));
        for result in &outcome.analysis.results {
            assert_eq!(result.score, Decimal::ZERO);
            assert_eq!(result.bias, Bias::Neutral);
        }
        assert!(outcome.analysis.validation.is_none());
    }

    #[tokio::test]
    async fn test_missing_data_is_rejection_not_error() {
        let engine = engine_with(Arc::new(StaticCandleSource::new("empty")), Vec::new());
        let outcome = engine
            .generate_signal_at("EURUSD", at_hour(20))
            .await
            .unwrap();

        assert!(matches!(
            outcome.reason,
            Some(RejectionReason::InsufficientData { .. })
        ));
        assert!(outcome.analysis.data_errors.contains_key(&Timeframe::H1));
    }

    #[tokio::test]
    async fn test_unsupported_symbol_errors() {
        let engine = engine_over(rising(10));
        let err = engine.analyze("DOGEUSD").await.unwrap_err();
        assert!(err.to_string().contains("unsupported symbol"), "got: {err}");
    }

    #[tokio::test]
    async fn test_analyzer_failures_are_isolated() {
        let mut analyzers = build_suite(&EngineConfig::default().analysis);
        analyzers[3] = Arc::new(PanickingAnalyzer);
        analyzers[4] = Arc::new(FailingAnalyzer);
        let engine = engine_over(rising(250)).with_analyzers(analyzers);

        let analysis = engine.analyze_at("EURUSD", at_hour(260)).await.unwrap();
        assert_eq!(analysis.results.len(), 10);

        let elliott = &analysis.results[3];
        assert_eq!(elliott.domain, Domain::Elliott);
        assert_eq!(elliott.bias, Bias::Neutral);
        assert!(elliott.error.as_deref().unwrap().contains("aborted"));

        let vsa = &analysis.results[4];
        assert_eq!(vsa.score, Decimal::ZERO);
        assert!(vsa.error.as_deref().unwrap().contains("boom"));

        // The other eight still ran.
        assert_eq!(analysis.results[1].bias, Bias::Bullish);
    }

    #[tokio::test]
    async fn test_blackout_recorded_on_analysis() {
        let event = EconomicEvent {
            time: at_hour(260) + chrono::Duration::minutes(10),
            currency: "EUR".into(),
            impact: EventImpact::High,
            title: "ECB Rate Decision".into(),
        };
        let source = StaticCandleSource::new("mem").with_series("EURUSD", Timeframe::H1, rising(250));
        let engine = engine_with(Arc::new(source), vec![event]);

        let outcome = engine
            .generate_signal_at("EURUSD", at_hour(260))
            .await
            .unwrap();
        let blackout = outcome.analysis.blackout.as_ref().unwrap();
        assert_eq!(blackout.minutes_to_event, 10);
        assert!(outcome.signal.is_none());
    }

    #[tokio::test]
    async fn test_kill_zone_penalty_applied_outside_windows() {
        let engine = engine_over(rising(250));
        // T0 is midnight UTC: hour 260 is 20:00, outside every window.
        let analysis = engine.analyze_at("EURUSD", at_hour(260)).await.unwrap();
        assert!(analysis.kill_zone.is_none());
        assert_eq!(analysis.confluence.penalty, Decimal::from(15));

        // Hour 248 is 08:00, inside London.
        let analysis = engine.analyze_at("EURUSD", at_hour(248)).await.unwrap();
        assert_eq!(analysis.kill_zone, Some(KillZone::London));
        assert_eq!(analysis.confluence.penalty, Decimal::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_analysis_timeout() {
        let mut config = EngineConfig {
            data: data_config(),
            ..EngineConfig::default()
        };
        config.data.retry.attempt_timeout_ms = 5_000;
        config.analysis.thresholds.analysis_timeout_secs = 1;
        let cache = Arc::new(CandleCache::from_config(&config.data.cache));
        let provider = MarketDataProvider::new(vec![Arc::new(SlowSource)], &config.data, cache);
        let engine = SignalEngine::new(
            config,
            Arc::new(provider),
            Arc::new(StaticContextProvider::default()),
        )
        .unwrap();

        let err = engine.analyze("EURUSD").await.unwrap_err();
        assert!(format!("{err:#}").contains("timed out"), "got: {err:#}");
    }

    #[tokio::test]
    async fn test_scan_and_health() {
        let engine = engine_over(rising(250));
        let outcomes = engine.scan(&["EURUSD", "NOPE"]).await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].0, "EURUSD");
        assert!(outcomes[0].1.is_ok());
        assert!(outcomes[1].1.is_err());

        let health = engine.health();
        assert_eq!(health.sources.len(), 1);
        assert_eq!(health.sources[0].name, "mem");
        assert!(health.cache.misses > 0);
        assert!(health.cache.size > 0);
    }

    #[test]
    fn test_backtest_replays_history() {
        let engine = engine_over(Vec::new());
        let config = BacktestConfig {
            warmup: 200,
            ..BacktestConfig::default()
        };
        let report = engine.backtest("EURUSD", &rising(320), &config).unwrap();
        assert_eq!(report.total_trades, report.trades.len());
        assert_eq!(report.wins + report.losses, report.total_trades);

        assert!(engine.backtest("NOPE", &rising(10), &config).is_err());
    }

    #[test]
    fn test_backtest_rejects_unordered_history_and_zero_hold() {
        let engine = engine_over(Vec::new());
        let mut candles = rising(50);
        candles.swap(10, 11);
        let err = engine
            .backtest("EURUSD", &candles, &BacktestConfig::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(ref m) if m.contains("ascending")));

        let config = BacktestConfig {
            max_bars_in_trade: 0,
            ..BacktestConfig::default()
        };
        let err = engine.backtest("EURUSD", &rising(50), &config).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_invalid_config_blocks_construction() {
        let mut config = EngineConfig::default();
        config.analysis.weights.smc = Decimal::from(1);
        let cache = Arc::new(CandleCache::from_config(&config.data.cache));
        let provider = MarketDataProvider::new(Vec::new(), &config.data, cache);
        let result = SignalEngine::new(
            config,
            Arc::new(provider),
            Arc::new(StaticContextProvider::default()),
        );
        assert!(result.is_err());
    }
}
