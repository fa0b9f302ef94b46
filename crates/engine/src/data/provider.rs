//! Market data provider with failover, retries, circuit breaking and caching.
//!
//! Sources are tried in configured order (primary first). Each source gets
//! its own retry budget (linear backoff, per-attempt timeout) behind its own
//! circuit breaker; only once every source has exhausted its budget does the
//! caller see [`EngineError::AllSourcesFailed`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::source::{CandleSource, HttpCandleSource};
use crate::config::{DataConfig, TimeframeFetch};
use crate::errors::{EngineError, EngineResult};
use crate::resilience::{
    retry_with_backoff, Cache, CacheTier, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerMetrics, RetryPolicy,
};
use crate::types::instrument::normalize_symbol;
use crate::types::market_data::normalize_series;
use crate::types::{CandleSeries, MultiTimeframeData, Timeframe};

pub type CandleCache = Cache<CandleSeries>;

struct SourceSlot {
    source: Arc<dyn CandleSource>,
    breaker: CircuitBreaker,
}

pub struct MarketDataProvider {
    sources: Vec<SourceSlot>,
    cache: Arc<CandleCache>,
    retry: RetryPolicy,
    timeframes: Vec<TimeframeFetch>,
}

impl MarketDataProvider {
    /// Provider over explicit sources, primary first.
    pub fn new(
        sources: Vec<Arc<dyn CandleSource>>,
        config: &DataConfig,
        cache: Arc<CandleCache>,
    ) -> Self {
        let breaker_config = CircuitBreakerConfig::from_settings(&config.circuit_breaker);
        let sources = sources
            .into_iter()
            .map(|source| SourceSlot {
                breaker: CircuitBreaker::new(source.name().to_string(), breaker_config.clone()),
                source,
            })
            .collect();

        Self {
            sources,
            cache,
            retry: RetryPolicy::from_config(&config.retry),
            timeframes: config.timeframes.clone(),
        }
    }

    /// Provider over the enabled HTTP sources in `config`.
    pub fn from_config(config: &DataConfig, cache: Arc<CandleCache>) -> EngineResult<Self> {
        let sources = config
            .sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| HttpCandleSource::new(s.clone()).map(|src| Arc::new(src) as Arc<dyn CandleSource>))
            .collect::<EngineResult<Vec<_>>>()?;

        if sources.is_empty() {
            return Err(EngineError::Config("no enabled data sources".into()));
        }

        info!(
            sources = sources.len(),
            primary = %sources[0].name(),
            "market data provider initialised"
        );
        Ok(Self::new(sources, config, cache))
    }

    pub fn cache(&self) -> &Arc<CandleCache> {
        &self.cache
    }

    pub fn breaker_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        self.sources.iter().map(|s| s.breaker.metrics()).collect()
    }

    fn cache_tier(tf: Timeframe) -> CacheTier {
        if tf.is_higher_tf() {
            CacheTier::Medium
        } else {
            CacheTier::Short
        }
    }

    /// Validated candles for one (symbol, timeframe), ascending by time.
    pub async fn get_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: usize,
    ) -> EngineResult<CandleSeries> {
        let symbol = normalize_symbol(symbol);
        let cache_key = format!("ohlcv:{symbol}:{timeframe}:{bars}");

        if let Some(cached) = self.cache.get(&cache_key) {
            return Ok(cached);
        }

        let start = Instant::now();
        let mut total_attempts = 0u32;
        let mut last_error = EngineError::Config("no data sources configured".into());

        for slot in &self.sources {
            let operation = format!("{} {symbol} {timeframe}", slot.source.name());
            let sym = symbol.as_str();
            let result = retry_with_backoff(&self.retry, &operation, move |_| {
                slot.breaker.execute(move || async move {
                    let raw = slot.source.fetch(sym, timeframe, bars).await?;
                    normalize_series(raw)
                })
            })
            .await;

            match result {
                Ok(candles) => {
                    debug!(
                        source = %slot.source.name(),
                        symbol = %symbol,
                        timeframe = %timeframe,
                        candles = candles.len(),
                        latency_ms = start.elapsed().as_millis() as u64,
                        "OHLCV fetched and cached"
                    );
                    self.cache
                        .insert(cache_key, candles.clone(), Self::cache_tier(timeframe));
                    return Ok(candles);
                }
                Err(exhausted) => {
                    warn!(
                        source = %slot.source.name(),
                        symbol = %symbol,
                        timeframe = %timeframe,
                        attempts = exhausted.attempts,
                        error = %exhausted.last_error,
                        "source exhausted, failing over"
                    );
                    total_attempts += exhausted.attempts;
                    last_error = exhausted.last_error;
                }
            }
        }

        Err(EngineError::AllSourcesFailed {
            symbol,
            timeframe: timeframe.to_string(),
            attempts: total_attempts,
            last_error: last_error.to_string(),
        })
    }

    /// Fetch the configured timeframe set concurrently. Failures are recorded
    /// per timeframe instead of failing the call.
    pub async fn get_multi_timeframe(&self, symbol: &str) -> MultiTimeframeData {
        let symbol = normalize_symbol(symbol);
        let sym = symbol.as_str();
        let fetches = self.timeframes.iter().map(|tf| async move {
            (tf.timeframe, self.get_ohlcv(sym, tf.timeframe, tf.bars).await)
        });

        let mut data = MultiTimeframeData::new(symbol.clone());
        for (tf, result) in join_all(fetches).await {
            match result {
                Ok(candles) => {
                    data.series.insert(tf, candles);
                }
                Err(e) => {
                    warn!(symbol = %symbol, timeframe = %tf, error = %e, "timeframe unavailable");
                    data.errors.insert(tf, e.to_string());
                }
            }
        }
        data
    }

    /// Fetch one timeframe for several symbols concurrently, dropping failures.
    pub async fn get_many(
        &self,
        symbols: &[&str],
        timeframe: Timeframe,
        bars: usize,
    ) -> HashMap<String, CandleSeries> {
        let fetches = symbols.iter().map(|&s| async move {
            (s.to_string(), self.get_ohlcv(s, timeframe, bars).await)
        });

        join_all(fetches)
            .await
            .into_iter()
            .filter_map(|(symbol, result)| match result {
                Ok(candles) => Some((symbol, candles)),
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "related series unavailable");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheTiers, RetryConfig};
    use crate::data::source::StaticCandleSource;
    use crate::resilience::CircuitState;
    use crate::types::Candle;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn candles(n: i64) -> Vec<Candle> {
        // Newest first, to exercise sorting.
        (0..n)
            .rev()
            .map(|i| {
                let close = dec!(1.105) + Decimal::from(i) / dec!(10000);
                Candle {
                    timestamp: i * 3600,
                    open: close - dec!(0.0005),
                    high: close + dec!(0.001),
                    low: close - dec!(0.001),
                    close,
                    volume: dec!(100),
                }
            })
            .collect()
    }

    struct FailingSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CandleSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }
        async fn fetch(&self, _: &str, _: Timeframe, _: usize) -> EngineResult<Vec<Candle>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::SourceUnavailable {
                source_name: "failing".into(),
            })
        }
    }

    struct MalformedSource;

    #[async_trait]
    impl CandleSource for MalformedSource {
        fn name(&self) -> &str {
            "malformed"
        }
        async fn fetch(&self, _: &str, _: Timeframe, _: usize) -> EngineResult<Vec<Candle>> {
            Ok(vec![Candle {
                timestamp: 0,
                open: dec!(1),
                high: dec!(0.5),
                low: dec!(0.9),
                close: dec!(1),
                volume: dec!(1),
            }])
        }
    }

    fn data_config() -> DataConfig {
        DataConfig {
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 500,
                attempt_timeout_ms: 2_000,
            },
            ..DataConfig::default()
        }
    }

    fn cache() -> Arc<CandleCache> {
        Arc::new(Cache::new(100, CacheTiers::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_to_backup_within_budget() {
        let failing = Arc::new(FailingSource {
            calls: AtomicU32::new(0),
        });
        let backup = StaticCandleSource::new("backup").with_series("EURUSD", Timeframe::H1, candles(50));
        let provider = MarketDataProvider::new(
            vec![failing.clone(), Arc::new(backup)],
            &data_config(),
            cache(),
        );

        let start = tokio::time::Instant::now();
        let series = provider.get_ohlcv("EURUSD", Timeframe::H1, 50).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(series.len(), 50);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 3);
        assert!(series.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_sources_failed() {
        let provider = MarketDataProvider::new(
            vec![
                Arc::new(FailingSource {
                    calls: AtomicU32::new(0),
                }),
                Arc::new(StaticCandleSource::new("empty")),
            ],
            &data_config(),
            cache(),
        );

        let err = provider
            .get_ohlcv("EURUSD", Timeframe::H1, 50)
            .await
            .unwrap_err();
        match err {
            EngineError::AllSourcesFailed {
                symbol, attempts, ..
            } => {
                assert_eq!(symbol, "EURUSD");
                assert_eq!(attempts, 6);
            }
            other => panic!("expected AllSourcesFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_data_skips_to_next_source() {
        let backup = StaticCandleSource::new("backup").with_series("EURUSD", Timeframe::H1, candles(10));
        let provider = MarketDataProvider::new(
            vec![Arc::new(MalformedSource), Arc::new(backup)],
            &data_config(),
            cache(),
        );
        let series = provider.get_ohlcv("EURUSD", Timeframe::H1, 10).await.unwrap();
        assert_eq!(series.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_call_served_from_cache() {
        let failing = Arc::new(FailingSource {
            calls: AtomicU32::new(0),
        });
        let backup = StaticCandleSource::new("backup").with_series("EURUSD", Timeframe::H1, candles(20));
        let shared_cache = cache();
        let provider = MarketDataProvider::new(
            vec![failing.clone(), Arc::new(backup)],
            &data_config(),
            shared_cache.clone(),
        );

        provider.get_ohlcv("eur/usd", Timeframe::H1, 20).await.unwrap();
        provider.get_ohlcv("EURUSD", Timeframe::H1, 20).await.unwrap();
        assert_eq!(failing.calls.load(Ordering::SeqCst), 3);
        assert_eq!(shared_cache.stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_on_repeatedly_failing_primary() {
        let failing = Arc::new(FailingSource {
            calls: AtomicU32::new(0),
        });
        let backup = StaticCandleSource::new("backup")
            .with_series("EURUSD", Timeframe::H1, candles(20))
            .with_series("GBPUSD", Timeframe::H1, candles(20));
        let mut config = data_config();
        config.circuit_breaker.failure_threshold = 3;
        let provider = MarketDataProvider::new(vec![failing.clone(), Arc::new(backup)], &config, cache());

        provider.get_ohlcv("EURUSD", Timeframe::H1, 20).await.unwrap();
        assert_eq!(provider.breaker_metrics()[0].state, CircuitState::Open);

        // Open breaker short-circuits: no further calls reach the primary.
        provider.get_ohlcv("GBPUSD", Timeframe::H1, 20).await.unwrap();
        assert_eq!(failing.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_timeframe_partial_results() {
        let source = StaticCandleSource::new("mem")
            .with_series("EURUSD", Timeframe::H1, candles(300))
            .with_series("EURUSD", Timeframe::H4, candles(200));
        let mut config = data_config();
        config.retry.max_attempts = 1;
        let provider = MarketDataProvider::new(vec![Arc::new(source)], &config, cache());

        let data = provider.get_multi_timeframe("EURUSD").await;
        assert_eq!(data.get(Timeframe::H1).len(), 300);
        assert_eq!(data.get(Timeframe::H4).len(), 200);
        assert!(data.get(Timeframe::D1).is_empty());
        assert!(data.errors.contains_key(&Timeframe::D1));
        assert!(data.errors.contains_key(&Timeframe::M15));
    }
}
