//! Upstream OHLCV sources.
//!
//! Two wire formats are understood:
//!   - `values`: `{"values": [{"datetime": "2024-01-02 13:00:00", "open": "1.1",
//!     ..}], "status": "ok"}`, newest first, errors as `{"status": "error",
//!     "code": 429, "message": ..}`
//!   - `klines`: `[[open_time_ms, "o", "h", "l", "c", "v", ..], ..]`, oldest
//!     first
//!
//! Sources only fetch and parse. Validation, sorting, retries and caching live
//! in [`super::provider::MarketDataProvider`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{SourceConfig, SourceFormat};
use crate::errors::{EngineError, EngineResult};
use crate::types::instrument::{AssetClass, Instrument};
use crate::types::{Candle, Timeframe};

/// Fetch capability per (symbol, timeframe).
#[async_trait]
pub trait CandleSource: Send + Sync {
    fn name(&self) -> &str;

    /// Up to `bars` most recent candles, in any order.
    async fn fetch(&self, symbol: &str, timeframe: Timeframe, bars: usize)
        -> EngineResult<Vec<Candle>>;
}

// ═══════════════════════════════════════════════════════════════════════════
// HTTP source
// ═══════════════════════════════════════════════════════════════════════════

pub struct HttpCandleSource {
    client: reqwest::Client,
    config: SourceConfig,
}

impl HttpCandleSource {
    pub fn new(config: SourceConfig) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { client, config })
    }

    fn request(&self, symbol: &str, timeframe: Timeframe, bars: usize) -> reqwest::RequestBuilder {
        let base = self.config.base_url.trim_end_matches('/');
        let bars = bars.to_string();
        match self.config.format {
            SourceFormat::Values => {
                let mut params = vec![
                    ("symbol", values_symbol(symbol)),
                    ("interval", timeframe.as_rest_interval().to_string()),
                    ("outputsize", bars),
                    ("timezone", "UTC".to_string()),
                ];
                if let Some(key) = &self.config.api_key {
                    params.push(("apikey", key.clone()));
                }
                self.client.get(format!("{base}/time_series")).query(&params)
            }
            SourceFormat::Klines => self
                .client
                .get(format!("{base}/api/v3/klines"))
                .query(&[
                    ("symbol", symbol.to_string()),
                    ("interval", timeframe.as_klines_interval().to_string()),
                    ("limit", bars),
                ]),
        }
    }
}

#[async_trait]
impl CandleSource for HttpCandleSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: usize,
    ) -> EngineResult<Vec<Candle>> {
        let start = Instant::now();
        let resp = self
            .request(symbol, timeframe, bars)
            .send()
            .await
            .map_err(|e| {
                warn!(source = %self.config.name, error = %e, "request failed");
                if e.is_timeout() {
                    EngineError::Timeout {
                        operation: format!("{} {symbol} {timeframe}", self.config.name),
                        timeout_ms: self.config.timeout_ms,
                    }
                } else {
                    EngineError::SourceUnavailable {
                        source_name: self.config.name.clone(),
                    }
                }
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!(source = %self.config.name, "rate limited");
            return Err(EngineError::RateLimited {
                source_name: self.config.name.clone(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(source = %self.config.name, %status, body = %body, "non-success status");
            return Err(EngineError::SourceUnavailable {
                source_name: self.config.name.clone(),
            });
        }

        let payload: Value = resp.json().await.map_err(|e| EngineError::Parse {
            source_name: self.config.name.clone(),
            reason: e.to_string(),
        })?;

        let candles = match self.config.format {
            SourceFormat::Values => parse_values_payload(&self.config.name, &payload)?,
            SourceFormat::Klines => parse_klines_payload(&self.config.name, &payload)?,
        };

        debug!(
            source = %self.config.name,
            symbol,
            timeframe = %timeframe,
            candles = candles.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "candles fetched"
        );

        Ok(candles)
    }
}

/// `EURUSD` → `EUR/USD` for pair-style instruments; indices pass through.
fn values_symbol(symbol: &str) -> String {
    match Instrument::lookup(symbol) {
        Ok(inst) if inst.class != AssetClass::Index => format!("{}/{}", inst.base, inst.quote),
        _ => symbol.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Payload parsing
// ---------------------------------------------------------------------------

/// Parse a JSON string or number as `Decimal`; anything else is `None`.
fn parse_decimal(v: &Value) -> Option<Decimal> {
    v.as_str()
        .and_then(|s| s.trim().parse::<Decimal>().ok())
        .or_else(|| v.as_f64().and_then(Decimal::from_f64))
}

fn parse_datetime(s: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|dt| dt.and_utc().timestamp())
}

pub(crate) fn parse_values_payload(source: &str, payload: &Value) -> EngineResult<Vec<Candle>> {
    let parse_err = |reason: String| EngineError::Parse {
        source_name: source.to_string(),
        reason,
    };

    if payload.get("status").and_then(Value::as_str) == Some("error") {
        let code = payload.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(if code == 429 {
            EngineError::RateLimited {
                source_name: source.to_string(),
            }
        } else {
            EngineError::SourceUnavailable {
                source_name: format!("{source} ({code}: {message})"),
            }
        });
    }

    let values = payload
        .get("values")
        .and_then(Value::as_array)
        .ok_or_else(|| parse_err("missing 'values' array".into()))?;

    values
        .iter()
        .map(|row| {
            let field = |name: &str| -> EngineResult<Decimal> {
                row.get(name)
                    .and_then(parse_decimal)
                    .ok_or_else(|| parse_err(format!("bad or missing '{name}'")))
            };
            let timestamp = row
                .get("datetime")
                .and_then(Value::as_str)
                .and_then(parse_datetime)
                .ok_or_else(|| parse_err("bad or missing 'datetime'".into()))?;
            Ok(Candle {
                timestamp,
                open: field("open")?,
                high: field("high")?,
                low: field("low")?,
                close: field("close")?,
                // Spot FX feeds omit volume.
                volume: row
                    .get("volume")
                    .and_then(parse_decimal)
                    .unwrap_or(Decimal::ZERO),
            })
        })
        .collect()
}

pub(crate) fn parse_klines_payload(source: &str, payload: &Value) -> EngineResult<Vec<Candle>> {
    let parse_err = |reason: String| EngineError::Parse {
        source_name: source.to_string(),
        reason,
    };

    let rows = payload
        .as_array()
        .ok_or_else(|| parse_err("klines response not an array".into()))?;

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let items = row
                .as_array()
                .filter(|a| a.len() >= 6)
                .ok_or_else(|| parse_err(format!("kline {i} is not a 6+ element array")))?;
            let num = |idx: usize| -> EngineResult<Decimal> {
                parse_decimal(&items[idx])
                    .ok_or_else(|| parse_err(format!("kline {i} field {idx} not numeric")))
            };
            let open_time_ms = items[0]
                .as_i64()
                .ok_or_else(|| parse_err(format!("kline {i} open time not an integer")))?;
            Ok(Candle {
                timestamp: open_time_ms / 1000,
                open: num(1)?,
                high: num(2)?,
                low: num(3)?,
                close: num(4)?,
                volume: num(5)?,
            })
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// Static source
// ═══════════════════════════════════════════════════════════════════════════

/// In-memory source keyed by (symbol, timeframe). Serves tests, backtests and
/// replay runs.
#[derive(Default)]
pub struct StaticCandleSource {
    name: String,
    series: HashMap<(String, Timeframe), Vec<Candle>>,
}

impl StaticCandleSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            series: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_series(mut self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) -> Self {
        self.series.insert((symbol.to_string(), timeframe), candles);
        self
    }
}

#[async_trait]
impl CandleSource for StaticCandleSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: usize,
    ) -> EngineResult<Vec<Candle>> {
        let series = self
            .series
            .get(&(symbol.to_string(), timeframe))
            .ok_or_else(|| EngineError::SourceUnavailable {
                source_name: format!("{} has no {symbol} {timeframe}", self.name),
            })?;
        let start = series.len().saturating_sub(bars);
        Ok(series[start..].to_vec())
    }
}
