use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::constants::*;
use crate::types::context::EconomicEvent;
use crate::types::instrument::AssetClass;
use crate::types::{Domain, Timeframe};

// ---------------------------------------------------------------------------
// Top-level aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    pub app: AppConfig,
    pub data: DataConfig,
    pub analysis: AnalysisConfig,
    pub risk: RiskConfig,
    /// Scheduled events from `calendar.json` (optional file).
    #[serde(default)]
    pub calendar: Vec<EconomicEvent>,
}

// ---------------------------------------------------------------------------
// app.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: String,
    pub file_prefix: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub default_filter: String,
    pub stderr_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".into(),
            file_prefix: "engine.log".into(),
            default_filter: "market_signal_engine=info,warn".into(),
            stderr_targets: true,
        }
    }
}

// ---------------------------------------------------------------------------
// data.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// First enabled entry is the primary; the rest are backups in order.
    pub sources: Vec<SourceConfig>,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerSettings,
    pub cache: CacheConfig,
    pub timeframes: Vec<TimeframeFetch>,
    /// Bars fetched for each intermarket-related instrument (H1).
    pub related_bars: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            sources: vec![SourceConfig::default()],
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            cache: CacheConfig::default(),
            timeframes: Timeframe::ANALYSIS_SET
                .iter()
                .map(|&timeframe| TimeframeFetch {
                    timeframe,
                    bars: timeframe.default_bar_count(),
                })
                .collect(),
            related_bars: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// `{"values": [{"datetime": .., "open": "..", ..}]}`, newest first.
    #[default]
    Values,
    /// `[[open_time_ms, "o", "h", "l", "c", "v", ..], ..]`, oldest first.
    Klines,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub name: String,
    pub base_url: String,
    pub format: SourceFormat,
    pub api_key: Option<String>,
    pub enabled: bool,
    pub timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: "twelvedata".into(),
            base_url: "https://api.twelvedata.com".into(),
            format: SourceFormat::Values,
            api_key: None,
            enabled: true,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per source, including the first.
    pub max_attempts: u32,
    /// Delay before attempt `n` (1-based retry) is `base_delay_ms * n`.
    pub base_delay_ms: u64,
    /// Timeout raced against each individual attempt.
    pub attempt_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            attempt_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    /// Successful probes needed in half-open before closing.
    pub half_open_successes: u32,
    /// Concurrent probes admitted while half-open.
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 60,
            half_open_successes: 1,
            half_open_max_probes: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub sweep_interval_secs: u64,
    pub tiers: CacheTiers,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 2_000,
            sweep_interval_secs: 60,
            tiers: CacheTiers::default(),
        }
    }
}

/// TTLs in seconds for each cache tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheTiers {
    pub realtime_secs: u64,
    pub short_secs: u64,
    pub medium_secs: u64,
    pub long_secs: u64,
}

impl Default for CacheTiers {
    fn default() -> Self {
        Self {
            realtime_secs: 5,
            short_secs: 30,
            medium_secs: 300,
            long_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeframeFetch {
    pub timeframe: Timeframe,
    pub bars: usize,
}

// ---------------------------------------------------------------------------
// analysis.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub weights: ConfluenceWeights,
    pub thresholds: ThresholdConfig,
    pub lookbacks: LookbackConfig,
    pub indicators: IndicatorParams,
    /// Expected correlation between instrument pairs, keyed by symbol then
    /// related symbol. Entries merge over the built-in table.
    pub correlations: BTreeMap<String, BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConfluenceWeights {
    pub smc: Decimal,
    pub technical: Decimal,
    pub wyckoff: Decimal,
    pub elliott: Decimal,
    pub vsa: Decimal,
    pub market_profile: Decimal,
    pub order_flow: Decimal,
    pub intermarket: Decimal,
    pub fundamental: Decimal,
    pub sentiment: Decimal,
}

impl Default for ConfluenceWeights {
    fn default() -> Self {
        Self {
            smc: WEIGHT_SMC,
            technical: WEIGHT_TECHNICAL,
            wyckoff: WEIGHT_WYCKOFF,
            elliott: WEIGHT_ELLIOTT,
            vsa: WEIGHT_VSA,
            market_profile: WEIGHT_MARKET_PROFILE,
            order_flow: WEIGHT_ORDER_FLOW,
            intermarket: WEIGHT_INTERMARKET,
            fundamental: WEIGHT_FUNDAMENTAL,
            sentiment: WEIGHT_SENTIMENT,
        }
    }
}

impl ConfluenceWeights {
    #[must_use]
    pub fn weight(&self, domain: Domain) -> Decimal {
        match domain {
            Domain::Smc => self.smc,
            Domain::Technical => self.technical,
            Domain::Wyckoff => self.wyckoff,
            Domain::Elliott => self.elliott,
            Domain::Vsa => self.vsa,
            Domain::MarketProfile => self.market_profile,
            Domain::OrderFlow => self.order_flow,
            Domain::Intermarket => self.intermarket,
            Domain::Fundamental => self.fundamental,
            Domain::Sentiment => self.sentiment,
        }
    }

    #[must_use]
    pub fn sum(&self) -> Decimal {
        Domain::ALL.iter().map(|&d| self.weight(d)).sum()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub min_confluence: Decimal,
    /// Percent, 0-100.
    pub min_ai_confidence: Decimal,
    pub min_layers: usize,
    pub critical_layers: Vec<Domain>,
    pub kill_zone_penalty: Decimal,
    pub analysis_timeout_secs: u64,
    /// Minutes either side of a high-impact release that count as blackout.
    pub blackout_window_minutes: i64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            min_confluence: DEFAULT_MIN_CONFLUENCE,
            min_ai_confidence: DEFAULT_MIN_AI_CONFIDENCE,
            min_layers: DEFAULT_MIN_LAYERS,
            critical_layers: Domain::CRITICAL.to_vec(),
            kill_zone_penalty: KILL_ZONE_PENALTY,
            analysis_timeout_secs: DEFAULT_ANALYSIS_TIMEOUT_SECS,
            blackout_window_minutes: 30,
        }
    }
}

/// Per-analyzer history windows, in primary-timeframe bars unless noted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LookbackConfig {
    pub min_bars: usize,
    pub technical_min_bars: usize,
    /// Bars either side of a fractal swing point.
    pub swing_strength: usize,
    pub smc: usize,
    pub wyckoff: usize,
    pub elliott: usize,
    pub vsa: usize,
    pub market_profile: usize,
    /// Price bins in the volume profile.
    pub profile_bins: usize,
    pub order_flow: usize,
    pub intermarket: usize,
    /// Hours of news considered by the sentiment analyzer.
    pub news_hours: i64,
}

impl Default for LookbackConfig {
    fn default() -> Self {
        Self {
            min_bars: DEFAULT_MIN_BARS,
            technical_min_bars: TECHNICAL_MIN_BARS,
            swing_strength: 2,
            smc: 100,
            wyckoff: 100,
            elliott: 150,
            vsa: 50,
            market_profile: 120,
            profile_bins: 40,
            order_flow: 50,
            intermarket: 100,
            news_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndicatorParams {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub ema_trend: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_std: Decimal,
    pub atr_period: usize,
    pub hurst_max_lag: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            ema_fast: 20,
            ema_slow: 50,
            ema_trend: 200,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_std: dec!(2),
            atr_period: 14,
            hurst_max_lag: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// risk.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub account_balance: Decimal,
    /// Percent of balance risked per signal.
    pub risk_percent: Decimal,
    pub max_risk_percent: Decimal,
    pub atr_multiplier: Decimal,
    pub sl_pips: SlPipRanges,
    /// Pips added beyond a swing or order-block level when it sets the stop.
    pub structure_buffer_pips: Decimal,
    pub tp_ratios: Vec<Decimal>,
    /// Percent of the position closed at each take-profit; sums to 100.
    pub partial_closes: Vec<Decimal>,
    pub min_reward_ratio: Decimal,
    pub signal_expiry_hours: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            account_balance: dec!(10_000),
            risk_percent: DEFAULT_RISK_PERCENT,
            max_risk_percent: MAX_RISK_PERCENT,
            atr_multiplier: DEFAULT_ATR_SL_MULTIPLIER,
            sl_pips: SlPipRanges::default(),
            structure_buffer_pips: dec!(2),
            tp_ratios: DEFAULT_TP_RATIOS.to_vec(),
            partial_closes: DEFAULT_PARTIAL_CLOSES.to_vec(),
            min_reward_ratio: MIN_REWARD_RATIO,
            signal_expiry_hours: DEFAULT_SIGNAL_EXPIRY_HOURS,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PipRange {
    pub min: Decimal,
    pub max: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlPipRanges {
    pub forex: PipRange,
    pub metal: PipRange,
    pub index: PipRange,
}

impl Default for SlPipRanges {
    fn default() -> Self {
        Self {
            forex: PipRange {
                min: dec!(10),
                max: dec!(50),
            },
            metal: PipRange {
                min: dec!(30),
                max: dec!(300),
            },
            index: PipRange {
                min: dec!(20),
                max: dec!(200),
            },
        }
    }
}

impl SlPipRanges {
    #[must_use]
    pub fn for_class(&self, class: AssetClass) -> PipRange {
        match class {
            AssetClass::MajorPair | AssetClass::MinorPair => self.forex,
            AssetClass::Metal => self.metal,
            AssetClass::Index => self.index,
        }
    }
}
