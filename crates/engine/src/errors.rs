use thiserror::Error;

/// Typed error hierarchy for the signal engine.
///
/// Data sources, resilience primitives and analyzers return these variants
/// directly; orchestration code wraps them with `anyhow::Context`.
#[derive(Error, Debug)]
pub enum EngineError {
    // -- Data fetch ---------------------------------------------------------
    #[error("data source unavailable: {source_name}")]
    SourceUnavailable { source_name: String },

    #[error("rate limited by {source_name}")]
    RateLimited { source_name: String },

    #[error("failed to parse response from {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("invalid market data: {reason}")]
    InvalidData { reason: String },

    #[error("all sources failed for {symbol} {timeframe} after {attempts} attempts: {last_error}")]
    AllSourcesFailed {
        symbol: String,
        timeframe: String,
        attempts: u32,
        last_error: String,
    },

    // -- Resilience ---------------------------------------------------------
    #[error("circuit open: {name}")]
    CircuitOpen { name: String },

    // -- Analysis -----------------------------------------------------------
    #[error("{domain} analysis failed: {reason}")]
    Analysis { domain: String, reason: String },

    #[error("insufficient data: need {required} bars, have {available}")]
    InsufficientData { required: usize, available: usize },

    // -- Validation ---------------------------------------------------------
    #[error("validation error: {0}")]
    Validation(String),

    // -- Configuration ------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unsupported symbol: {0}")]
    UnsupportedSymbol(String),

    // -- Forwarded errors ---------------------------------------------------
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether a retry against the same source may succeed.
    ///
    /// Parse and validation failures are deterministic for a given payload,
    /// so retrying the same source is pointless; the provider moves on to the
    /// next source instead.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. }
                | Self::RateLimited { .. }
                | Self::Timeout { .. }
                | Self::Reqwest(_)
                | Self::Io(_)
        )
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
