pub mod types;
pub mod validate;

pub use types::*;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::types::context::EconomicEvent;

/// Load and merge all config JSON files into a single [`EngineConfig`],
/// then apply environment variable overrides and validate.
///
/// Expected directory layout:
/// ```text
/// config/
///   app.json
///   data.json
///   analysis.json
///   risk.json
///   calendar.json   (optional)
/// ```
///
/// # Environment variable overrides
///
/// | Env Var                         | Config Field                              |
/// |---------------------------------|-------------------------------------------|
/// | `SIGNAL_MIN_CONFLUENCE`         | `analysis.thresholds.min_confluence`      |
/// | `SIGNAL_MIN_AI_CONFIDENCE`      | `analysis.thresholds.min_ai_confidence`   |
/// | `SIGNAL_MIN_LAYERS`             | `analysis.thresholds.min_layers`          |
/// | `SIGNAL_ANALYSIS_TIMEOUT_SECS`  | `analysis.thresholds.analysis_timeout_secs` |
/// | `SIGNAL_RISK_PERCENT`           | `risk.risk_percent`                       |
/// | `SIGNAL_ACCOUNT_BALANCE`        | `risk.account_balance`                    |
/// | `SIGNAL_PRIMARY_SOURCE_URL`     | `data.sources[0].base_url`                |
/// | `SIGNAL_DATA_API_KEY`           | `data.sources[*].api_key` (when unset)    |
/// | `SIGNAL_LOG_DIR`                | `app.logging.log_dir`                     |
pub fn load_config(config_dir: &Path) -> Result<EngineConfig> {
    let app: AppConfig = read_json(config_dir, "app.json")?;
    let data: DataConfig = read_json(config_dir, "data.json")?;
    let analysis: AnalysisConfig = read_json(config_dir, "analysis.json")?;
    let risk: RiskConfig = read_json(config_dir, "risk.json")?;

    // Calendar is optional.
    let calendar: Vec<EconomicEvent> = if config_dir.join("calendar.json").exists() {
        read_json(config_dir, "calendar.json")?
    } else {
        Vec::new()
    };

    let mut config = EngineConfig {
        app,
        data,
        analysis,
        risk,
        calendar,
    };

    apply_env_overrides(&mut config);
    validate::validate_config(&config)?;

    Ok(config)
}

fn read_json<T: DeserializeOwned>(config_dir: &Path, name: &str) -> Result<T> {
    let path = config_dir.join(name);
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}

// ---------------------------------------------------------------------------
// Environment variable overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides to the loaded config.
///
/// Only non-empty env vars take effect. Parse failures are skipped and the
/// JSON value remains.
fn apply_env_overrides(config: &mut EngineConfig) {
    // -- Thresholds ----------------------------------------------------------
    if let Some(val) = env_decimal("SIGNAL_MIN_CONFLUENCE") {
        info!(%val, "env override: SIGNAL_MIN_CONFLUENCE");
        config.analysis.thresholds.min_confluence = val;
    }

    if let Some(val) = env_decimal("SIGNAL_MIN_AI_CONFIDENCE") {
        info!(%val, "env override: SIGNAL_MIN_AI_CONFIDENCE");
        config.analysis.thresholds.min_ai_confidence = val;
    }

    if let Some(val) = env_parse::<usize>("SIGNAL_MIN_LAYERS") {
        info!(val, "env override: SIGNAL_MIN_LAYERS");
        config.analysis.thresholds.min_layers = val;
    }

    if let Some(val) = env_parse::<u64>("SIGNAL_ANALYSIS_TIMEOUT_SECS") {
        info!(val, "env override: SIGNAL_ANALYSIS_TIMEOUT_SECS");
        config.analysis.thresholds.analysis_timeout_secs = val;
    }

    // -- Risk ----------------------------------------------------------------
    if let Some(val) = env_decimal("SIGNAL_RISK_PERCENT") {
        info!(%val, "env override: SIGNAL_RISK_PERCENT");
        config.risk.risk_percent = val;
    }

    if let Some(val) = env_decimal("SIGNAL_ACCOUNT_BALANCE") {
        info!(%val, "env override: SIGNAL_ACCOUNT_BALANCE");
        config.risk.account_balance = val;
    }

    // -- Data sources --------------------------------------------------------
    if let Some(val) = env_string("SIGNAL_PRIMARY_SOURCE_URL") {
        if let Some(primary) = config.data.sources.first_mut() {
            info!("env override: SIGNAL_PRIMARY_SOURCE_URL");
            primary.base_url = val;
        }
    }

    if let Some(key) = env_string("SIGNAL_DATA_API_KEY") {
        info!("env override: SIGNAL_DATA_API_KEY");
        for source in config.data.sources.iter_mut().filter(|s| s.api_key.is_none()) {
            source.api_key = Some(key.clone());
        }
    }

    // -- Logging -------------------------------------------------------------
    if let Some(val) = env_string("SIGNAL_LOG_DIR") {
        info!("env override: SIGNAL_LOG_DIR");
        config.app.logging.log_dir = val;
    }
}

/// Read a non-empty env var as a `String`.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Read a non-empty env var and parse it as `T`.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

/// Read a non-empty env var and parse it as `Decimal`.
fn env_decimal(key: &str) -> Option<Decimal> {
    env_string(key).and_then(|v| Decimal::from_str(&v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Domain, Timeframe};
    use rust_decimal_macros::dec;
    use serial_test::serial;
    use std::path::PathBuf;

    const ENV_KEYS: &[&str] = &[
        "SIGNAL_MIN_CONFLUENCE",
        "SIGNAL_MIN_AI_CONFIDENCE",
        "SIGNAL_MIN_LAYERS",
        "SIGNAL_ANALYSIS_TIMEOUT_SECS",
        "SIGNAL_RISK_PERCENT",
        "SIGNAL_ACCOUNT_BALANCE",
        "SIGNAL_PRIMARY_SOURCE_URL",
        "SIGNAL_DATA_API_KEY",
        "SIGNAL_LOG_DIR",
    ];

    fn clean_signal_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    fn project_config_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("config")
    }

    // -----------------------------------------------------------------------
    // Helper: write a minimal set of config JSON files to a temp dir.
    // -----------------------------------------------------------------------

    fn write_test_configs(dir: &Path) {
        std::fs::write(
            dir.join("app.json"),
            r#"{ "logging": { "log_dir": "logs" } }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("data.json"),
            r#"{
                "sources": [
                    { "name": "primary", "base_url": "https://primary.example.com", "format": "values" },
                    { "name": "backup", "base_url": "https://backup.example.com", "format": "klines" }
                ],
                "retry": { "max_attempts": 2, "base_delay_ms": 100, "attempt_timeout_ms": 2000 },
                "timeframes": [
                    { "timeframe": "H1", "bars": 300 },
                    { "timeframe": "H4", "bars": 200 }
                ]
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("analysis.json"),
            r#"{
                "thresholds": { "min_confluence": "75", "critical_layers": ["smc", "technical", "fundamental"] }
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("risk.json"),
            r#"{ "account_balance": "25000", "risk_percent": "1.5" }"#,
        )
        .unwrap();
    }

    #[test]
    #[serial]
    fn test_load_config_from_files() {
        clean_signal_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.data.sources.len(), 2);
        assert_eq!(config.data.sources[1].format, SourceFormat::Klines);
        assert_eq!(config.data.retry.max_attempts, 2);
        assert_eq!(config.data.timeframes[1].timeframe, Timeframe::H4);
        assert_eq!(config.analysis.thresholds.min_confluence, dec!(75));
        assert_eq!(
            config.analysis.thresholds.critical_layers,
            vec![Domain::Smc, Domain::Technical, Domain::Fundamental]
        );
        assert_eq!(config.risk.account_balance, dec!(25000));
        // Defaults fill the rest.
        assert_eq!(config.risk.tp_ratios, vec![dec!(1.5), dec!(2.5), dec!(4.0)]);
        assert!(config.calendar.is_empty());
        clean_signal_env();
    }

    #[test]
    #[serial]
    fn test_load_project_config() {
        clean_signal_env();
        let config = load_config(&project_config_dir()).unwrap();
        assert!(!config.data.sources.is_empty());
        assert_eq!(config.analysis.weights.sum(), dec!(1.00));
        clean_signal_env();
    }

    #[test]
    #[serial]
    fn test_missing_file_errors() {
        clean_signal_env();
        let tmp = tempfile::tempdir().unwrap();
        let err = load_config(tmp.path()).unwrap_err();
        assert!(
            err.to_string().contains("failed to read config file"),
            "expected file-not-found error, got: {err}"
        );
        assert!(err.to_string().contains(&tmp.path().join("app.json").display().to_string()));
    }

    #[test]
    #[serial]
    fn test_malformed_file_error_names_path() {
        clean_signal_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        std::fs::write(tmp.path().join("risk.json"), "{ \"account_balance\": ").unwrap();

        let err = load_config(tmp.path()).unwrap_err().to_string();
        let expected = tmp.path().join("risk.json");
        assert!(err.contains("failed to parse config file"), "got: {err}");
        assert!(err.contains(&expected.display().to_string()), "got: {err}");
    }

    #[test]
    #[serial]
    fn test_optional_calendar_loaded() {
        clean_signal_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        std::fs::write(
            tmp.path().join("calendar.json"),
            r#"[{ "time": "2025-03-07T13:30:00Z", "currency": "USD", "impact": "high", "title": "Non-Farm Payrolls" }]"#,
        )
        .unwrap();

        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.calendar.len(), 1);
        assert_eq!(config.calendar[0].currency, "USD");
    }

    #[test]
    #[serial]
    fn test_invalid_weights_block_loading() {
        clean_signal_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        std::fs::write(
            tmp.path().join("analysis.json"),
            r#"{ "weights": { "smc": "0.5" } }"#,
        )
        .unwrap();

        let err = load_config(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("weights sum to"), "got: {err}");
    }

    #[test]
    #[serial]
    fn test_env_override_thresholds() {
        clean_signal_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("SIGNAL_MIN_CONFLUENCE", "85");
        std::env::set_var("SIGNAL_MIN_LAYERS", "9");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.analysis.thresholds.min_confluence, dec!(85));
        assert_eq!(config.analysis.thresholds.min_layers, 9);
        clean_signal_env();
    }

    #[test]
    #[serial]
    fn test_env_override_source_and_key() {
        clean_signal_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("SIGNAL_PRIMARY_SOURCE_URL", "https://override.example.com");
        std::env::set_var("SIGNAL_DATA_API_KEY", "secret");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.data.sources[0].base_url, "https://override.example.com");
        assert!(config
            .data
            .sources
            .iter()
            .all(|s| s.api_key.as_deref() == Some("secret")));
        clean_signal_env();
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_parse_ignored() {
        clean_signal_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("SIGNAL_RISK_PERCENT", "lots");
        std::env::set_var("SIGNAL_MIN_LAYERS", "");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.risk.risk_percent, dec!(1.5));
        assert_eq!(config.analysis.thresholds.min_layers, 8);
        clean_signal_env();
    }

    #[test]
    #[serial]
    fn test_env_override_risk_out_of_range_fails_validation() {
        clean_signal_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());

        std::env::set_var("SIGNAL_RISK_PERCENT", "2.5");
        let err = load_config(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("risk_percent"), "got: {err}");
        clean_signal_env();
    }
}
