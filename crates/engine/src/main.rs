use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use market_signal_engine::config;
use market_signal_engine::core::SignalEngine;
use market_signal_engine::logging;

/// Scanned when no symbols are given on the command line.
const DEFAULT_SYMBOLS: &[&str] = &["EURUSD", "GBPUSD", "USDJPY", "XAUUSD"];

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignore if missing).
    let _ = dotenvy::dotenv();

    let config_dir = std::env::var("SIGNAL_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));

    let config = config::load_config(&config_dir)?;

    // Hold the guard for the process lifetime.
    let _guard = logging::init_tracing(&config.app.logging)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let symbols: Vec<&str> = if args.is_empty() {
        DEFAULT_SYMBOLS.to_vec()
    } else {
        args.iter().map(String::as_str).collect()
    };

    info!(
        config_dir = %config_dir.display(),
        sources = config.data.sources.iter().filter(|s| s.enabled).count(),
        calendar_events = config.calendar.len(),
        symbols = symbols.len(),
        "signal engine starting"
    );

    let sweep_interval = Duration::from_secs(config.data.cache.sweep_interval_secs.max(1));
    let engine = SignalEngine::from_config(config).context("failed to construct engine")?;

    let shutdown = CancellationToken::new();
    let sweeper = Arc::clone(engine.cache()).spawn_sweeper(sweep_interval, shutdown.clone());

    tokio::select! {
        outcomes = engine.scan(&symbols) => {
            for (symbol, outcome) in outcomes {
                let document = match outcome {
                    Ok(outcome) => serde_json::to_value(&outcome)
                        .with_context(|| format!("failed to serialise outcome for {symbol}"))?,
                    Err(e) => {
                        error!(symbol = %symbol, error = %format!("{e:#}"), "analysis failed");
                        serde_json::json!({ "symbol": symbol, "error": format!("{e:#}") })
                    }
                };
                println!("{}", serde_json::to_string_pretty(&document)?);
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl+C")?;
            warn!("interrupted, abandoning in-flight analyses");
        }
    }

    let health = engine.health();
    info!(
        cache_hits = health.cache.hits,
        cache_misses = health.cache.misses,
        open_circuits = health
            .sources
            .iter()
            .filter(|s| s.state != market_signal_engine::resilience::CircuitState::Closed)
            .count(),
        "shutting down"
    );

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "cache sweeper did not stop cleanly");
    }

    Ok(())
}
