use std::collections::HashSet;

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::types::*;
use crate::constants::{MAX_RISK_PERCENT, WEIGHT_SUM_TOLERANCE};
use crate::types::{Domain, Timeframe};

/// Validate the fully loaded config.
///
/// Every check runs; all failures are reported together.
pub fn validate_config(config: &EngineConfig) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();

    validate_data_config(config, &mut errors);
    validate_weights(&config.analysis.weights, &mut errors);
    validate_thresholds(config, &mut errors);
    validate_lookbacks(config, &mut errors);
    validate_risk_config(config, &mut errors);

    if errors.is_empty() {
        return Ok(());
    }

    let count = errors.len();
    let list = errors.join("\n  - ");
    bail!(
        "Configuration validation failed ({count} error{}):\n  - {list}",
        if count == 1 { "" } else { "s" }
    );
}

// ---------------------------------------------------------------------------
// Data config
// ---------------------------------------------------------------------------

fn validate_data_config(config: &EngineConfig, errors: &mut Vec<String>) {
    let data = &config.data;

    if data.sources.iter().filter(|s| s.enabled).count() == 0 {
        errors.push("data: at least one source must be enabled".into());
    }

    let mut names = HashSet::new();
    for source in &data.sources {
        if source.base_url.is_empty() {
            errors.push(format!("data.sources.{}: base_url is empty", source.name));
        }
        if !names.insert(source.name.as_str()) {
            errors.push(format!("data.sources.{}: duplicate source name", source.name));
        }
        if source.timeout_ms == 0 {
            errors.push(format!("data.sources.{}: timeout_ms must be > 0", source.name));
        }
    }

    if data.retry.max_attempts == 0 {
        errors.push("data.retry: max_attempts must be >= 1".into());
    }
    if data.retry.attempt_timeout_ms == 0 {
        errors.push("data.retry: attempt_timeout_ms must be > 0".into());
    }

    let cb = &data.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push("data.circuit_breaker: failure_threshold must be >= 1".into());
    }
    if cb.half_open_max_probes == 0 || cb.half_open_successes == 0 {
        errors.push("data.circuit_breaker: half-open probe counts must be >= 1".into());
    }

    if data.cache.capacity == 0 {
        errors.push("data.cache: capacity must be > 0".into());
    }
    let tiers = &data.cache.tiers;
    if !(tiers.realtime_secs < tiers.short_secs
        && tiers.short_secs < tiers.medium_secs
        && tiers.medium_secs < tiers.long_secs)
    {
        errors.push(format!(
            "data.cache.tiers: TTLs must increase ({}s < {}s < {}s < {}s)",
            tiers.realtime_secs, tiers.short_secs, tiers.medium_secs, tiers.long_secs
        ));
    }

    if !data.timeframes.iter().any(|t| t.timeframe == Timeframe::PRIMARY) {
        errors.push(format!(
            "data.timeframes: primary timeframe {} must be fetched",
            Timeframe::PRIMARY
        ));
    }
    for tf in &data.timeframes {
        if tf.bars == 0 {
            errors.push(format!("data.timeframes.{}: bars must be > 0", tf.timeframe));
        }
    }
}

// ---------------------------------------------------------------------------
// Confluence weights
// ---------------------------------------------------------------------------

/// Also used by the confluence calculator at construction.
pub(crate) fn validate_weights(weights: &ConfluenceWeights, errors: &mut Vec<String>) {
    for domain in Domain::ALL {
        let w = weights.weight(domain);
        if w < Decimal::ZERO {
            errors.push(format!("analysis.weights.{domain}: weight ({w}) must be >= 0"));
        }
    }

    let sum = weights.sum();
    if (sum - dec!(1)).abs() > WEIGHT_SUM_TOLERANCE {
        errors.push(format!(
            "analysis.weights: weights sum to {sum}, expected 1.0 ± {WEIGHT_SUM_TOLERANCE}"
        ));
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

fn validate_thresholds(config: &EngineConfig, errors: &mut Vec<String>) {
    let t = &config.analysis.thresholds;

    if t.min_confluence < Decimal::ZERO || t.min_confluence > dec!(100) {
        errors.push(format!(
            "analysis.thresholds: min_confluence ({}) must be in [0, 100]",
            t.min_confluence
        ));
    }
    if t.min_ai_confidence < Decimal::ZERO || t.min_ai_confidence > dec!(100) {
        errors.push(format!(
            "analysis.thresholds: min_ai_confidence ({}) must be in [0, 100]",
            t.min_ai_confidence
        ));
    }
    if t.min_layers == 0 || t.min_layers > Domain::ALL.len() {
        errors.push(format!(
            "analysis.thresholds: min_layers ({}) must be in [1, {}]",
            t.min_layers,
            Domain::ALL.len()
        ));
    }
    if t.kill_zone_penalty < Decimal::ZERO {
        errors.push(format!(
            "analysis.thresholds: kill_zone_penalty ({}) must be >= 0",
            t.kill_zone_penalty
        ));
    }
    if t.analysis_timeout_secs == 0 {
        errors.push("analysis.thresholds: analysis_timeout_secs must be > 0".into());
    }
    if t.blackout_window_minutes < 0 {
        errors.push("analysis.thresholds: blackout_window_minutes must be >= 0".into());
    }
}

fn validate_lookbacks(config: &EngineConfig, errors: &mut Vec<String>) {
    let lb = &config.analysis.lookbacks;
    let ind = &config.analysis.indicators;

    if lb.swing_strength == 0 {
        errors.push("analysis.lookbacks: swing_strength must be >= 1".into());
    }
    if lb.profile_bins < 5 {
        errors.push(format!(
            "analysis.lookbacks: profile_bins ({}) must be >= 5",
            lb.profile_bins
        ));
    }
    for (symbol, related) in &config.analysis.correlations {
        for (other, value) in related {
            if !(-1.0..=1.0).contains(value) {
                errors.push(format!(
                    "analysis.correlations.{symbol}.{other}: {value} is outside [-1, 1]"
                ));
            }
        }
    }
    if lb.technical_min_bars < ind.ema_trend {
        errors.push(format!(
            "analysis.lookbacks: technical_min_bars ({}) must cover ema_trend ({})",
            lb.technical_min_bars, ind.ema_trend
        ));
    }

    if ind.ema_fast >= ind.ema_slow || ind.ema_slow >= ind.ema_trend {
        errors.push(format!(
            "analysis.indicators: EMA periods must satisfy fast ({}) < slow ({}) < trend ({})",
            ind.ema_fast, ind.ema_slow, ind.ema_trend
        ));
    }
    if ind.macd_fast >= ind.macd_slow {
        errors.push(format!(
            "analysis.indicators: macd_fast ({}) must be < macd_slow ({})",
            ind.macd_fast, ind.macd_slow
        ));
    }
    if ind.rsi_period < 2 || ind.atr_period < 2 {
        errors.push("analysis.indicators: rsi_period and atr_period must be >= 2".into());
    }
}

// ---------------------------------------------------------------------------
// Risk config
// ---------------------------------------------------------------------------

fn validate_risk_config(config: &EngineConfig, errors: &mut Vec<String>) {
    let risk = &config.risk;

    if risk.account_balance <= Decimal::ZERO {
        errors.push(format!(
            "risk: account_balance ({}) must be > 0",
            risk.account_balance
        ));
    }
    if risk.max_risk_percent > MAX_RISK_PERCENT {
        errors.push(format!(
            "risk: max_risk_percent ({}) must be <= {MAX_RISK_PERCENT}",
            risk.max_risk_percent
        ));
    }
    if risk.risk_percent <= Decimal::ZERO || risk.risk_percent > risk.max_risk_percent {
        errors.push(format!(
            "risk: risk_percent ({}) must be in (0, {}]",
            risk.risk_percent, risk.max_risk_percent
        ));
    }
    if risk.atr_multiplier <= Decimal::ZERO {
        errors.push(format!(
            "risk: atr_multiplier ({}) must be > 0",
            risk.atr_multiplier
        ));
    }

    for (class, range) in [
        ("forex", risk.sl_pips.forex),
        ("metal", risk.sl_pips.metal),
        ("index", risk.sl_pips.index),
    ] {
        if range.min <= Decimal::ZERO || range.min >= range.max {
            errors.push(format!(
                "risk.sl_pips.{class}: need 0 < min ({}) < max ({})",
                range.min, range.max
            ));
        }
    }

    if risk.tp_ratios.len() != 3 {
        errors.push(format!(
            "risk: tp_ratios must have 3 entries, got {}",
            risk.tp_ratios.len()
        ));
    } else if !risk
        .tp_ratios
        .windows(2)
        .all(|w| w[0] > Decimal::ZERO && w[0] < w[1])
    {
        errors.push("risk: tp_ratios must be positive and strictly increasing".into());
    }

    if risk.partial_closes.len() != risk.tp_ratios.len() {
        errors.push("risk: partial_closes must have one entry per take-profit".into());
    }
    let close_sum: Decimal = risk.partial_closes.iter().copied().sum();
    if close_sum != dec!(100) {
        errors.push(format!("risk: partial_closes sum to {close_sum}, expected 100"));
    }

    if risk.signal_expiry_hours <= 0 {
        errors.push("risk: signal_expiry_hours must be > 0".into());
    }
}
