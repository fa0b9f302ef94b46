use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::analysis::{Direction, Domain};

/// Quality label derived from the confluence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalQuality {
    Low,
    Moderate,
    Good,
    High,
    Premium,
}

impl SignalQuality {
    #[must_use]
    pub fn from_score(score: Decimal) -> Self {
        if score >= dec!(90) {
            Self::Premium
        } else if score >= dec!(80) {
            Self::High
        } else if score >= dec!(70) {
            Self::Good
        } else if score >= dec!(60) {
            Self::Moderate
        } else {
            Self::Low
        }
    }
}

/// One domain's contribution to the confluence score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceComponent {
    pub component: Domain,
    #[serde(with = "rust_decimal::serde::str")]
    pub score: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub weight: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub contribution: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceResult {
    /// Weighted composite in [0, 100].
    #[serde(with = "rust_decimal::serde::str")]
    pub score: Decimal,
    pub quality: SignalQuality,
    pub breakdown: Vec<ConfluenceComponent>,
    pub meets_minimum: bool,
    /// Points deducted outside kill zones (0 when none applied).
    #[serde(with = "rust_decimal::serde::str")]
    pub penalty: Decimal,
}

/// Per-domain re-check of an analyzer result against a proposed direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationLayerResult {
    pub name: Domain,
    pub passed: bool,
    #[serde(with = "rust_decimal::serde::str")]
    pub score: Decimal,
    pub reason: String,
    /// Checks that contributed points, e.g. `"order_block_aligned"`.
    pub details: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    StrongSignal,
    ValidSignal,
    WeakSignal,
    CriticalLayersFailed,
    NoTrade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub direction: Direction,
    pub is_valid: bool,
    pub passed_count: usize,
    pub critical_layers_passed: bool,
    pub failed_critical: Vec<Domain>,
    pub layers: Vec<ValidationLayerResult>,
    pub recommendation: Recommendation,
}

/// Why `generate_signal` declined to emit a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    NoDirection,
    ConflictingSignals { bullish: usize, bearish: usize },
    NewsBlackout { event: String, minutes_to_event: i64 },
    LowConfluence { score: Decimal, minimum: Decimal },
    LowAiConfidence { confidence: Decimal, minimum: Decimal },
    InsufficientLayers { passed: usize, minimum: usize },
    CriticalLayersFailed { layers: Vec<Domain> },
    RiskRejected { reason: String },
    InsufficientData { reason: String },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDirection => write!(f, "no clear direction"),
            Self::ConflictingSignals { bullish, bearish } => {
                write!(f, "conflicting signals ({bullish} bullish vs {bearish} bearish)")
            }
            Self::NewsBlackout {
                event,
                minutes_to_event,
            } => write!(f, "news blackout: {event} ({minutes_to_event} min)"),
            Self::LowConfluence { score, minimum } => {
                write!(f, "confluence {score} below minimum {minimum}")
            }
            Self::LowAiConfidence {
                confidence,
                minimum,
            } => write!(f, "AI confidence {confidence} below minimum {minimum}"),
            Self::InsufficientLayers { passed, minimum } => {
                write!(f, "{passed} validation layers passed, need {minimum}")
            }
            Self::CriticalLayersFailed { layers } => {
                let names: Vec<&str> = layers.iter().map(Domain::as_str).collect();
                write!(f, "critical layers failed: {}", names.join(", "))
            }
            Self::RiskRejected { reason } => write!(f, "risk rejected: {reason}"),
            Self::InsufficientData { reason } => write!(f, "insufficient data: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Active,
    Expired,
}

/// A take-profit level and the share of the position closed there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeProfit {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub pips: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub ratio: Decimal,
    /// Percent of the position closed at this level.
    #[serde(with = "rust_decimal::serde::str")]
    pub close_percent: Decimal,
}

/// Final, immutable trading recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: uuid::Uuid,
    pub symbol: String,
    pub direction: Direction,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub stop_loss: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub take_profit_1: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub take_profit_2: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub take_profit_3: Decimal,
    pub take_profits: Vec<TakeProfit>,
    #[serde(with = "rust_decimal::serde::str")]
    pub stop_pips: Decimal,
    /// Lots.
    #[serde(with = "rust_decimal::serde::str")]
    pub position_size: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub risk_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub risk_reward: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub confluence_score: Decimal,
    pub quality: SignalQuality,
    #[serde(with = "rust_decimal::serde::str")]
    pub ai_confidence: Decimal,
    pub reasoning: Vec<String>,
    pub validation_layers: Vec<ValidationLayerResult>,
    pub kill_zone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SignalStatus,
}

impl Signal {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_from_score() {
        assert_eq!(SignalQuality::from_score(dec!(95)), SignalQuality::Premium);
        assert_eq!(SignalQuality::from_score(dec!(90)), SignalQuality::Premium);
        assert_eq!(SignalQuality::from_score(dec!(80)), SignalQuality::High);
        assert_eq!(SignalQuality::from_score(dec!(79)), SignalQuality::Good);
        assert_eq!(SignalQuality::from_score(dec!(60)), SignalQuality::Moderate);
        assert_eq!(SignalQuality::from_score(dec!(12)), SignalQuality::Low);
    }

    #[test]
    fn test_rejection_reason_display() {
        let r = RejectionReason::CriticalLayersFailed {
            layers: vec![Domain::Smc, Domain::Fundamental],
        };
        assert_eq!(r.to_string(), "critical layers failed: smc, fundamental");

        let r = RejectionReason::LowConfluence {
            score: dec!(72),
            minimum: dec!(80),
        };
        assert_eq!(r.to_string(), "confluence 72 below minimum 80");
    }

    #[test]
    fn test_rejection_reason_serializes_tagged() {
        let json = serde_json::to_value(RejectionReason::NoDirection).unwrap();
        assert_eq!(json["kind"], "no_direction");
    }
}
