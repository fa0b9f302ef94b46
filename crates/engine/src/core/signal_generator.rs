//! Final signal assembly: direction vote, entry selection, risk levels and
//! the human-readable reasoning trail.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::ai_ensemble::AiAssessment;
use super::kill_zone::KillZone;
use super::risk_manager::{RiskManager, RiskParams};
use crate::analyzers::fibonacci::Leg;
use crate::analyzers::indicators::{atr, atr_ratio};
use crate::analyzers::swings::{find_swings, highs_of, lows_of, nearest_high_above, nearest_low_below};
use crate::analyzers::{bias_from_votes, AnalyzerResult, DomainFindings, SmcFindings};
use crate::constants::{
    VOTE_DEADBAND, VOTE_WEIGHT_AI, VOTE_WEIGHT_SMC, VOTE_WEIGHT_TECHNICAL, VOTE_WEIGHT_WYCKOFF,
};
use crate::types::{
    Bias, Candle, ConfluenceResult, Direction, Domain, Instrument, RejectionReason, Signal,
    SignalStatus, ValidationReport,
};

/// Bars over which ATR is averaged for the volatility ratio.
const ATR_RATIO_WINDOW: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    OrderBlock,
    OptimalTradeEntry,
    MarketPrice,
}

/// Everything one signal is built from.
pub struct SignalInputs<'a> {
    pub instrument: &'static Instrument,
    pub candles: &'a [Candle],
    pub results: &'a [AnalyzerResult],
    pub ai: &'a AiAssessment,
    pub confluence: &'a ConfluenceResult,
    pub validation: &'a ValidationReport,
    pub kill_zone: Option<KillZone>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SignalGenerator {
    risk: RiskManager,
    swing_strength: usize,
    atr_period: usize,
    expiry_hours: i64,
}

fn bias_of(results: &[AnalyzerResult], domain: Domain) -> Bias {
    results
        .iter()
        .find(|r| r.domain == domain)
        .map_or(Bias::Neutral, |r| r.bias)
}

fn smc_findings(results: &[AnalyzerResult]) -> Option<&SmcFindings> {
    results.iter().find_map(|r| match &r.findings {
        DomainFindings::Smc(f) => Some(f),
        _ => None,
    })
}

impl SignalGenerator {
    pub fn new(risk: RiskManager, swing_strength: usize, atr_period: usize) -> Self {
        let expiry_hours = risk.config().signal_expiry_hours;
        Self {
            risk,
            swing_strength: swing_strength.max(1),
            atr_period,
            expiry_hours,
        }
    }

    /// Weighted vote of SMC, technical, Wyckoff and the AI ensemble.
    /// Returns the direction and the net vote in [-1, 1].
    pub fn resolve_direction(
        &self,
        results: &[AnalyzerResult],
        ai: &AiAssessment,
    ) -> (Option<Direction>, Decimal) {
        let votes = [
            (bias_of(results, Domain::Smc), VOTE_WEIGHT_SMC),
            (bias_of(results, Domain::Technical), VOTE_WEIGHT_TECHNICAL),
            (bias_of(results, Domain::Wyckoff), VOTE_WEIGHT_WYCKOFF),
            (ai.direction, VOTE_WEIGHT_AI),
        ];
        let (bias, net) = bias_from_votes(&votes, VOTE_DEADBAND);
        (Direction::from_bias(bias), net)
    }

    /// Entry at a nearby aligned order block, else the optimal-trade-entry
    /// zone of the last leg, else the last price.
    pub fn select_entry(
        &self,
        direction: Direction,
        price: Decimal,
        atr: Decimal,
        smc: Option<&SmcFindings>,
        candles: &[Candle],
    ) -> (Decimal, EntrySource) {
        let sign = direction.sign();

        let block_edge = smc
            .and_then(|f| f.latest_block(direction.bias()))
            .map(|b| if direction.is_buy() { b.high } else { b.low });
        if let Some(edge) = block_edge {
            let pullback = (price - edge) * sign;
            if pullback >= Decimal::ZERO && pullback <= atr * dec!(0.5) {
                return (edge, EntrySource::OrderBlock);
            }
        }

        let swings = find_swings(candles, self.swing_strength);
        let last_high = highs_of(&swings).last();
        let last_low = lows_of(&swings).last();
        let leg = match (direction, last_low, last_high) {
            (Direction::Buy, Some(low), Some(high)) if low.index < high.index => {
                Some(Leg::new(low.price, high.price))
            }
            (Direction::Sell, Some(low), Some(high)) if high.index < low.index => {
                Some(Leg::new(high.price, low.price))
            }
            _ => None,
        };
        if let Some(leg) = leg {
            let (zone_low, zone_high) = leg.golden_zone();
            let ote = (zone_low + zone_high) / dec!(2);
            let pullback = (price - ote) * sign;
            if pullback >= Decimal::ZERO && pullback <= atr {
                return (ote, EntrySource::OptimalTradeEntry);
            }
        }

        (price, EntrySource::MarketPrice)
    }

    fn reasoning(
        &self,
        inputs: &SignalInputs<'_>,
        direction: Direction,
        net_vote: Decimal,
        entry_source: EntrySource,
    ) -> Vec<String> {
        let mut reasons = vec![
            format!("{direction} by weighted vote (net {})", net_vote.round_dp(2)),
            format!(
                "Confluence {} ({:?}){}",
                inputs.confluence.score,
                inputs.confluence.quality,
                if inputs.confluence.penalty.is_zero() {
                    String::new()
                } else {
                    format!(", {} point off-session penalty", inputs.confluence.penalty)
                }
            ),
            format!(
                "AI confidence {} in a {:?} regime",
                inputs.ai.confidence, inputs.ai.regime.regime
            ),
            format!(
                "{}/{} validation layers passed",
                inputs.validation.passed_count,
                inputs.validation.layers.len()
            ),
        ];
        reasons.extend(
            inputs
                .validation
                .layers
                .iter()
                .filter(|l| l.passed && !l.details.is_empty())
                .map(|l| format!("{}: {}", l.name, l.details.join(", "))),
        );
        for pattern in inputs.ai.patterns.iter().filter(|p| p.bias.agrees_with(direction)) {
            reasons.push(format!("Chart pattern: {:?}", pattern.pattern));
        }
        reasons.push(match entry_source {
            EntrySource::OrderBlock => "Entry at order block".to_string(),
            EntrySource::OptimalTradeEntry => "Entry in optimal trade entry zone".to_string(),
            EntrySource::MarketPrice => "Entry at market".to_string(),
        });
        if let Some(zone) = inputs.kill_zone {
            reasons.push(format!("Inside {zone} kill zone"));
        }
        reasons
    }

    /// Builds the signal for `direction`, or the risk manager's rejection.
    pub fn generate(
        &self,
        inputs: &SignalInputs<'_>,
        direction: Direction,
        net_vote: Decimal,
    ) -> Result<Signal, RejectionReason> {
        let Some(price) = inputs.candles.last().map(|c| c.close) else {
            return Err(RejectionReason::InsufficientData {
                reason: "no primary candles".into(),
            });
        };
        let atr_value = atr(inputs.candles, self.atr_period);
        let smc = smc_findings(inputs.results);
        let (entry, entry_source) =
            self.select_entry(direction, price, atr_value, smc, inputs.candles);

        let swings = find_swings(inputs.candles, self.swing_strength);
        let structure_level = match direction {
            Direction::Buy => nearest_low_below(&swings, entry),
            Direction::Sell => nearest_high_above(&swings, entry),
        }
        .map(|s| s.price);
        let order_block_level = smc
            .and_then(|f| f.latest_block(direction.bias()))
            .map(|b| if direction.is_buy() { b.low } else { b.high });

        let plan = self.risk.calculate(&RiskParams {
            instrument: inputs.instrument,
            direction,
            entry,
            atr: atr_value,
            atr_ratio: atr_ratio(inputs.candles, self.atr_period, ATR_RATIO_WINDOW),
            structure_level,
            order_block_level,
            risk_percent: None,
        });
        if !plan.is_valid {
            return Err(RejectionReason::RiskRejected {
                reason: plan.rejection.unwrap_or_else(|| "risk plan invalid".into()),
            });
        }

        let tp = |i: usize| plan.take_profits.get(i).map_or(entry, |t| t.price);
        let signal = Signal {
            id: Uuid::new_v4(),
            symbol: inputs.instrument.symbol.to_string(),
            direction,
            entry,
            stop_loss: plan.stop_loss,
            take_profit_1: tp(0),
            take_profit_2: tp(1),
            take_profit_3: tp(2),
            reasoning: self.reasoning(inputs, direction, net_vote, entry_source),
            take_profits: plan.take_profits,
            stop_pips: plan.stop_pips,
            position_size: plan.position_size,
            risk_amount: plan.risk_amount,
            risk_reward: plan.risk_reward,
            confluence_score: inputs.confluence.score,
            quality: inputs.confluence.quality,
            ai_confidence: inputs.ai.confidence,
            validation_layers: inputs.validation.layers.clone(),
            kill_zone: inputs.kill_zone.map(|z| z.to_string()),
            created_at: inputs.now,
            expires_at: inputs.now + Duration::hours(self.expiry_hours),
            status: SignalStatus::Active,
        };

        info!(
            id = %signal.id,
            symbol = %signal.symbol,
            direction = %direction,
            entry = %signal.entry,
            stop_loss = %signal.stop_loss,
            lots = %signal.position_size,
            confluence = %signal.confluence_score,
            "signal generated"
        );
        Ok(signal)
    }
}
