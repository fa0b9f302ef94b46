//! Stop-loss, take-profit and position sizing.
//!
//! The stop sits at the tightest of three candidates: an ATR multiple, the
//! nearest protective swing, and the far edge of an aligned order block
//! (the last two with a small buffer). The distance is clamped to the
//! instrument class's pip range. Take-profits are fixed multiples of the stop
//! distance; size risks a fixed share of the balance, scaled down in
//! high-volatility conditions.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::debug;

use crate::config::RiskConfig;
use crate::constants::MAX_RISK_PERCENT;
use crate::types::{Direction, Instrument, TakeProfit};

/// Smallest tradable position, in lots.
pub const MIN_LOT: Decimal = dec!(0.01);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopSource {
    Atr,
    Structure,
    OrderBlock,
    /// No usable candidate; the class minimum applies.
    MinimumDistance,
}

#[derive(Debug, Clone)]
pub struct RiskParams {
    pub instrument: &'static Instrument,
    pub direction: Direction,
    pub entry: Decimal,
    pub atr: Decimal,
    /// Current ATR over its recent mean.
    pub atr_ratio: Decimal,
    /// Nearest swing low below entry (buy) or swing high above (sell).
    pub structure_level: Option<Decimal>,
    /// Far edge of the aligned order block: its low for a buy, high for a sell.
    pub order_block_level: Option<Decimal>,
    /// Requested risk percent; the configured default when `None`.
    pub risk_percent: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskPlan {
    pub stop_loss: Decimal,
    pub stop_pips: Decimal,
    pub stop_source: StopSource,
    pub take_profits: Vec<TakeProfit>,
    /// Lots, floored to [`MIN_LOT`].
    pub position_size: Decimal,
    pub risk_percent: Decimal,
    /// Account currency put at risk.
    pub risk_amount: Decimal,
    /// Reward multiple at the second take-profit.
    pub risk_reward: Decimal,
    /// 1, 0.75 or 0.5.
    pub volatility_adjustment: Decimal,
    pub is_valid: bool,
    pub rejection: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
}

/// Position scale for the current volatility regime.
pub fn volatility_adjustment(atr_ratio: Decimal) -> Decimal {
    if atr_ratio > dec!(1.5) {
        dec!(0.5)
    } else if atr_ratio > dec!(1.2) {
        dec!(0.75)
    } else {
        dec!(1)
    }
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Distance from entry to `level` plus the buffer, when `level` is on
    /// the protective side of entry.
    fn protective_distance(&self, params: &RiskParams, level: Option<Decimal>) -> Option<Decimal> {
        let level = level?;
        let raw = (params.entry - level) * params.direction.sign();
        (raw > Decimal::ZERO).then(|| raw + params.instrument.from_pips(self.config.structure_buffer_pips))
    }

    fn stop_distance(&self, params: &RiskParams) -> (Decimal, StopSource) {
        let atr_distance = (params.atr > Decimal::ZERO).then(|| params.atr * self.config.atr_multiplier);
        let candidates = [
            (atr_distance, StopSource::Atr),
            (self.protective_distance(params, params.structure_level), StopSource::Structure),
            (self.protective_distance(params, params.order_block_level), StopSource::OrderBlock),
        ];
        let tightest = candidates
            .into_iter()
            .filter_map(|(d, source)| d.map(|d| (d, source)))
            .min_by(|a, b| a.0.cmp(&b.0));

        let range = self.config.sl_pips.for_class(params.instrument.class);
        let (distance, source) = tightest
            .unwrap_or((params.instrument.from_pips(range.min), StopSource::MinimumDistance));
        let pips = params.instrument.to_pips(distance).clamp(range.min, range.max);
        (params.instrument.from_pips(pips), source)
    }

    pub fn calculate(&self, params: &RiskParams) -> RiskPlan {
        let sign = params.direction.sign();
        let (distance, stop_source) = self.stop_distance(params);
        let stop_pips = params.instrument.to_pips(distance).round_dp(1);
        let stop_loss = params.entry - sign * distance;

        let take_profits: Vec<TakeProfit> = self
            .config
            .tp_ratios
            .iter()
            .zip(self.config.partial_closes.iter())
            .map(|(&ratio, &close_percent)| TakeProfit {
                price: params.entry + sign * distance * ratio,
                pips: (stop_pips * ratio).round_dp(1),
                ratio,
                close_percent,
            })
            .collect();

        let requested = params.risk_percent.unwrap_or(self.config.risk_percent);
        let risk_percent = requested
            .min(self.config.max_risk_percent)
            .min(MAX_RISK_PERCENT)
            .max(Decimal::ZERO);
        let adjustment = volatility_adjustment(params.atr_ratio);
        let risk_amount = (self.config.account_balance * risk_percent / dec!(100) * adjustment).round_dp(2);

        let per_lot_risk = stop_pips * params.instrument.pip_value_per_lot;
        let position_size = if per_lot_risk > Decimal::ZERO {
            ((risk_amount / per_lot_risk) / MIN_LOT).floor() * MIN_LOT
        } else {
            Decimal::ZERO
        };

        let risk_reward = take_profits
            .get(1)
            .filter(|_| !stop_pips.is_zero())
            .map_or(Decimal::ZERO, |tp| (tp.pips / stop_pips).round_dp(2));

        let rejection = if params.entry <= Decimal::ZERO {
            Some("entry price must be positive".to_string())
        } else if take_profits.len() < 3 {
            Some(format!("{} take-profit levels configured, need 3", take_profits.len()))
        } else if risk_reward < self.config.min_reward_ratio {
            Some(format!(
                "reward ratio {risk_reward} below minimum {}",
                self.config.min_reward_ratio
            ))
        } else if position_size < MIN_LOT {
            Some(format!("position size {position_size} below minimum lot"))
        } else {
            None
        };

        debug!(
            symbol = %params.instrument.symbol,
            direction = %params.direction,
            stop_pips = %stop_pips,
            stop_source = ?stop_source,
            lots = %position_size,
            "risk plan computed"
        );

        RiskPlan {
            stop_loss,
            stop_pips,
            stop_source,
            take_profits,
            position_size,
            risk_percent,
            risk_amount,
            risk_reward,
            volatility_adjustment: adjustment,
            is_valid: rejection.is_none(),
            rejection,
        }
    }
}
