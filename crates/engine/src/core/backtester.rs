//! Offline walk-forward replay.
//!
//! A callback sees the history up to each bar and may return a trade plan;
//! one trade is open at a time. Results are measured in R (multiples of the
//! initial stop distance) and pips. No network or persistence involved.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::debug;

use crate::analyzers::indicators::{from_f64, mean, std_dev, to_f64};
use crate::types::{Candle, Direction, Instrument, Signal};

/// Profit factor reported when there are wins and no losses.
const PROFIT_FACTOR_CAP: Decimal = dec!(999);

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    /// Bars of history before the first evaluation.
    pub warmup: usize,
    /// Bars after which an open trade is closed at market.
    pub max_bars_in_trade: usize,
    /// Account percent risked per trade, for the equity curve.
    pub risk_percent: Decimal,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            warmup: 200,
            max_bars_in_trade: 48,
            risk_percent: dec!(1),
        }
    }
}

/// What the callback asks the backtester to trade.
#[derive(Debug, Clone, PartialEq)]
pub struct TradePlan {
    pub direction: Direction,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    /// (price, percent of the position closed there), nearest first.
    pub targets: Vec<(Decimal, Decimal)>,
    pub pip_size: Decimal,
    /// Unix seconds after which an unfilled plan is dropped.
    pub expires_at: Option<i64>,
}

impl TradePlan {
    pub fn from_signal(signal: &Signal, instrument: &Instrument) -> Self {
        Self {
            direction: signal.direction,
            entry: signal.entry,
            stop_loss: signal.stop_loss,
            targets: signal
                .take_profits
                .iter()
                .map(|tp| (tp.price, tp.close_percent))
                .collect(),
            pip_size: instrument.pip_size,
            expires_at: Some(signal.expires_at.timestamp()),
        }
    }

    fn risk(&self) -> Decimal {
        (self.entry - self.stop_loss).abs()
    }

    /// Whether `candle` trades through the entry price.
    fn fills_on(&self, candle: &Candle) -> bool {
        if self.direction.is_buy() {
            candle.low <= self.entry
        } else {
            candle.high >= self.entry
        }
    }

    fn expired_at(&self, candle: &Candle) -> bool {
        self.expires_at.is_some_and(|t| candle.timestamp > t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    /// Stopped at entry after the first target.
    Breakeven,
    TakeProfit,
    Expiry,
    EndOfData,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub direction: Direction,
    pub entry_index: usize,
    pub exit_index: usize,
    pub entry: Decimal,
    pub r_multiple: Decimal,
    pub pips: Decimal,
    pub targets_hit: usize,
    pub exit_reason: ExitReason,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BacktestReport {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Percent.
    pub win_rate: Decimal,
    pub profit_factor: Decimal,
    pub average_r: Decimal,
    pub total_r: Decimal,
    pub total_pips: Decimal,
    pub max_drawdown_r: Decimal,
    /// Percent of peak equity.
    pub max_drawdown_percent: Decimal,
    /// Mean over sample deviation of per-trade R; not annualised.
    pub sharpe_ratio: Decimal,
    pub exit_reasons: BTreeMap<ExitReason, usize>,
    /// Plans whose entry was never traded before they lapsed.
    pub unfilled_plans: usize,
    pub trades: Vec<TradeRecord>,
}

struct OpenTrade {
    plan: TradePlan,
    entry_index: usize,
    stop: Decimal,
    remaining: Decimal,
    targets_hit: usize,
    r: Decimal,
    pips: Decimal,
}

impl OpenTrade {
    fn new(plan: TradePlan, entry_index: usize) -> Self {
        Self {
            stop: plan.stop_loss,
            plan,
            entry_index,
            remaining: dec!(100),
            targets_hit: 0,
            r: Decimal::ZERO,
            pips: Decimal::ZERO,
        }
    }

    /// Books `percent` of the position closed at `price`.
    fn close_part(&mut self, price: Decimal, percent: Decimal) {
        let percent = percent.min(self.remaining);
        let share = percent / dec!(100);
        let moved = (price - self.plan.entry) * self.plan.direction.sign();
        let risk = self.plan.risk();
        if !risk.is_zero() {
            self.r += moved / risk * share;
        }
        if !self.plan.pip_size.is_zero() {
            self.pips += moved / self.plan.pip_size * share;
        }
        self.remaining -= percent;
    }

    /// Advances the trade through one bar. Returns the exit reason once the
    /// position is fully closed. Within a bar the stop is checked first.
    fn step(&mut self, candle: &Candle) -> Option<ExitReason> {
        let buy = self.plan.direction.is_buy();
        let stop_hit = if buy {
            candle.low <= self.stop
        } else {
            candle.high >= self.stop
        };
        if stop_hit {
            let reason = if self.targets_hit > 0 {
                ExitReason::Breakeven
            } else {
                ExitReason::StopLoss
            };
            self.close_part(self.stop, self.remaining);
            return Some(reason);
        }

        while let Some(&(price, percent)) = self.plan.targets.get(self.targets_hit) {
            let reached = if buy { candle.high >= price } else { candle.low <= price };
            if !reached {
                break;
            }
            let is_last = self.targets_hit + 1 == self.plan.targets.len();
            let percent = if is_last { self.remaining } else { percent };
            self.close_part(price, percent);
            self.targets_hit += 1;
            self.stop = self.plan.entry;
            if self.remaining <= Decimal::ZERO {
                return Some(ExitReason::TakeProfit);
            }
        }
        None
    }

    fn into_record(self, exit_index: usize, exit_reason: ExitReason) -> TradeRecord {
        TradeRecord {
            direction: self.plan.direction,
            entry_index: self.entry_index,
            exit_index,
            entry: self.plan.entry,
            r_multiple: self.r.round_dp(4),
            pips: self.pips.round_dp(1),
            targets_hit: self.targets_hit,
            exit_reason,
        }
    }
}

/// Replays `candles`, asking `strategy` for a plan after each closed bar
/// while flat. A plan rests as a limit order until a bar trades through its
/// entry; it is dropped once its expiry or `max_bars_in_trade` bars pass
/// unfilled. Plans with a zero stop distance are skipped.
pub fn run<F>(candles: &[Candle], config: &BacktestConfig, mut strategy: F) -> BacktestReport
where
    F: FnMut(&[Candle]) -> Option<TradePlan>,
{
    let mut trades = Vec::new();
    let mut dropped = 0usize;
    let mut i = config.warmup.max(1);

    while i < candles.len() {
        let Some(plan) = strategy(&candles[..i]) else {
            i += 1;
            continue;
        };
        if plan.risk().is_zero() {
            i += 1;
            continue;
        }

        let window_end = (i + config.max_bars_in_trade.max(1)).min(candles.len());
        let fill = (i..window_end)
            .take_while(|&j| !plan.expired_at(&candles[j]))
            .find(|&j| plan.fills_on(&candles[j]));
        let Some(fill) = fill else {
            dropped += 1;
            debug!(placed_index = i, entry = %plan.entry, "backtest plan expired unfilled");
            i = window_end;
            continue;
        };

        let mut trade = OpenTrade::new(plan, fill);
        let mut exit = None;
        let mut j = fill;
        while j < candles.len() {
            if let Some(reason) = trade.step(&candles[j]) {
                exit = Some((j, reason));
                break;
            }
            if j + 1 - fill >= config.max_bars_in_trade {
                let close = candles[j].close;
                trade.close_part(close, trade.remaining);
                exit = Some((j, ExitReason::Expiry));
                break;
            }
            j += 1;
        }
        let (exit_index, reason) = exit.unwrap_or_else(|| {
            let last = candles.len() - 1;
            trade.close_part(candles[last].close, trade.remaining);
            (last, ExitReason::EndOfData)
        });

        debug!(placed_index = i, entry_index = fill, exit_index, reason = ?reason, r = %trade.r, "backtest trade closed");
        trades.push(trade.into_record(exit_index, reason));
        i = exit_index + 1;
    }

    let mut report = summarize(trades, config);
    report.unfilled_plans = dropped;
    report
}

fn summarize(trades: Vec<TradeRecord>, config: &BacktestConfig) -> BacktestReport {
    if trades.is_empty() {
        return BacktestReport::default();
    }
    let total = trades.len();
    let rs: Vec<Decimal> = trades.iter().map(|t| t.r_multiple).collect();
    let wins = rs.iter().filter(|r| **r > Decimal::ZERO).count();
    let losses = rs.iter().filter(|r| **r < Decimal::ZERO).count();
    let gross_win: Decimal = rs.iter().filter(|r| **r > Decimal::ZERO).sum();
    let gross_loss: Decimal = rs.iter().filter(|r| **r < Decimal::ZERO).map(|r| r.abs()).sum();
    let total_r: Decimal = rs.iter().sum();

    let profit_factor = if gross_loss.is_zero() {
        if gross_win.is_zero() {
            Decimal::ZERO
        } else {
            PROFIT_FACTOR_CAP
        }
    } else {
        (gross_win / gross_loss).min(PROFIT_FACTOR_CAP)
    };

    let mut cumulative = Decimal::ZERO;
    let mut peak_r = Decimal::ZERO;
    let mut max_dd_r = Decimal::ZERO;
    let mut equity = dec!(100);
    let mut peak_equity = equity;
    let mut max_dd_pct = Decimal::ZERO;
    for r in &rs {
        cumulative += *r;
        peak_r = peak_r.max(cumulative);
        max_dd_r = max_dd_r.max(peak_r - cumulative);

        equity += equity * *r * config.risk_percent / dec!(100);
        peak_equity = peak_equity.max(equity);
        if peak_equity > Decimal::ZERO {
            max_dd_pct = max_dd_pct.max((peak_equity - equity) / peak_equity * dec!(100));
        }
    }

    let rs_f: Vec<f64> = rs.iter().map(|r| to_f64(*r)).collect();
    let sd = std_dev(&rs_f);
    let sharpe = if sd > 0.0 { mean(&rs_f) / sd } else { 0.0 };

    let mut exit_reasons = BTreeMap::new();
    for t in &trades {
        *exit_reasons.entry(t.exit_reason).or_insert(0) += 1;
    }
    let count = Decimal::from(total as u64);

    BacktestReport {
        total_trades: total,
        wins,
        losses,
        win_rate: (Decimal::from(wins as u64) / count * dec!(100)).round_dp(2),
        profit_factor: profit_factor.round_dp(2),
        average_r: (total_r / count).round_dp(3),
        total_r: total_r.round_dp(3),
        total_pips: trades.iter().map(|t| t.pips).sum::<Decimal>().round_dp(1),
        max_drawdown_r: max_dd_r.round_dp(3),
        max_drawdown_percent: max_dd_pct.round_dp(2),
        sharpe_ratio: from_f64(sharpe).round_dp(3),
        exit_reasons,
        unfilled_plans: 0,
        trades,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::T0;

    fn bar(i: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            timestamp: T0 + i * 3600,
            open,
            high,
            low,
            close,
            volume: dec!(1000),
        }
    }

    fn flat(n: usize, price: Decimal) -> Vec<Candle> {
        (0..n as i64)
            .map(|i| bar(i, price, price + dec!(0.0002), price - dec!(0.0002), price))
            .collect()
    }

    fn buy_plan() -> TradePlan {
        TradePlan {
            direction: Direction::Buy,
            entry: dec!(1.1000),
            stop_loss: dec!(1.0980),
            targets: vec![
                (dec!(1.1030), dec!(40)),
                (dec!(1.1050), dec!(40)),
                (dec!(1.1080), dec!(20)),
            ],
            pip_size: dec!(0.0001),
            expires_at: None,
        }
    }

    fn config() -> BacktestConfig {
        BacktestConfig {
            warmup: 5,
            max_bars_in_trade: 10,
            risk_percent: dec!(1),
        }
    }

    /// Plans a buy at the first evaluation only.
    fn once(plan: TradePlan) -> impl FnMut(&[Candle]) -> Option<TradePlan> {
        let mut used = false;
        move |_| {
            if used {
                None
            } else {
                used = true;
                Some(plan.clone())
            }
        }
    }

    #[test]
    fn test_all_targets_hit() {
        let mut candles = flat(5, dec!(1.1000));
        candles.push(bar(5, dec!(1.1000), dec!(1.1035), dec!(1.0995), dec!(1.1030)));
        candles.push(bar(6, dec!(1.1030), dec!(1.1085), dec!(1.1020), dec!(1.1080)));
        let report = run(&candles, &config(), once(buy_plan()));

        assert_eq!(report.total_trades, 1);
        let t = &report.trades[0];
        assert_eq!(t.exit_reason, ExitReason::TakeProfit);
        assert_eq!(t.targets_hit, 3);
        // 0.4 * 1.5 + 0.4 * 2.5 + 0.2 * 4.0
        assert_eq!(t.r_multiple, dec!(2.4));
        assert_eq!(t.pips, dec!(48));
        assert_eq!(report.profit_factor, dec!(999));
        assert_eq!(report.win_rate, dec!(100));
    }

    #[test]
    fn test_stop_first_on_ambiguous_bar() {
        let mut candles = flat(5, dec!(1.1000));
        // Touches both the stop and TP1.
        candles.push(bar(5, dec!(1.1000), dec!(1.1040), dec!(1.0970), dec!(1.1000)));
        let report = run(&candles, &config(), once(buy_plan()));
        let t = &report.trades[0];
        assert_eq!(t.exit_reason, ExitReason::StopLoss);
        assert_eq!(t.r_multiple, dec!(-1));
        assert_eq!(report.losses, 1);
        assert_eq!(report.profit_factor, Decimal::ZERO);
        assert_eq!(report.max_drawdown_r, dec!(1));
        assert_eq!(report.max_drawdown_percent, dec!(1));
    }

    #[test]
    fn test_breakeven_after_first_target() {
        let mut candles = flat(5, dec!(1.1000));
        candles.push(bar(5, dec!(1.1000), dec!(1.1032), dec!(1.0995), dec!(1.1025)));
        candles.push(bar(6, dec!(1.1025), dec!(1.1028), dec!(1.0990), dec!(1.0995)));
        let report = run(&candles, &config(), once(buy_plan()));
        let t = &report.trades[0];
        assert_eq!(t.exit_reason, ExitReason::Breakeven);
        assert_eq!(t.r_multiple, dec!(0.6));
        assert_eq!(report.exit_reasons.get(&ExitReason::Breakeven), Some(&1));
    }

    #[test]
    fn test_expiry_closes_at_market() {
        let candles = flat(30, dec!(1.1000));
        let report = run(&candles, &config(), once(buy_plan()));
        let t = &report.trades[0];
        assert_eq!(t.exit_reason, ExitReason::Expiry);
        assert_eq!(t.exit_index, 14);
        assert_eq!(t.r_multiple, Decimal::ZERO);
    }

    #[test]
    fn test_sell_plan_and_repeated_trades() {
        let mut candles = flat(5, dec!(1.1000));
        for i in 5..25 {
            let p = dec!(1.1000) - Decimal::from(i - 4) * dec!(0.0010);
            candles.push(bar(i, p + dec!(0.0010), p + dec!(0.0012), p - dec!(0.0002), p));
        }
        let strategy = |history: &[Candle]| {
            let price = history.last().map(|c| c.close)?;
            Some(TradePlan {
                direction: Direction::Sell,
                entry: price,
                stop_loss: price + dec!(0.0020),
                targets: vec![
                    (price - dec!(0.0030), dec!(40)),
                    (price - dec!(0.0050), dec!(40)),
                    (price - dec!(0.0080), dec!(20)),
                ],
                pip_size: dec!(0.0001),
                expires_at: None,
            })
        };
        let report = run(&candles, &config(), strategy);
        assert!(report.total_trades >= 2);
        assert!(report.total_r > Decimal::ZERO);
        assert_eq!(report.losses, 0);
        assert!(report.trades.windows(2).all(|w| w[1].entry_index > w[0].exit_index));
    }

    #[test]
    fn test_entry_never_touched_opens_no_trade() {
        let candles: Vec<Candle> = (0..40)
            .map(|i| bar(i, dec!(1.2000), dec!(1.2010), dec!(1.1990), dec!(1.2000)))
            .collect();
        let report = run(&candles, &config(), |_| Some(buy_plan()));
        assert_eq!(report.total_trades, 0);
        assert!(report.trades.is_empty());
        assert_eq!(report.total_r, Decimal::ZERO);
        // Placed at bars 5, 15, 25 and 35.
        assert_eq!(report.unfilled_plans, 4);
    }

    #[test]
    fn test_entry_away_from_market_fills_on_touch() {
        let mut candles = flat(7, dec!(1.1020));
        candles.push(bar(7, dec!(1.1020), dec!(1.1022), dec!(1.0999), dec!(1.1005)));
        candles.push(bar(8, dec!(1.1005), dec!(1.1035), dec!(1.1004), dec!(1.1030)));
        candles.push(bar(9, dec!(1.1030), dec!(1.1085), dec!(1.1025), dec!(1.1080)));
        let report = run(&candles, &config(), once(buy_plan()));

        assert_eq!(report.total_trades, 1);
        let t = &report.trades[0];
        assert_eq!(t.entry_index, 7);
        assert_eq!(t.entry, dec!(1.1000));
        assert_eq!(t.exit_index, 9);
        assert_eq!(t.exit_reason, ExitReason::TakeProfit);
        assert_eq!(t.r_multiple, dec!(2.4));
        assert_eq!(report.unfilled_plans, 0);
    }

    #[test]
    fn test_plan_lapses_at_expiry_before_touch() {
        let mut plan = buy_plan();
        plan.expires_at = Some(T0 + 6 * 3600);
        let mut candles = flat(8, dec!(1.1020));
        // Touches entry one bar after the plan lapsed.
        candles.push(bar(8, dec!(1.1020), dec!(1.1022), dec!(1.0995), dec!(1.1000)));
        candles.extend((9..20).map(|i| bar(i, dec!(1.1000), dec!(1.1035), dec!(1.0990), dec!(1.1000))));
        let report = run(&candles, &config(), once(plan));
        assert_eq!(report.total_trades, 0);
        assert_eq!(report.unfilled_plans, 1);
    }

    #[test]
    fn test_sell_stop_before_first_target_on_same_bar() {
        let plan = TradePlan {
            direction: Direction::Sell,
            entry: dec!(1.1000),
            stop_loss: dec!(1.1020),
            targets: vec![
                (dec!(1.0970), dec!(40)),
                (dec!(1.0950), dec!(40)),
                (dec!(1.0920), dec!(20)),
            ],
            pip_size: dec!(0.0001),
            expires_at: None,
        };
        let mut candles = flat(5, dec!(1.1000));
        candles.push(bar(5, dec!(1.1000), dec!(1.1025), dec!(1.0965), dec!(1.0990)));
        let report = run(&candles, &config(), once(plan));

        assert_eq!(report.total_trades, 1);
        let t = &report.trades[0];
        assert_eq!(t.direction, Direction::Sell);
        assert_eq!(t.exit_reason, ExitReason::StopLoss);
        assert_eq!(t.targets_hit, 0);
        assert_eq!(t.r_multiple, dec!(-1));
        assert_eq!(t.pips, dec!(-20));
    }

    #[test]
    fn test_expiry_after_partial_close() {
        let mut candles = flat(5, dec!(1.1000));
        candles.push(bar(5, dec!(1.1000), dec!(1.1032), dec!(1.0995), dec!(1.1025)));
        candles.extend((6..20).map(|i| bar(i, dec!(1.1020), dec!(1.1022), dec!(1.1018), dec!(1.1020))));
        let report = run(&candles, &config(), once(buy_plan()));

        let t = &report.trades[0];
        assert_eq!(t.exit_reason, ExitReason::Expiry);
        assert_eq!(t.targets_hit, 1);
        assert_eq!(t.exit_index, 14);
        // 0.4 * 1.5 at TP1, then 0.6 * 1.0 at the expiry close.
        assert_eq!(t.r_multiple, dec!(1.2));
        assert_eq!(t.pips, dec!(24));
    }

    #[test]
    fn test_no_trades_is_empty_report() {
        let report = run(&flat(20, dec!(1.1)), &config(), |_| None);
        assert_eq!(report.total_trades, 0);
        assert_eq!(report.sharpe_ratio, Decimal::ZERO);
    }
}
