//! Order flow approximated from OHLCV: per-bar delta from the close location,
//! cumulative delta, absorption and exhaustion.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use super::indicators::{linear_regression, to_f64};
use super::{bias_from_votes, Analyzer, AnalysisInput, AnalyzerResult, DomainFindings};
use crate::config::LookbackConfig;
use crate::errors::EngineResult;
use crate::types::{Bias, Candle, Domain};

/// Bars at the end of the window checked for absorption and exhaustion.
const RECENT: usize = 10;

/// Estimated buy-minus-sell volume of one bar: +volume at a close on the
/// high, -volume at a close on the low.
pub fn bar_delta(c: &Candle) -> Decimal {
    c.volume * (c.close_location() * dec!(2) - Decimal::ONE)
}

pub fn cumulative_delta(candles: &[Candle]) -> Vec<Decimal> {
    candles
        .iter()
        .scan(Decimal::ZERO, |acc, c| {
            *acc += bar_delta(c);
            Some(*acc)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowEventKind {
    /// Heavy volume that failed to move price, closing off the low.
    BullishAbsorption,
    /// Heavy volume that failed to move price, closing off the high.
    BearishAbsorption,
    /// New low on shrinking volume.
    SellingExhaustion,
    /// New high on shrinking volume.
    BuyingExhaustion,
}

impl FlowEventKind {
    pub fn bias(&self) -> Bias {
        match self {
            Self::BullishAbsorption | Self::SellingExhaustion => Bias::Bullish,
            Self::BearishAbsorption | Self::BuyingExhaustion => Bias::Bearish,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowEvent {
    pub kind: FlowEventKind,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderFlowFindings {
    pub cumulative_delta: Decimal,
    /// Direction of the cumulative-delta regression.
    pub delta_trend: Bias,
    /// Share of estimated volume on the buy side, 0-1.
    pub buy_pressure: Decimal,
    pub events: Vec<FlowEvent>,
    /// Price and cumulative delta moving in opposite directions.
    pub divergence: Option<Bias>,
}

fn find_events(candles: &[Candle]) -> Vec<FlowEvent> {
    let n = candles.len();
    if n < RECENT + 2 {
        return Vec::new();
    }
    let baseline = &candles[..n - RECENT];
    let count = Decimal::from(baseline.len());
    let avg_volume = baseline.iter().map(|c| c.volume).sum::<Decimal>() / count;
    let avg_spread = baseline.iter().map(|c| c.spread()).sum::<Decimal>() / count;
    if avg_volume.is_zero() || avg_spread.is_zero() {
        return Vec::new();
    }

    let mut events = Vec::new();
    for i in n - RECENT..n {
        let c = &candles[i];
        let prev = &candles[i - 1];

        if c.volume > avg_volume * dec!(1.5) && c.body() < c.spread() * dec!(0.3) {
            let loc = c.close_location();
            let kind = if loc > dec!(0.6) {
                Some(FlowEventKind::BullishAbsorption)
            } else if loc < dec!(0.4) {
                Some(FlowEventKind::BearishAbsorption)
            } else {
                None
            };
            if let Some(kind) = kind {
                events.push(FlowEvent {
                    kind,
                    timestamp: c.timestamp,
                });
                continue;
            }
        }

        let prior = &candles[..i];
        let window_start = prior.len().saturating_sub(RECENT);
        let prior = &prior[window_start..];
        let prior_low = prior.iter().map(|p| p.low).min();
        let prior_high = prior.iter().map(|p| p.high).max();
        let fading = c.volume < prev.volume && c.volume < avg_volume * dec!(0.8);
        if fading && prior_low.is_some_and(|l| c.low < l) {
            events.push(FlowEvent {
                kind: FlowEventKind::SellingExhaustion,
                timestamp: c.timestamp,
            });
        } else if fading && prior_high.is_some_and(|h| c.high > h) {
            events.push(FlowEvent {
                kind: FlowEventKind::BuyingExhaustion,
                timestamp: c.timestamp,
            });
        }
    }
    events
}

fn direction_of(slope: f64, scale: f64) -> Bias {
    if scale <= 0.0 {
        return Bias::Neutral;
    }
    let normalized = slope / scale;
    if normalized > 0.01 {
        Bias::Bullish
    } else if normalized < -0.01 {
        Bias::Bearish
    } else {
        Bias::Neutral
    }
}

pub struct OrderFlowAnalyzer {
    min_bars: usize,
    lookback: usize,
}

impl OrderFlowAnalyzer {
    pub fn new(lookbacks: &LookbackConfig) -> Self {
        Self {
            min_bars: lookbacks.min_bars,
            lookback: lookbacks.order_flow,
        }
    }
}

impl Analyzer for OrderFlowAnalyzer {
    fn domain(&self) -> Domain {
        Domain::OrderFlow
    }

    fn analyze(&self, input: &AnalysisInput) -> EngineResult<AnalyzerResult> {
        let Some(candles) = input.primary_window(self.min_bars, self.lookback) else {
            return Ok(AnalyzerResult::empty(Domain::OrderFlow));
        };

        let cvd = cumulative_delta(candles);
        let cvd_f: Vec<f64> = cvd.iter().map(|d| to_f64(*d)).collect();
        let closes_f: Vec<f64> = candles.iter().map(|c| to_f64(c.close)).collect();

        let avg_volume = to_f64(candles.iter().map(|c| c.volume).sum::<Decimal>())
            / candles.len() as f64;
        let avg_price = closes_f.iter().sum::<f64>() / closes_f.len() as f64;
        let delta_trend = direction_of(linear_regression(&cvd_f).slope, avg_volume);
        // Price slope per bar relative to price, scaled to the same order.
        let price_trend = direction_of(linear_regression(&closes_f).slope * 100.0, avg_price);

        let divergence = match (price_trend, delta_trend) {
            (Bias::Bullish, Bias::Bearish) => Some(Bias::Bearish),
            (Bias::Bearish, Bias::Bullish) => Some(Bias::Bullish),
            _ => None,
        };

        let (buys, total) = candles.iter().fold((Decimal::ZERO, Decimal::ZERO), |(b, t), c| {
            (b + c.volume * c.close_location(), t + c.volume)
        });
        let buy_pressure = if total.is_zero() {
            dec!(0.5)
        } else {
            (buys / total).round_dp(4)
        };

        let events = find_events(candles);

        let mut votes = vec![(delta_trend, dec!(0.35))];
        let pressure_bias = Bias::from_net((buy_pressure - dec!(0.5)) * dec!(2), dec!(0.1));
        votes.push((pressure_bias, dec!(0.25)));
        if let Some(d) = divergence {
            votes.push((d, dec!(0.2)));
        }
        for e in &events {
            votes.push((e.kind.bias(), dec!(0.1)));
        }
        let (bias, net) = bias_from_votes(&votes, dec!(0.2));

        let score = if bias == Bias::Neutral {
            dec!(15)
        } else {
            let aligned_events = events.iter().filter(|e| e.kind.bias() == bias).count();
            dec!(30)
                + net.abs() * dec!(40)
                + (buy_pressure - dec!(0.5)).abs() * dec!(40)
                + Decimal::from(aligned_events.min(3)) * dec!(5)
        };

        Ok(AnalyzerResult::new(
            Domain::OrderFlow,
            score,
            bias,
            DomainFindings::OrderFlow(OrderFlowFindings {
                cumulative_delta: cvd.last().copied().unwrap_or_default().round_dp(2),
                delta_trend,
                buy_pressure,
                events,
                divergence,
            }),
        ))
    }
}
