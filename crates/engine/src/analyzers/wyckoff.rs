//! Wyckoff phase detection with spring / upthrust events.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use super::indicators::atr;
use super::{Analyzer, AnalysisInput, AnalyzerResult, DomainFindings};
use crate::config::{IndicatorParams, LookbackConfig};
use crate::errors::EngineResult;
use crate::types::market_data::closes;
use crate::types::{Bias, Candle, Domain};

/// Bars at the end of the window checked for springs and upthrusts.
const EVENT_WINDOW: usize = 5;
/// Net move over range above which the recent half is trending.
const TRENDING_RATIO: Decimal = dec!(0.6);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WyckoffPhase {
    Accumulation,
    Markup,
    Distribution,
    Markdown,
    Undetermined,
}

impl WyckoffPhase {
    pub fn bias(&self) -> Bias {
        match self {
            Self::Accumulation | Self::Markup => Bias::Bullish,
            Self::Distribution | Self::Markdown => Bias::Bearish,
            Self::Undetermined => Bias::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WyckoffEventKind {
    /// Dip below support that closes back inside the range.
    Spring,
    /// Push above resistance that closes back inside the range.
    Upthrust,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WyckoffEvent {
    pub kind: WyckoffEventKind,
    pub price: Decimal,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WyckoffFindings {
    pub phase: WyckoffPhase,
    pub support: Decimal,
    pub resistance: Decimal,
    pub event: Option<WyckoffEvent>,
    /// Up-bar volume over down-bar volume in the recent half.
    pub volume_ratio: Decimal,
    /// Net move of the recent half over its high-low range.
    pub directionality: Decimal,
}

pub struct WyckoffAnalyzer {
    min_bars: usize,
    lookback: usize,
    atr_period: usize,
}

impl WyckoffAnalyzer {
    pub fn new(lookbacks: &LookbackConfig, params: &IndicatorParams) -> Self {
        Self {
            min_bars: lookbacks.min_bars,
            lookback: lookbacks.wyckoff,
            atr_period: params.atr_period,
        }
    }
}

fn volume_ratio(candles: &[Candle]) -> Decimal {
    let up: Decimal = candles.iter().filter(|c| c.is_bullish()).map(|c| c.volume).sum();
    let down: Decimal = candles.iter().filter(|c| c.is_bearish()).map(|c| c.volume).sum();
    if down.is_zero() {
        return if up.is_zero() { dec!(1) } else { dec!(10) };
    }
    (up / down).min(dec!(10)).round_dp(3)
}

/// Spring or upthrust among the last [`EVENT_WINDOW`] candles against a
/// range established before them. The latest event wins.
fn find_event(candles: &[Candle], support: Decimal, resistance: Decimal) -> Option<WyckoffEvent> {
    let start = candles.len().saturating_sub(EVENT_WINDOW);
    candles[start..].iter().rev().find_map(|c| {
        if c.low < support && c.close > support {
            Some(WyckoffEvent {
                kind: WyckoffEventKind::Spring,
                price: c.low,
                timestamp: c.timestamp,
            })
        } else if c.high > resistance && c.close < resistance {
            Some(WyckoffEvent {
                kind: WyckoffEventKind::Upthrust,
                price: c.high,
                timestamp: c.timestamp,
            })
        } else {
            None
        }
    })
}

impl Analyzer for WyckoffAnalyzer {
    fn domain(&self) -> Domain {
        Domain::Wyckoff
    }

    fn analyze(&self, input: &AnalysisInput) -> EngineResult<AnalyzerResult> {
        let Some(candles) = input.primary_window(self.min_bars, self.lookback) else {
            return Ok(AnalyzerResult::empty(Domain::Wyckoff));
        };

        let half = candles.len() / 2;
        let (prior, recent) = candles.split_at(half);
        let range = &recent[..recent.len().saturating_sub(EVENT_WINDOW)];
        let (Some(support), Some(resistance)) = (
            range.iter().map(|c| c.low).min(),
            range.iter().map(|c| c.high).max(),
        ) else {
            return Ok(AnalyzerResult::empty(Domain::Wyckoff));
        };

        let prior_closes = closes(prior);
        let recent_closes = closes(recent);
        let prior_move = match (prior_closes.first(), prior_closes.last()) {
            (Some(a), Some(b)) => *b - *a,
            _ => Decimal::ZERO,
        };
        let recent_move = match (recent_closes.first(), recent_closes.last()) {
            (Some(a), Some(b)) => *b - *a,
            _ => Decimal::ZERO,
        };
        let recent_span = recent.iter().map(|c| c.high).max().unwrap_or(resistance)
            - recent.iter().map(|c| c.low).min().unwrap_or(support);
        let directionality = if recent_span.is_zero() {
            Decimal::ZERO
        } else {
            (recent_move.abs() / recent_span).min(dec!(1))
        };
        let atr_value = atr(candles, self.atr_period);

        let phase = if directionality > TRENDING_RATIO {
            if recent_move > Decimal::ZERO {
                WyckoffPhase::Markup
            } else {
                WyckoffPhase::Markdown
            }
        } else if prior_move < -atr_value * dec!(2) {
            WyckoffPhase::Accumulation
        } else if prior_move > atr_value * dec!(2) {
            WyckoffPhase::Distribution
        } else {
            WyckoffPhase::Undetermined
        };

        let event = find_event(candles, support, resistance);
        let vol_ratio = volume_ratio(recent);

        let event_bias = event.map(|e| match e.kind {
            WyckoffEventKind::Spring => Bias::Bullish,
            WyckoffEventKind::Upthrust => Bias::Bearish,
        });
        let volume_bias = if vol_ratio > dec!(1.2) {
            Bias::Bullish
        } else if vol_ratio < dec!(0.83) {
            Bias::Bearish
        } else {
            Bias::Neutral
        };

        let bias = match (phase.bias(), event_bias) {
            (Bias::Neutral, Some(b)) => b,
            (p, _) => p,
        };

        let mut score = Decimal::ZERO;
        if bias != Bias::Neutral {
            score += match phase {
                WyckoffPhase::Markup | WyckoffPhase::Markdown => {
                    dec!(30) + directionality * dec!(20)
                }
                WyckoffPhase::Accumulation | WyckoffPhase::Distribution => dec!(35),
                WyckoffPhase::Undetermined => dec!(15),
            };
            if event_bias == Some(bias) {
                score += dec!(30);
            }
            if volume_bias == bias {
                score += dec!(15);
            } else if volume_bias != Bias::Neutral {
                score -= dec!(10);
            }
        }

        Ok(AnalyzerResult::new(
            Domain::Wyckoff,
            score,
            bias,
            DomainFindings::Wyckoff(WyckoffFindings {
                phase,
                support,
                resistance,
                event,
                volume_ratio: vol_ratio,
                directionality: directionality.round_dp(4),
            }),
        ))
    }
}
