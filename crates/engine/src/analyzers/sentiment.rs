//! Contrarian crowd sentiment: retail positioning and a fear/greed reading.
//! Without a feed, greed is proxied from RSI and the position in the range.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use super::indicators::{from_f64, range_extremes, rsi};
use super::{bias_from_votes, Analyzer, AnalysisInput, AnalyzerResult, DomainFindings};
use crate::config::{IndicatorParams, LookbackConfig};
use crate::errors::EngineResult;
use crate::types::market_data::closes;
use crate::types::{Bias, Candle, Domain};

const CROWDED_LONG: f64 = 65.0;
const CROWDED_SHORT: f64 = 35.0;
const EXTREME_GREED: Decimal = dec!(75);
const EXTREME_FEAR: Decimal = dec!(25);
/// Bars behind the range-position part of the greed proxy.
const PROXY_RANGE_BARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentSource {
    Feed,
    PriceProxy,
}

#[derive(Debug, Clone, Serialize)]
pub struct SentimentFindings {
    pub percent_long: Option<Decimal>,
    pub positioning_bias: Bias,
    /// 0 = extreme fear, 100 = extreme greed.
    pub fear_greed: Decimal,
    pub fear_greed_source: SentimentSource,
    pub fear_greed_bias: Bias,
}

pub struct SentimentAnalyzer {
    min_bars: usize,
    rsi_period: usize,
}

impl SentimentAnalyzer {
    pub fn new(lookbacks: &LookbackConfig, params: &IndicatorParams) -> Self {
        Self {
            min_bars: lookbacks.min_bars,
            rsi_period: params.rsi_period,
        }
    }
}

/// Mean of RSI and the close's position in the recent range, both 0-100.
fn greed_proxy(candles: &[Candle], rsi_period: usize) -> Decimal {
    let closes = closes(candles);
    let rsi_value = rsi(&closes, rsi_period);
    let start = candles.len().saturating_sub(PROXY_RANGE_BARS);
    let position = match (range_extremes(&candles[start..]), closes.last()) {
        (Some((high, low)), Some(&price)) if high > low => (price - low) / (high - low) * dec!(100),
        _ => dec!(50),
    };
    ((rsi_value + position) / dec!(2)).round_dp(2)
}

fn contrarian(value: Decimal, crowd_high: Decimal, crowd_low: Decimal) -> Bias {
    if value > crowd_high {
        Bias::Bearish
    } else if value < crowd_low {
        Bias::Bullish
    } else {
        Bias::Neutral
    }
}

impl Analyzer for SentimentAnalyzer {
    fn domain(&self) -> Domain {
        Domain::Sentiment
    }

    fn analyze(&self, input: &AnalysisInput) -> EngineResult<AnalyzerResult> {
        let Some(candles) = input.primary_window(self.min_bars, PROXY_RANGE_BARS) else {
            return Ok(AnalyzerResult::empty(Domain::Sentiment));
        };

        let percent_long = input
            .context
            .positioning
            .map(|p| from_f64(p.percent_long.clamp(0.0, 100.0)).round_dp(2));
        let positioning_bias = percent_long.map_or(Bias::Neutral, |p| {
            contrarian(p, from_f64(CROWDED_LONG), from_f64(CROWDED_SHORT))
        });

        let (fear_greed, source) = match input.context.fear_greed {
            Some(v) => (from_f64(v.clamp(0.0, 100.0)).round_dp(2), SentimentSource::Feed),
            None => (greed_proxy(candles, self.rsi_period), SentimentSource::PriceProxy),
        };
        let fear_greed_bias = contrarian(fear_greed, EXTREME_GREED, EXTREME_FEAR);

        // A proxy is a weaker read than a real feed.
        let greed_weight = match source {
            SentimentSource::Feed => dec!(0.4),
            SentimentSource::PriceProxy => dec!(0.25),
        };
        let mut votes = vec![(fear_greed_bias, greed_weight)];
        if percent_long.is_some() {
            votes.push((positioning_bias, dec!(0.6)));
        }
        let (bias, _) = bias_from_votes(&votes, dec!(0.1));

        let extremity = |value: Decimal| ((value - dec!(50)).abs() / dec!(50)).min(dec!(1));
        let score = if bias == Bias::Neutral {
            dec!(15)
        } else {
            let mut score = dec!(30);
            if positioning_bias == bias {
                score += dec!(20) + percent_long.map_or(Decimal::ZERO, extremity) * dec!(20);
            }
            if fear_greed_bias == bias {
                let strength = if source == SentimentSource::Feed { dec!(25) } else { dec!(15) };
                score += strength * (dec!(0.5) + extremity(fear_greed) / dec!(2));
            }
            score
        };

        Ok(AnalyzerResult::new(
            Domain::Sentiment,
            score,
            bias,
            DomainFindings::Sentiment(SentimentFindings {
                percent_long,
                positioning_bias,
                fear_greed,
                fear_greed_source: source,
                fear_greed_bias,
            }),
        ))
    }
}
