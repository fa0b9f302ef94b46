//! Calendar and news: active blackouts, upcoming high-impact releases and
//! recency-weighted news sentiment for the pair's two legs.

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use super::indicators::from_f64;
use super::{Analyzer, AnalysisInput, AnalyzerResult, DomainFindings};
use crate::config::LookbackConfig;
use crate::errors::EngineResult;
use crate::types::{Bias, Blackout, Domain, EconomicEvent, EventImpact, Instrument, NewsItem};

const SENTIMENT_DEADBAND: Decimal = dec!(0.15);

#[derive(Debug, Clone, Serialize)]
pub struct FundamentalFindings {
    pub blackout: Option<Blackout>,
    /// High-impact releases for either leg within the news horizon ahead.
    pub upcoming_events: Vec<EconomicEvent>,
    /// Recency-weighted sentiment for the instrument, in [-1, 1].
    pub news_sentiment: Decimal,
    pub news_count: usize,
}

impl FundamentalFindings {
    pub fn in_blackout(&self) -> bool {
        self.blackout.is_some()
    }
}

pub struct FundamentalAnalyzer {
    min_bars: usize,
    news_hours: i64,
    blackout_minutes: i64,
}

impl FundamentalAnalyzer {
    pub fn new(lookbacks: &LookbackConfig, blackout_minutes: i64) -> Self {
        Self {
            min_bars: lookbacks.min_bars,
            news_hours: lookbacks.news_hours.max(1),
            blackout_minutes,
        }
    }
}

/// Sign of a news item for `instrument`: good news for the base currency
/// (or the symbol itself) lifts the pair, good news for the quote sinks it.
fn item_sign(item: &NewsItem, instrument: &Instrument) -> f64 {
    let tagged = |code: &str| item.tags.iter().any(|t| t.eq_ignore_ascii_case(code));
    if tagged(instrument.symbol) || tagged(instrument.base) {
        1.0
    } else if tagged(instrument.quote) {
        -1.0
    } else {
        0.0
    }
}

impl Analyzer for FundamentalAnalyzer {
    fn domain(&self) -> Domain {
        Domain::Fundamental
    }

    fn analyze(&self, input: &AnalysisInput) -> EngineResult<AnalyzerResult> {
        if input.primary_window(self.min_bars, self.min_bars).is_none() {
            return Ok(AnalyzerResult::empty(Domain::Fundamental));
        }
        let instrument = input.instrument;
        let now = input.now;
        let horizon = Duration::hours(self.news_hours);

        let blackout = input
            .context
            .active_blackout(instrument, now, self.blackout_minutes);

        let upcoming_events: Vec<EconomicEvent> = input
            .context
            .events_for(instrument)
            .filter(|e| e.impact == EventImpact::High && e.time > now && e.time - now <= horizon)
            .cloned()
            .collect();

        let horizon_secs = horizon.num_seconds() as f64;
        let (weighted, weights, news_count) = input
            .context
            .news_for(instrument)
            .filter(|n| n.time <= now && now - n.time <= horizon)
            .fold((0.0, 0.0, 0usize), |(sum, wsum, count), n| {
                let age = (now - n.time).num_seconds() as f64;
                let weight = 1.0 - 0.5 * (age / horizon_secs);
                let value = n.sentiment.clamp(-1.0, 1.0) * item_sign(n, instrument);
                (sum + value * weight, wsum + weight, count + 1)
            });
        let news_sentiment = if weights > 0.0 {
            from_f64(weighted / weights).round_dp(3)
        } else {
            Decimal::ZERO
        };

        let (bias, score) = if blackout.is_some() {
            (Bias::Neutral, dec!(5))
        } else if news_count == 0 {
            (Bias::Neutral, dec!(20))
        } else {
            let bias = Bias::from_net(news_sentiment, SENTIMENT_DEADBAND);
            let base = if bias == Bias::Neutral { dec!(25) } else { dec!(50) };
            let coverage = Decimal::from(news_count.min(5)) * dec!(2);
            (bias, base + news_sentiment.abs() * dec!(40) + coverage)
        };
        let event_drag = Decimal::from(upcoming_events.len().min(3)) * dec!(10);

        Ok(AnalyzerResult::new(
            Domain::Fundamental,
            score - event_drag,
            bias,
            DomainFindings::Fundamental(FundamentalFindings {
                blackout,
                upcoming_events,
                news_sentiment,
                news_count,
            }),
        ))
    }
}
