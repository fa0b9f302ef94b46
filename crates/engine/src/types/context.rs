//! Non-price inputs: economic calendar, news and trader positioning.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::EngineResult;
use crate::types::instrument::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventImpact {
    Low,
    Medium,
    High,
}

/// Scheduled macro release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomicEvent {
    pub time: DateTime<Utc>,
    pub currency: String,
    pub impact: EventImpact,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub time: DateTime<Utc>,
    pub headline: String,
    /// Currencies or symbols the item concerns.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Sentiment in [-1, 1], positive = bullish for the tagged asset.
    pub sentiment: f64,
}

/// Retail positioning snapshot, used contrarian.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Positioning {
    /// Share of traders long, in percent.
    pub percent_long: f64,
}

/// Everything the fundamental and sentiment analyzers read besides candles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketContext {
    #[serde(default)]
    pub events: Vec<EconomicEvent>,
    #[serde(default)]
    pub news: Vec<NewsItem>,
    pub positioning: Option<Positioning>,
    /// Fear/greed index in [0, 100].
    pub fear_greed: Option<f64>,
}

/// Active news blackout around a high-impact release.
#[derive(Debug, Clone, Serialize)]
pub struct Blackout {
    pub event: EconomicEvent,
    pub minutes_to_event: i64,
}

impl MarketContext {
    /// Events touching either leg of `instrument`.
    pub fn events_for<'a>(
        &'a self,
        instrument: &'a Instrument,
    ) -> impl Iterator<Item = &'a EconomicEvent> + 'a {
        self.events
            .iter()
            .filter(move |e| instrument.involves(&e.currency))
    }

    /// First high-impact event for `instrument` within `window_minutes` of
    /// `now`, either side.
    pub fn active_blackout(
        &self,
        instrument: &Instrument,
        now: DateTime<Utc>,
        window_minutes: i64,
    ) -> Option<Blackout> {
        let window = Duration::minutes(window_minutes);
        self.events_for(instrument)
            .filter(|e| e.impact == EventImpact::High)
            .filter(|e| (e.time - now).abs() <= window)
            .min_by_key(|e| (e.time - now).abs())
            .map(|e| Blackout {
                event: e.clone(),
                minutes_to_event: (e.time - now).num_minutes(),
            })
    }

    /// News items tagged with either leg or the symbol itself.
    pub fn news_for<'a>(
        &'a self,
        instrument: &'a Instrument,
    ) -> impl Iterator<Item = &'a NewsItem> + 'a {
        self.news.iter().filter(move |n| {
            n.tags.iter().any(|t| {
                t.eq_ignore_ascii_case(instrument.symbol) || instrument.involves(t)
            })
        })
    }
}

/// Supplies [`MarketContext`] for a symbol.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn context(&self, instrument: &Instrument) -> EngineResult<MarketContext>;
}

/// Context from a fixed calendar; no news or positioning feed.
#[derive(Debug, Clone, Default)]
pub struct StaticContextProvider {
    context: MarketContext,
}

impl StaticContextProvider {
    pub fn new(context: MarketContext) -> Self {
        Self { context }
    }

    pub fn from_calendar(events: Vec<EconomicEvent>) -> Self {
        Self::new(MarketContext {
            events,
            ..MarketContext::default()
        })
    }
}

#[async_trait]
impl ContextProvider for StaticContextProvider {
    async fn context(&self, instrument: &Instrument) -> EngineResult<MarketContext> {
        let mut ctx = self.context.clone();
        ctx.events.retain(|e| instrument.involves(&e.currency));
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(minutes_from_now: i64, currency: &str, impact: EventImpact, now: DateTime<Utc>) -> EconomicEvent {
        EconomicEvent {
            time: now + Duration::minutes(minutes_from_now),
            currency: currency.into(),
            impact,
            title: "NFP".into(),
        }
    }

    #[test]
    fn test_blackout_only_for_high_impact_on_pair_currency() {
        let now = Utc::now();
        let eurusd = Instrument::lookup("EURUSD").unwrap();

        let ctx = MarketContext {
            events: vec![
                event(10, "JPY", EventImpact::High, now),
                event(5, "USD", EventImpact::Medium, now),
            ],
            ..MarketContext::default()
        };
        assert!(ctx.active_blackout(eurusd, now, 30).is_none());

        let ctx = MarketContext {
            events: vec![event(-20, "USD", EventImpact::High, now)],
            ..MarketContext::default()
        };
        let blackout = ctx.active_blackout(eurusd, now, 30).unwrap();
        assert_eq!(blackout.minutes_to_event, -20);
    }

    #[test]
    fn test_blackout_window_edges() {
        let now = Utc::now();
        let gbpusd = Instrument::lookup("GBPUSD").unwrap();
        let ctx = MarketContext {
            events: vec![event(45, "GBP", EventImpact::High, now)],
            ..MarketContext::default()
        };
        assert!(ctx.active_blackout(gbpusd, now, 30).is_none());
        assert!(ctx.active_blackout(gbpusd, now, 60).is_some());
    }

    #[tokio::test]
    async fn test_static_provider_filters_by_instrument() {
        let now = Utc::now();
        let provider = StaticContextProvider::from_calendar(vec![
            event(10, "USD", EventImpact::High, now),
            event(10, "AUD", EventImpact::High, now),
        ]);
        let eurusd = Instrument::lookup("EURUSD").unwrap();
        let ctx = provider.context(eurusd).await.unwrap();
        assert_eq!(ctx.events.len(), 1);
        assert_eq!(ctx.events[0].currency, "USD");
    }
}
