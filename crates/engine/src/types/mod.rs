pub mod analysis;
pub mod context;
pub mod instrument;
pub mod market_data;
pub mod signal;
pub mod timeframe;

pub use analysis::{clamp_score, Bias, Direction, Domain};
pub use context::{
    Blackout, ContextProvider, EconomicEvent, EventImpact, MarketContext, NewsItem, Positioning,
    StaticContextProvider,
};
pub use instrument::{AssetClass, Instrument};
pub use market_data::{Candle, CandleSeries, MultiTimeframeData};
pub use signal::{
    ConfluenceComponent, ConfluenceResult, Recommendation, RejectionReason, Signal,
    SignalQuality, SignalStatus, TakeProfit, ValidationLayerResult, ValidationReport,
};
pub use timeframe::Timeframe;
