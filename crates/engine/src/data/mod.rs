pub mod provider;
pub mod source;

pub use provider::{CandleCache, MarketDataProvider};
pub use source::{CandleSource, HttpCandleSource, StaticCandleSource};
