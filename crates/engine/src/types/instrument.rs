//! Supported-instrument catalog.
//!
//! Pip sizes and per-lot pip values are static approximations for a USD
//! account; they are used for stop sizing and position sizing only.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    MajorPair,
    MinorPair,
    Metal,
    Index,
}

impl AssetClass {
    #[must_use]
    pub fn is_forex(&self) -> bool {
        matches!(self, Self::MajorPair | Self::MinorPair)
    }
}

/// Static description of a tradable symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Instrument {
    pub symbol: &'static str,
    pub class: AssetClass,
    /// Price increment of one pip (or one point for indices).
    pub pip_size: Decimal,
    /// Account-currency value of one pip for one standard lot.
    pub pip_value_per_lot: Decimal,
    /// Base and quote currencies; indices carry their listing currency twice.
    pub base: &'static str,
    pub quote: &'static str,
    /// Instruments whose behaviour the intermarket analyzer cross-checks.
    pub related: &'static [&'static str],
}

const fn fx(
    symbol: &'static str,
    class: AssetClass,
    pip_size: Decimal,
    pip_value_per_lot: Decimal,
    base: &'static str,
    quote: &'static str,
    related: &'static [&'static str],
) -> Instrument {
    Instrument {
        symbol,
        class,
        pip_size,
        pip_value_per_lot,
        base,
        quote,
        related,
    }
}

use AssetClass::{Index, MajorPair, Metal, MinorPair};

pub const CATALOG: &[Instrument] = &[
    // -- Majors --------------------------------------------------------------
    fx("EURUSD", MajorPair, dec!(0.0001), dec!(10), "EUR", "USD", &["GBPUSD", "USDCHF", "XAUUSD"]),
    fx("GBPUSD", MajorPair, dec!(0.0001), dec!(10), "GBP", "USD", &["EURUSD", "EURGBP", "XAUUSD"]),
    fx("USDJPY", MajorPair, dec!(0.01), dec!(6.7), "USD", "JPY", &["SPX500", "XAUUSD", "EURJPY"]),
    fx("USDCHF", MajorPair, dec!(0.0001), dec!(11), "USD", "CHF", &["EURUSD", "XAUUSD"]),
    fx("AUDUSD", MajorPair, dec!(0.0001), dec!(10), "AUD", "USD", &["NZDUSD", "XAUUSD", "SPX500"]),
    fx("USDCAD", MajorPair, dec!(0.0001), dec!(7.3), "USD", "CAD", &["EURUSD", "AUDUSD"]),
    fx("NZDUSD", MajorPair, dec!(0.0001), dec!(10), "NZD", "USD", &["AUDUSD", "SPX500"]),
    // -- Minors --------------------------------------------------------------
    fx("EURGBP", MinorPair, dec!(0.0001), dec!(12.7), "EUR", "GBP", &["EURUSD", "GBPUSD"]),
    fx("EURJPY", MinorPair, dec!(0.01), dec!(6.7), "EUR", "JPY", &["EURUSD", "USDJPY"]),
    fx("GBPJPY", MinorPair, dec!(0.01), dec!(6.7), "GBP", "JPY", &["GBPUSD", "USDJPY"]),
    fx("AUDJPY", MinorPair, dec!(0.01), dec!(6.7), "AUD", "JPY", &["AUDUSD", "USDJPY", "SPX500"]),
    fx("EURAUD", MinorPair, dec!(0.0001), dec!(6.5), "EUR", "AUD", &["EURUSD", "AUDUSD"]),
    fx("EURCHF", MinorPair, dec!(0.0001), dec!(11), "EUR", "CHF", &["EURUSD", "USDCHF"]),
    fx("GBPCHF", MinorPair, dec!(0.0001), dec!(11), "GBP", "CHF", &["GBPUSD", "USDCHF"]),
    fx("CADJPY", MinorPair, dec!(0.01), dec!(6.7), "CAD", "JPY", &["USDCAD", "USDJPY"]),
    // -- Metals --------------------------------------------------------------
    fx("XAUUSD", Metal, dec!(0.1), dec!(10), "XAU", "USD", &["EURUSD", "USDJPY", "XAGUSD"]),
    fx("XAGUSD", Metal, dec!(0.01), dec!(50), "XAG", "USD", &["XAUUSD", "EURUSD"]),
    // -- Indices -------------------------------------------------------------
    fx("US30", Index, dec!(1), dec!(1), "USD", "USD", &["SPX500", "NAS100"]),
    fx("NAS100", Index, dec!(1), dec!(1), "USD", "USD", &["SPX500", "US30", "USDJPY"]),
    fx("SPX500", Index, dec!(1), dec!(1), "USD", "USD", &["NAS100", "US30", "USDJPY"]),
    fx("GER40", Index, dec!(1), dec!(1), "EUR", "EUR", &["SPX500", "EURUSD"]),
    fx("UK100", Index, dec!(1), dec!(1), "GBP", "GBP", &["SPX500", "GBPUSD"]),
];

/// Uppercase and strip separators: `eur/usd` → `EURUSD`.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| !matches!(c, '/' | '_' | '-' | ' '))
        .collect::<String>()
        .to_uppercase()
}

impl Instrument {
    /// Look up a symbol in the catalog.
    pub fn lookup(symbol: &str) -> EngineResult<&'static Instrument> {
        let normalized = normalize_symbol(symbol);
        CATALOG
            .iter()
            .find(|i| i.symbol == normalized)
            .ok_or(EngineError::UnsupportedSymbol(normalized))
    }

    /// Price distance → pips.
    #[must_use]
    pub fn to_pips(&self, distance: Decimal) -> Decimal {
        if self.pip_size.is_zero() {
            return Decimal::ZERO;
        }
        distance.abs() / self.pip_size
    }

    /// Pips → price distance.
    #[must_use]
    pub fn from_pips(&self, pips: Decimal) -> Decimal {
        pips * self.pip_size
    }

    /// Whether `currency` is one leg of this instrument.
    #[must_use]
    pub fn involves(&self, currency: &str) -> bool {
        self.base.eq_ignore_ascii_case(currency) || self.quote.eq_ignore_ascii_case(currency)
    }
}
