//! Fibonacci retracements, extensions and ratio matching.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::constants::{FIB_EXTENSIONS, FIB_RETRACEMENTS, GOLDEN_ZONE_HIGH, GOLDEN_ZONE_LOW};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FibLevel {
    pub ratio: Decimal,
    pub price: Decimal,
}

/// A measured move from `start` to `end`. Up-leg when `end > start`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Leg {
    pub start: Decimal,
    pub end: Decimal,
}

impl Leg {
    pub fn new(start: Decimal, end: Decimal) -> Self {
        Self { start, end }
    }

    pub fn is_up(&self) -> bool {
        self.end > self.start
    }

    pub fn length(&self) -> Decimal {
        (self.end - self.start).abs()
    }

    /// Price retracing `ratio` of the leg back from its end.
    pub fn retracement(&self, ratio: Decimal) -> Decimal {
        self.end - (self.end - self.start) * ratio
    }

    /// Price projected `ratio` of the leg from its start.
    pub fn extension(&self, ratio: Decimal) -> Decimal {
        self.start + (self.end - self.start) * ratio
    }

    pub fn retracements(&self) -> Vec<FibLevel> {
        FIB_RETRACEMENTS
            .iter()
            .map(|&ratio| FibLevel {
                ratio,
                price: self.retracement(ratio),
            })
            .collect()
    }

    pub fn extensions(&self) -> Vec<FibLevel> {
        FIB_EXTENSIONS
            .iter()
            .map(|&ratio| FibLevel {
                ratio,
                price: self.extension(ratio),
            })
            .collect()
    }

    /// Golden zone (61.8%–78.6% retracement) as an ordered `(low, high)`
    /// price band. Doubles as the optimal trade entry zone.
    pub fn golden_zone(&self) -> (Decimal, Decimal) {
        let a = self.retracement(GOLDEN_ZONE_LOW);
        let b = self.retracement(GOLDEN_ZONE_HIGH);
        (a.min(b), a.max(b))
    }

    pub fn in_golden_zone(&self, price: Decimal) -> bool {
        let (low, high) = self.golden_zone();
        price >= low && price <= high
    }

    /// How far `price` has retraced the leg, as a fraction (0 at the end,
    /// 1 back at the start). `None` for a zero-length leg.
    pub fn retraced_fraction(&self, price: Decimal) -> Option<Decimal> {
        let span = self.end - self.start;
        if span.is_zero() {
            return None;
        }
        Some((self.end - price) / span)
    }
}

/// Whether `ratio` lies within `tolerance` (relative) of any of `targets`.
pub fn matches_any(ratio: f64, targets: &[f64], tolerance: f64) -> bool {
    targets
        .iter()
        .any(|t| *t != 0.0 && ((ratio - t) / t).abs() <= tolerance)
}
