//! High-liquidity trading windows.
//!
//! Windows are static UTC hour ranges, end-exclusive, with no daylight-saving
//! adjustment.

use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::constants::{
    ASIAN_SESSION_HOURS, LONDON_CLOSE_HOURS, LONDON_SESSION_HOURS, NEW_YORK_SESSION_HOURS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KillZone {
    Asian,
    London,
    NewYork,
    LondonClose,
}

impl KillZone {
    pub const ALL: [KillZone; 4] = [
        KillZone::Asian,
        KillZone::London,
        KillZone::NewYork,
        KillZone::LondonClose,
    ];

    /// `[start, end)` in UTC hours.
    pub fn hours(&self) -> (u32, u32) {
        match self {
            Self::Asian => ASIAN_SESSION_HOURS,
            Self::London => LONDON_SESSION_HOURS,
            Self::NewYork => NEW_YORK_SESSION_HOURS,
            Self::LondonClose => LONDON_CLOSE_HOURS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asian => "asian",
            Self::London => "london",
            Self::NewYork => "new_york",
            Self::LondonClose => "london_close",
        }
    }

    fn contains(&self, hour: u32) -> bool {
        let (start, end) = self.hours();
        hour >= start && hour < end
    }
}

impl fmt::Display for KillZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct KillZoneManager {
    penalty: Decimal,
}

impl KillZoneManager {
    pub fn new(penalty: Decimal) -> Self {
        Self { penalty }
    }

    /// Window containing `now`, if any.
    pub fn classify(&self, now: DateTime<Utc>) -> Option<KillZone> {
        let hour = now.hour();
        KillZone::ALL.into_iter().find(|z| z.contains(hour))
    }

    /// Confluence points deducted at `now`: the configured penalty outside
    /// every window, zero inside one.
    pub fn penalty(&self, now: DateTime<Utc>) -> Decimal {
        if self.classify(now).is_some() {
            Decimal::ZERO
        } else {
            self.penalty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 12, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_classify_each_window() {
        let m = KillZoneManager::new(dec!(15));
        assert_eq!(m.classify(at(1, 30)), Some(KillZone::Asian));
        assert_eq!(m.classify(at(7, 0)), Some(KillZone::London));
        assert_eq!(m.classify(at(14, 59)), Some(KillZone::NewYork));
        assert_eq!(m.classify(at(15, 0)), Some(KillZone::LondonClose));
        assert_eq!(m.classify(at(16, 59)), Some(KillZone::LondonClose));
    }

    #[test]
    fn test_window_ends_are_exclusive() {
        let m = KillZoneManager::new(dec!(15));
        assert_eq!(m.classify(at(3, 0)), None);
        assert_eq!(m.classify(at(10, 0)), None);
        assert_eq!(m.classify(at(17, 0)), None);
    }

    #[test]
    fn test_penalty_only_outside_windows() {
        let m = KillZoneManager::new(dec!(15));
        assert_eq!(m.penalty(at(8, 0)), Decimal::ZERO);
        assert_eq!(m.penalty(at(20, 0)), dec!(15));
    }
}
