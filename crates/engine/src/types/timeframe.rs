use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle interval supported by the data layer.
///
/// Ordered shortest to longest so `BTreeMap<Timeframe, _>` iterates from the
/// entry timeframe up to the trend timeframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
}

impl Timeframe {
    /// All timeframes in ascending order.
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
        Timeframe::W1,
    ];

    /// The fixed set fetched for every analysis pass.
    pub const ANALYSIS_SET: [Timeframe; 4] =
        [Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1];

    /// Timeframe every analyzer treats as its primary series.
    pub const PRIMARY: Timeframe = Timeframe::H1;

    /// Short label used in logs, config files and cache keys.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::M5 => "M5",
            Self::M15 => "M15",
            Self::M30 => "M30",
            Self::H1 => "H1",
            Self::H4 => "H4",
            Self::D1 => "D1",
            Self::W1 => "W1",
        }
    }

    /// Interval string for `values`-style REST APIs.
    #[must_use]
    pub const fn as_rest_interval(&self) -> &'static str {
        match self {
            Self::M5 => "5min",
            Self::M15 => "15min",
            Self::M30 => "30min",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1day",
            Self::W1 => "1week",
        }
    }

    /// Interval string for klines-style REST APIs.
    #[must_use]
    pub const fn as_klines_interval(&self) -> &'static str {
        match self {
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
            Self::W1 => "1w",
        }
    }

    /// Duration in seconds.
    #[must_use]
    pub const fn duration_secs(&self) -> i64 {
        match self {
            Self::M5 => 300,
            Self::M15 => 900,
            Self::M30 => 1_800,
            Self::H1 => 3_600,
            Self::H4 => 14_400,
            Self::D1 => 86_400,
            Self::W1 => 604_800,
        }
    }

    /// Default number of bars fetched per analysis pass.
    #[must_use]
    pub const fn default_bar_count(&self) -> usize {
        match self {
            Self::M5 | Self::M15 | Self::M30 => 300,
            Self::H1 => 300,
            Self::H4 => 200,
            Self::D1 => 200,
            Self::W1 => 100,
        }
    }

    /// Whether this timeframe sets the higher-timeframe trend.
    #[must_use]
    pub const fn is_higher_tf(&self) -> bool {
        matches!(self, Self::H4 | Self::D1 | Self::W1)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "M5" | "5M" | "5MIN" => Ok(Self::M5),
            "M15" | "15M" | "15MIN" => Ok(Self::M15),
            "M30" | "30M" | "30MIN" => Ok(Self::M30),
            "H1" | "1H" => Ok(Self::H1),
            "H4" | "4H" => Ok(Self::H4),
            "D1" | "1D" | "1DAY" => Ok(Self::D1),
            "W1" | "1W" | "1WEEK" => Ok(Self::W1),
            other => Err(format!("unknown timeframe '{other}'")),
        }
    }
}
