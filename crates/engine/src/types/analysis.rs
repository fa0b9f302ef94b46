use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the ten analysis methodologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Smc,
    Technical,
    Wyckoff,
    Elliott,
    Vsa,
    MarketProfile,
    OrderFlow,
    Intermarket,
    Fundamental,
    Sentiment,
}

impl Domain {
    pub const ALL: [Domain; 10] = [
        Domain::Smc,
        Domain::Technical,
        Domain::Wyckoff,
        Domain::Elliott,
        Domain::Vsa,
        Domain::MarketProfile,
        Domain::OrderFlow,
        Domain::Intermarket,
        Domain::Fundamental,
        Domain::Sentiment,
    ];

    /// Layers that must pass individually for a signal to be valid.
    pub const CRITICAL: [Domain; 3] = [Domain::Smc, Domain::Technical, Domain::Fundamental];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Smc => "smc",
            Self::Technical => "technical",
            Self::Wyckoff => "wyckoff",
            Self::Elliott => "elliott",
            Self::Vsa => "vsa",
            Self::MarketProfile => "market_profile",
            Self::OrderFlow => "order_flow",
            Self::Intermarket => "intermarket",
            Self::Fundamental => "fundamental",
            Self::Sentiment => "sentiment",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Domain::ALL
            .into_iter()
            .find(|d| d.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("unknown analysis domain '{s}'"))
    }
}

/// Directional lean reported by an analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Bias {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl Bias {
    /// +1 bullish, -1 bearish, 0 neutral.
    #[must_use]
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Bullish => dec!(1),
            Self::Bearish => dec!(-1),
            Self::Neutral => Decimal::ZERO,
        }
    }

    /// Bias from a signed net score with a neutral deadband of `threshold`.
    #[must_use]
    pub fn from_net(net: Decimal, threshold: Decimal) -> Self {
        if net > threshold {
            Self::Bullish
        } else if net < -threshold {
            Self::Bearish
        } else {
            Self::Neutral
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bullish => "bullish",
            Self::Bearish => "bearish",
            Self::Neutral => "neutral",
        }
    }

    #[must_use]
    pub fn opposite(&self) -> Self {
        match self {
            Self::Bullish => Self::Bearish,
            Self::Bearish => Self::Bullish,
            Self::Neutral => Self::Neutral,
        }
    }

    /// Whether this bias supports trading in `direction`.
    #[must_use]
    pub fn agrees_with(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Self::Bullish, Direction::Buy) | (Self::Bearish, Direction::Sell)
        )
    }

    /// Whether this bias argues against trading in `direction`.
    #[must_use]
    pub fn opposes(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Self::Bearish, Direction::Buy) | (Self::Bullish, Direction::Sell)
        )
    }
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade direction of a proposed or emitted signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    #[must_use]
    pub fn is_buy(&self) -> bool {
        matches!(self, Self::Buy)
    }

    /// +1 for buy, -1 for sell; multiplies a price distance into the
    /// direction of profit.
    #[must_use]
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Buy => dec!(1),
            Self::Sell => dec!(-1),
        }
    }

    #[must_use]
    pub fn bias(&self) -> Bias {
        match self {
            Self::Buy => Bias::Bullish,
            Self::Sell => Bias::Bearish,
        }
    }

    #[must_use]
    pub fn from_bias(bias: Bias) -> Option<Self> {
        match bias {
            Bias::Bullish => Some(Self::Buy),
            Bias::Bearish => Some(Self::Sell),
            Bias::Neutral => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp a score into `[0, 100]`.
#[must_use]
pub fn clamp_score(score: Decimal) -> Decimal {
    score.clamp(Decimal::ZERO, dec!(100))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_roundtrip_str() {
        for d in Domain::ALL {
            assert_eq!(d.as_str().parse::<Domain>(), Ok(d));
        }
        assert!("astrology".parse::<Domain>().is_err());
    }

    #[test]
    fn test_bias_from_net() {
        assert_eq!(Bias::from_net(dec!(0.3), dec!(0.1)), Bias::Bullish);
        assert_eq!(Bias::from_net(dec!(-0.3), dec!(0.1)), Bias::Bearish);
        assert_eq!(Bias::from_net(dec!(0.05), dec!(0.1)), Bias::Neutral);
    }

    #[test]
    fn test_bias_direction_agreement() {
        assert!(Bias::Bullish.agrees_with(Direction::Buy));
        assert!(Bias::Bearish.opposes(Direction::Buy));
        assert!(!Bias::Neutral.agrees_with(Direction::Sell));
        assert!(!Bias::Neutral.opposes(Direction::Sell));
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(dec!(-5)), dec!(0));
        assert_eq!(clamp_score(dec!(130)), dec!(100));
        assert_eq!(clamp_score(dec!(42.5)), dec!(42.5));
    }
}
