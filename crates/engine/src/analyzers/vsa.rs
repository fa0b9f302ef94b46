//! Volume-spread analysis: bars where effort (volume) and result (spread)
//! disagree.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use super::{bias_from_votes, Analyzer, AnalysisInput, AnalyzerResult, DomainFindings};
use crate::config::LookbackConfig;
use crate::errors::EngineResult;
use crate::types::{Bias, Candle, Domain};

/// Recent bars inspected for signals; older bars only feed the averages.
const SIGNAL_WINDOW: usize = 10;
const HIGH_VOLUME: Decimal = dec!(1.5);
const CLIMAX_VOLUME: Decimal = dec!(2.0);
const LOW_VOLUME: Decimal = dec!(0.7);
const WIDE_SPREAD: Decimal = dec!(1.3);
const NARROW_SPREAD: Decimal = dec!(0.7);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VsaSignalKind {
    /// Narrow up-bar on low volume: buyers absent.
    NoDemand,
    /// Narrow down-bar on low volume: sellers absent.
    NoSupply,
    /// Heavy volume on a down-bar closing off its lows.
    StoppingVolume,
    /// Climactic volume on a wide up-bar closing weak.
    BuyingClimax,
    /// Climactic volume on a wide down-bar closing strong.
    SellingClimax,
    /// Heavy volume with a wide up-bar closing high.
    EffortUp,
    /// Heavy volume with a wide down-bar closing low.
    EffortDown,
}

impl VsaSignalKind {
    pub fn bias(&self) -> Bias {
        match self {
            Self::NoSupply | Self::StoppingVolume | Self::SellingClimax | Self::EffortUp => {
                Bias::Bullish
            }
            Self::NoDemand | Self::BuyingClimax | Self::EffortDown => Bias::Bearish,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VsaSignal {
    pub kind: VsaSignalKind,
    pub timestamp: i64,
    /// 0 for the latest bar.
    pub bars_ago: usize,
    pub volume_ratio: Decimal,
    pub spread_ratio: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct VsaFindings {
    pub signals: Vec<VsaSignal>,
    pub average_volume: Decimal,
    pub average_spread: Decimal,
}

fn classify(c: &Candle, volume_ratio: Decimal, spread_ratio: Decimal) -> Option<VsaSignalKind> {
    let close_loc = c.close_location();
    let wide = spread_ratio >= WIDE_SPREAD;
    let narrow = spread_ratio <= NARROW_SPREAD;

    if volume_ratio >= CLIMAX_VOLUME && wide {
        if c.is_bullish() && close_loc < dec!(0.5) {
            return Some(VsaSignalKind::BuyingClimax);
        }
        if c.is_bearish() && close_loc > dec!(0.5) {
            return Some(VsaSignalKind::SellingClimax);
        }
    }
    if volume_ratio >= HIGH_VOLUME {
        if c.is_bearish() && close_loc >= dec!(0.6) {
            return Some(VsaSignalKind::StoppingVolume);
        }
        if wide && c.is_bullish() && close_loc >= dec!(0.7) {
            return Some(VsaSignalKind::EffortUp);
        }
        if wide && c.is_bearish() && close_loc <= dec!(0.3) {
            return Some(VsaSignalKind::EffortDown);
        }
    }
    if volume_ratio <= LOW_VOLUME && narrow {
        if c.is_bullish() {
            return Some(VsaSignalKind::NoDemand);
        }
        if c.is_bearish() {
            return Some(VsaSignalKind::NoSupply);
        }
    }
    None
}

/// Signals among the last [`SIGNAL_WINDOW`] candles, measured against the
/// averages of the bars before them.
pub fn scan(candles: &[Candle]) -> (Vec<VsaSignal>, Decimal, Decimal) {
    let split = candles.len().saturating_sub(SIGNAL_WINDOW);
    let baseline = if split == 0 { candles } else { &candles[..split] };
    if baseline.is_empty() {
        return (Vec::new(), Decimal::ZERO, Decimal::ZERO);
    }
    let n = Decimal::from(baseline.len());
    let avg_volume = baseline.iter().map(|c| c.volume).sum::<Decimal>() / n;
    let avg_spread = baseline.iter().map(|c| c.spread()).sum::<Decimal>() / n;
    if avg_volume.is_zero() || avg_spread.is_zero() {
        return (Vec::new(), avg_volume, avg_spread);
    }

    let window = &candles[split..];
    let signals = window
        .iter()
        .enumerate()
        .filter_map(|(i, c)| {
            let volume_ratio = (c.volume / avg_volume).round_dp(3);
            let spread_ratio = (c.spread() / avg_spread).round_dp(3);
            classify(c, volume_ratio, spread_ratio).map(|kind| VsaSignal {
                kind,
                timestamp: c.timestamp,
                bars_ago: window.len() - 1 - i,
                volume_ratio,
                spread_ratio,
            })
        })
        .collect();
    (signals, avg_volume, avg_spread)
}

pub struct VsaAnalyzer {
    min_bars: usize,
    lookback: usize,
}

impl VsaAnalyzer {
    pub fn new(lookbacks: &LookbackConfig) -> Self {
        Self {
            min_bars: lookbacks.min_bars,
            lookback: lookbacks.vsa,
        }
    }
}

impl Analyzer for VsaAnalyzer {
    fn domain(&self) -> Domain {
        Domain::Vsa
    }

    fn analyze(&self, input: &AnalysisInput) -> EngineResult<AnalyzerResult> {
        let Some(candles) = input.primary_window(self.min_bars, self.lookback) else {
            return Ok(AnalyzerResult::empty(Domain::Vsa));
        };

        let (signals, average_volume, average_spread) = scan(candles);

        // Later bars weigh more.
        let votes: Vec<(Bias, Decimal)> = signals
            .iter()
            .map(|s| {
                let weight = SIGNAL_WINDOW.saturating_sub(s.bars_ago).max(1);
                (s.kind.bias(), Decimal::from(weight))
            })
            .collect();
        let (bias, net) = bias_from_votes(&votes, dec!(0.2));

        let score = if bias == Bias::Neutral {
            Decimal::from(signals.len().min(3)) * dec!(5)
        } else {
            let aligned = signals.iter().filter(|s| s.kind.bias() == bias).count();
            dec!(30) + net.abs() * dec!(30) + Decimal::from(aligned.min(4)) * dec!(10)
        };

        Ok(AnalyzerResult::new(
            Domain::Vsa,
            score,
            bias,
            DomainFindings::Vsa(VsaFindings {
                signals,
                average_volume: average_volume.round_dp(2),
                average_spread: average_spread.round_dp(6),
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn bar(open: Decimal, high: Decimal, low: Decimal, close: Decimal, volume: Decimal) -> Candle {
        Candle {
            timestamp: T0,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn test_classify_no_demand_and_no_supply() {
        let up = bar(dec!(1.0), dec!(1.02), dec!(0.99), dec!(1.01), dec!(500));
        assert_eq!(classify(&up, dec!(0.5), dec!(0.5)), Some(VsaSignalKind::NoDemand));
        let down = bar(dec!(1.01), dec!(1.02), dec!(0.99), dec!(1.0), dec!(500));
        assert_eq!(classify(&down, dec!(0.5), dec!(0.5)), Some(VsaSignalKind::NoSupply));
    }

    #[test]
    fn test_classify_climaxes() {
        // Wide up-bar closing in its lower half on double volume.
        let bc = bar(dec!(1.00), dec!(1.10), dec!(0.99), dec!(1.03), dec!(3000));
        assert_eq!(classify(&bc, dec!(2.5), dec!(2.0)), Some(VsaSignalKind::BuyingClimax));
        let sc = bar(dec!(1.10), dec!(1.11), dec!(1.00), dec!(1.08), dec!(3000));
        assert_eq!(classify(&sc, dec!(2.5), dec!(2.0)), Some(VsaSignalKind::SellingClimax));
    }

    #[test]
    fn test_average_bars_give_no_signal() {
        let c = bar(dec!(1.0), dec!(1.02), dec!(0.99), dec!(1.01), dec!(1000));
        assert_eq!(classify(&c, dec!(1.0), dec!(1.0)), None);
    }

    #[test]
    fn test_selling_climax_on_final_bar() {
        let mut candles = falling(60);
        let last = candles.len() - 1;
        let c = &mut candles[last];
        // Wide down bar with a long lower tail on triple volume.
        c.open = c.close + dec!(0.0010);
        c.high = c.open + dec!(0.0002);
        c.low = c.close - dec!(0.0080);
        c.volume = dec!(4000);

        let result = VsaAnalyzer::new(&LookbackConfig::default())
            .analyze(&input_with(candles))
            .unwrap();
        let DomainFindings::Vsa(f) = &result.findings else {
            panic!("expected vsa findings");
        };
        let last_signal = f.signals.last().expect("signal on final bar");
        assert_eq!(last_signal.kind, VsaSignalKind::SellingClimax);
        assert_eq!(last_signal.bars_ago, 0);
        assert!(last_signal.volume_ratio > dec!(3));
    }

    #[test]
    fn test_stopping_volume_on_ordinary_spread() {
        let c = bar(dec!(1.010), dec!(1.012), dec!(1.000), dec!(1.009), dec!(2000));
        assert_eq!(classify(&c, dec!(1.8), dec!(1.0)), Some(VsaSignalKind::StoppingVolume));
    }

    #[test]
    fn test_zero_volume_series_is_quiet() {
        let mut candles = rising(60);
        for c in &mut candles {
            c.volume = Decimal::ZERO;
        }
        let (signals, avg_volume, _) = scan(&candles);
        assert!(signals.is_empty());
        assert_eq!(avg_volume, Decimal::ZERO);
    }
}
