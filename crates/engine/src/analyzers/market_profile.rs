//! Volume-at-price profile: point of control and the 70% value area.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use super::indicators::{from_f64, to_f64};
use super::{Analyzer, AnalysisInput, AnalyzerResult, DomainFindings};
use crate::config::LookbackConfig;
use crate::constants::VALUE_AREA_SHARE;
use crate::errors::EngineResult;
use crate::types::{Bias, Candle, Domain};

/// Binned volume between `low` and `high`.
#[derive(Debug, Clone)]
pub struct Profile {
    pub low: f64,
    pub bin_size: f64,
    pub volumes: Vec<f64>,
}

/// Bin indices and derived prices of the value area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueArea {
    pub poc_bin: usize,
    pub low_bin: usize,
    pub high_bin: usize,
    pub poc: f64,
    pub vah: f64,
    pub val: f64,
    /// Share of total volume inside [low_bin, high_bin].
    pub share: f64,
}

impl Profile {
    pub fn total(&self) -> f64 {
        self.volumes.iter().sum()
    }

    fn bin_low(&self, i: usize) -> f64 {
        self.low + self.bin_size * i as f64
    }

    /// Expand from the point of control one bin at a time toward the
    /// heavier neighbour until the area holds [`VALUE_AREA_SHARE`] of volume.
    pub fn value_area(&self) -> Option<ValueArea> {
        let total = self.total();
        if self.volumes.is_empty() || total <= 0.0 {
            return None;
        }
        // First maximum wins ties.
        let poc_bin = self
            .volumes
            .iter()
            .enumerate()
            .fold(0, |best, (i, v)| if *v > self.volumes[best] { i } else { best });

        let target = total * VALUE_AREA_SHARE;
        let (mut lo, mut hi) = (poc_bin, poc_bin);
        let mut acc = self.volumes[poc_bin];
        while acc < target && (lo > 0 || hi + 1 < self.volumes.len()) {
            let below = if lo > 0 { Some(self.volumes[lo - 1]) } else { None };
            let above = self.volumes.get(hi + 1).copied();
            match (below, above) {
                (Some(b), Some(a)) if a >= b => {
                    hi += 1;
                    acc += a;
                }
                (Some(b), _) => {
                    lo -= 1;
                    acc += b;
                }
                (None, Some(a)) => {
                    hi += 1;
                    acc += a;
                }
                (None, None) => break,
            }
        }

        Some(ValueArea {
            poc_bin,
            low_bin: lo,
            high_bin: hi,
            poc: self.bin_low(poc_bin) + self.bin_size / 2.0,
            val: self.bin_low(lo),
            vah: self.bin_low(hi + 1),
            share: acc / total,
        })
    }
}

/// Spread each candle's volume evenly over the bins its range covers. With
/// no volume at all every bin touched counts one (time-price opportunity).
pub fn build_profile(candles: &[Candle], bins: usize) -> Option<Profile> {
    let bins = bins.max(1);
    let high = candles.iter().map(|c| to_f64(c.high)).fold(f64::MIN, f64::max);
    let mut low = candles.iter().map(|c| to_f64(c.low)).fold(f64::MAX, f64::min);
    if candles.is_empty() || !high.is_finite() || !low.is_finite() {
        return None;
    }
    let mut span = high - low;
    if span <= 0.0 {
        // Flat series: pad a narrow range around the price.
        let pad = (high.abs() * 1e-4).max(1e-8);
        low -= pad;
        span = pad * 2.0;
    }
    let bin_size = span / bins as f64;
    let use_tpo = candles.iter().all(|c| c.volume.is_zero());

    let mut volumes = vec![0.0; bins];
    let index = |price: f64| (((price - low) / bin_size) as usize).min(bins - 1);
    for c in candles {
        let first = index(to_f64(c.low));
        let last = index(to_f64(c.high));
        let weight = if use_tpo { 1.0 } else { to_f64(c.volume) };
        let share = weight / (last - first + 1) as f64;
        for v in &mut volumes[first..=last] {
            *v += share;
        }
    }

    Some(Profile {
        low,
        bin_size,
        volumes,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuePosition {
    AboveValue,
    InValue,
    BelowValue,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketProfileFindings {
    pub poc: Decimal,
    pub value_area_high: Decimal,
    pub value_area_low: Decimal,
    pub value_area_share: Decimal,
    pub position: ValuePosition,
    /// Price relative to the point of control, in value-area widths.
    pub distance_from_poc: Decimal,
}

pub struct MarketProfileAnalyzer {
    min_bars: usize,
    lookback: usize,
    bins: usize,
}

impl MarketProfileAnalyzer {
    pub fn new(lookbacks: &LookbackConfig) -> Self {
        Self {
            min_bars: lookbacks.min_bars,
            lookback: lookbacks.market_profile,
            bins: lookbacks.profile_bins,
        }
    }
}

impl Analyzer for MarketProfileAnalyzer {
    fn domain(&self) -> Domain {
        Domain::MarketProfile
    }

    fn analyze(&self, input: &AnalysisInput) -> EngineResult<AnalyzerResult> {
        let Some(candles) = input.primary_window(self.min_bars, self.lookback) else {
            return Ok(AnalyzerResult::empty(Domain::MarketProfile));
        };
        let Some(area) = build_profile(candles, self.bins).and_then(|p| p.value_area()) else {
            return Ok(AnalyzerResult::empty(Domain::MarketProfile));
        };
        let Some(last) = candles.last() else {
            return Ok(AnalyzerResult::empty(Domain::MarketProfile));
        };

        let price = to_f64(last.close);
        let width = (area.vah - area.val).max(f64::EPSILON);
        let distance = (price - area.poc) / width;

        // Acceptance outside value continues; inside value leans toward the
        // side of the point of control price sits on.
        let (position, bias, score) = if price > area.vah {
            (ValuePosition::AboveValue, Bias::Bullish, 55.0 + (distance.min(1.5) * 20.0))
        } else if price < area.val {
            (ValuePosition::BelowValue, Bias::Bearish, 55.0 + ((-distance).min(1.5) * 20.0))
        } else if distance > 0.15 {
            (ValuePosition::InValue, Bias::Bullish, 35.0 + distance * 40.0)
        } else if distance < -0.15 {
            (ValuePosition::InValue, Bias::Bearish, 35.0 - distance * 40.0)
        } else {
            (ValuePosition::InValue, Bias::Neutral, 20.0)
        };

        Ok(AnalyzerResult::new(
            Domain::MarketProfile,
            from_f64(score),
            bias,
            DomainFindings::MarketProfile(MarketProfileFindings {
                poc: from_f64(area.poc),
                value_area_high: from_f64(area.vah),
                value_area_low: from_f64(area.val),
                value_area_share: from_f64(area.share).round_dp(4),
                position,
                distance_from_poc: from_f64(distance).round_dp(3).max(dec!(-99)).min(dec!(99)),
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use proptest::prelude::*;

    fn profile(volumes: Vec<f64>) -> Profile {
        Profile {
            low: 100.0,
            bin_size: 1.0,
            volumes,
        }
    }

    #[test]
    fn test_value_area_steps_toward_heavier_side() {
        let p = profile(vec![1.0, 2.0, 10.0, 30.0, 8.0, 5.0, 1.0]);
        let va = p.value_area().unwrap();
        assert_eq!(va.poc_bin, 3);
        // 30, then +10 from below = 40 >= 0.7 * 57.
        assert_eq!((va.low_bin, va.high_bin), (2, 3));
        assert!((va.poc - 103.5).abs() < 1e-9);
        assert!((va.val - 102.0).abs() < 1e-9);
        assert!((va.vah - 104.0).abs() < 1e-9);
        assert!(va.share >= VALUE_AREA_SHARE);
    }

    #[test]
    fn test_empty_profile_has_no_value_area() {
        assert!(profile(vec![0.0; 5]).value_area().is_none());
        assert!(build_profile(&[], 10).is_none());
    }

    #[test]
    fn test_flat_series_still_brackets_poc() {
        let mut candles = rising(60);
        for c in &mut candles {
            c.open = dec!(1.1);
            c.high = dec!(1.1);
            c.low = dec!(1.1);
            c.close = dec!(1.1);
        }
        let va = build_profile(&candles, 20).unwrap().value_area().unwrap();
        assert!(va.vah > va.val);
        assert!(va.val <= va.poc && va.poc <= va.vah);
    }

    #[test]
    fn test_zero_volume_falls_back_to_tpo() {
        let mut candles = rising(60);
        for c in &mut candles {
            c.volume = Decimal::ZERO;
        }
        let p = build_profile(&candles, 20).unwrap();
        assert!(p.total() > 59.0 && p.total() < 61.0);
    }

    #[test]
    fn test_rally_above_value_reads_bullish() {
        let result = MarketProfileAnalyzer::new(&LookbackConfig::default())
            .analyze(&input_with(rising(150)))
            .unwrap();
        let DomainFindings::MarketProfile(f) = &result.findings else {
            panic!("expected market profile findings");
        };
        assert_eq!(result.bias, Bias::Bullish);
        assert!(f.value_area_high > f.value_area_low);
    }

    proptest! {
        #[test]
        fn prop_value_area_brackets_poc(
            volumes in prop::collection::vec(0.0f64..1000.0, 1..60)
        ) {
            let p = profile(volumes.clone());
            let total: f64 = volumes.iter().sum();
            prop_assume!(total > 0.0);
            let va = p.value_area().unwrap();
            prop_assert!(va.vah > va.val);
            prop_assert!(va.val <= va.poc && va.poc <= va.vah);
            prop_assert!(va.share >= VALUE_AREA_SHARE - 1e-9);
            // Expansion stops at the first bin that reaches the target.
            if va.low_bin != va.high_bin {
                let edge = volumes[va.low_bin].max(volumes[va.high_bin]);
                prop_assert!(va.share - edge / total < VALUE_AREA_SHARE + 1e-9);
            }
        }
    }
}
