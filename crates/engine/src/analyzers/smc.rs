//! Smart Money Concepts: order blocks, fair value gaps, liquidity pools,
//! break of structure / change of character and premium/discount zones.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use super::swings::{find_swings, highs_of, lows_of, structure_bias, SwingKind, SwingPoint};
use super::{bias_from_votes, Analyzer, AnalysisInput, AnalyzerResult, DomainFindings};
use crate::config::LookbackConfig;
use crate::constants::{DISCOUNT_THRESHOLD, PREMIUM_THRESHOLD};
use crate::errors::EngineResult;
use crate::types::{Bias, Candle, Domain};

/// Impulse body must exceed the window's mean body by this factor.
const IMPULSE_BODY_FACTOR: Decimal = dec!(2);
/// Relative distance under which two swing levels count as equal.
const EQUAL_LEVEL_TOLERANCE: Decimal = dec!(0.0005);

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrderBlock {
    pub bias: Bias,
    pub high: Decimal,
    pub low: Decimal,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FairValueGap {
    pub bias: Bias,
    pub high: Decimal,
    pub low: Decimal,
    /// Timestamp of the middle candle.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityKind {
    EqualHighs,
    EqualLows,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LiquidityPool {
    pub kind: LiquidityKind,
    pub price: Decimal,
    pub touches: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// Break of structure in the trend direction.
    Bos,
    /// Change of character against the prior trend.
    Choch,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StructureBreak {
    pub kind: BreakKind,
    pub bias: Bias,
    pub level: Decimal,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceZone {
    Premium,
    Equilibrium,
    Discount,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ZoneReading {
    pub zone: PriceZone,
    pub range_high: Decimal,
    pub range_low: Decimal,
    pub equilibrium: Decimal,
    /// Position of the last close in the range, 0 = low, 1 = high.
    pub position: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmcFindings {
    pub structure: Bias,
    pub breaks: Vec<StructureBreak>,
    /// Unmitigated blocks, oldest first.
    pub order_blocks: Vec<OrderBlock>,
    /// Unfilled gaps, oldest first.
    pub fair_value_gaps: Vec<FairValueGap>,
    pub liquidity: Vec<LiquidityPool>,
    pub zone: Option<ZoneReading>,
}

impl SmcFindings {
    /// Most recent unmitigated block with the given bias.
    pub fn latest_block(&self, bias: Bias) -> Option<&OrderBlock> {
        self.order_blocks.iter().rev().find(|b| b.bias == bias)
    }

    pub fn has_gap(&self, bias: Bias) -> bool {
        self.fair_value_gaps.iter().any(|g| g.bias == bias)
    }
}

/// Order blocks: the last opposite candle before a disproportionate move
/// that closes beyond it. A block is dropped once a later candle trades
/// back to its far extreme.
pub fn find_order_blocks(candles: &[Candle]) -> Vec<OrderBlock> {
    if candles.len() < 3 {
        return Vec::new();
    }
    let mean_body = candles.iter().map(Candle::body).sum::<Decimal>()
        / Decimal::from(candles.len() as u64);
    if mean_body.is_zero() {
        return Vec::new();
    }
    let threshold = mean_body * IMPULSE_BODY_FACTOR;

    let mut blocks = Vec::new();
    for i in 0..candles.len() - 1 {
        let (ob, impulse) = (&candles[i], &candles[i + 1]);
        if impulse.body() < threshold {
            continue;
        }
        let bias = if ob.is_bearish() && impulse.is_bullish() && impulse.close > ob.high {
            Bias::Bullish
        } else if ob.is_bullish() && impulse.is_bearish() && impulse.close < ob.low {
            Bias::Bearish
        } else {
            continue;
        };

        let later = &candles[i + 2..];
        let mitigated = match bias {
            Bias::Bullish => later.iter().any(|c| c.low <= ob.low),
            _ => later.iter().any(|c| c.high >= ob.high),
        };
        if !mitigated {
            blocks.push(OrderBlock {
                bias,
                high: ob.high,
                low: ob.low,
                timestamp: ob.timestamp,
            });
        }
    }
    blocks
}

/// Three-candle fair value gaps still open at the end of the series.
///
/// Bullish when candle 1's high is below candle 3's low (gap between them);
/// removed once any later candle's low reaches candle 1's high. Bearish
/// mirrors this.
pub fn find_fair_value_gaps(candles: &[Candle]) -> Vec<FairValueGap> {
    let mut gaps = Vec::new();
    for i in 2..candles.len() {
        let (first, middle, third) = (&candles[i - 2], &candles[i - 1], &candles[i]);
        let later = &candles[i + 1..];

        if first.high < third.low {
            if !later.iter().any(|c| c.low <= first.high) {
                gaps.push(FairValueGap {
                    bias: Bias::Bullish,
                    low: first.high,
                    high: third.low,
                    timestamp: middle.timestamp,
                });
            }
        } else if first.low > third.high && !later.iter().any(|c| c.high >= first.low) {
            gaps.push(FairValueGap {
                bias: Bias::Bearish,
                low: third.high,
                high: first.low,
                timestamp: middle.timestamp,
            });
        }
    }
    gaps
}

/// Equal highs / equal lows among swing points.
pub fn find_liquidity_pools(swings: &[SwingPoint]) -> Vec<LiquidityPool> {
    let mut pools = Vec::new();
    for (kind, points) in [
        (LiquidityKind::EqualHighs, highs_of(swings).collect::<Vec<_>>()),
        (LiquidityKind::EqualLows, lows_of(swings).collect::<Vec<_>>()),
    ] {
        let mut used = vec![false; points.len()];
        for i in 0..points.len() {
            if used[i] {
                continue;
            }
            let anchor = points[i].price;
            let tolerance = anchor.abs() * EQUAL_LEVEL_TOLERANCE;
            let cluster: Vec<usize> = (i..points.len())
                .filter(|&j| !used[j] && (points[j].price - anchor).abs() <= tolerance)
                .collect();
            if cluster.len() >= 2 {
                let sum: Decimal = cluster.iter().map(|&j| points[j].price).sum();
                pools.push(LiquidityPool {
                    kind,
                    price: sum / Decimal::from(cluster.len() as u64),
                    touches: cluster.len(),
                });
                for j in cluster {
                    used[j] = true;
                }
            }
        }
    }
    pools
}

/// Walk the series and record every close beyond the most recent unbroken
/// swing level. A break against the running trend is a change of character.
pub fn find_structure_breaks(
    candles: &[Candle],
    swings: &[SwingPoint],
    strength: usize,
) -> Vec<StructureBreak> {
    let mut breaks = Vec::new();
    let mut trend = Bias::Neutral;
    let mut last_high: Option<Decimal> = None;
    let mut last_low: Option<Decimal> = None;
    let mut next_swing = 0;

    for (i, c) in candles.iter().enumerate() {
        // A swing is only known `strength` bars after it prints.
        while next_swing < swings.len() && swings[next_swing].index + strength <= i {
            let s = &swings[next_swing];
            match s.kind {
                SwingKind::High => last_high = Some(s.price),
                SwingKind::Low => last_low = Some(s.price),
            }
            next_swing += 1;
        }

        if let Some(level) = last_high {
            if c.close > level {
                breaks.push(StructureBreak {
                    kind: if trend == Bias::Bearish { BreakKind::Choch } else { BreakKind::Bos },
                    bias: Bias::Bullish,
                    level,
                    timestamp: c.timestamp,
                });
                trend = Bias::Bullish;
                last_high = None;
            }
        }
        if let Some(level) = last_low {
            if c.close < level {
                breaks.push(StructureBreak {
                    kind: if trend == Bias::Bullish { BreakKind::Choch } else { BreakKind::Bos },
                    bias: Bias::Bearish,
                    level,
                    timestamp: c.timestamp,
                });
                trend = Bias::Bearish;
                last_low = None;
            }
        }
    }
    breaks
}

/// Premium above 70% of the range, discount below 30%.
pub fn price_zone(candles: &[Candle]) -> Option<ZoneReading> {
    let range_high = candles.iter().map(|c| c.high).max()?;
    let range_low = candles.iter().map(|c| c.low).min()?;
    let close = candles.last()?.close;
    let span = range_high - range_low;
    if span.is_zero() {
        return None;
    }
    let position = (close - range_low) / span;
    let zone = if position > PREMIUM_THRESHOLD {
        PriceZone::Premium
    } else if position < DISCOUNT_THRESHOLD {
        PriceZone::Discount
    } else {
        PriceZone::Equilibrium
    };
    Some(ZoneReading {
        zone,
        range_high,
        range_low,
        equilibrium: (range_high + range_low) / dec!(2),
        position: position.round_dp(4),
    })
}

pub struct SmcAnalyzer {
    min_bars: usize,
    lookback: usize,
    swing_strength: usize,
}

impl SmcAnalyzer {
    pub fn new(lookbacks: &LookbackConfig) -> Self {
        Self {
            min_bars: lookbacks.min_bars,
            lookback: lookbacks.smc,
            swing_strength: lookbacks.swing_strength,
        }
    }
}

impl Analyzer for SmcAnalyzer {
    fn domain(&self) -> Domain {
        Domain::Smc
    }

    fn analyze(&self, input: &AnalysisInput) -> EngineResult<AnalyzerResult> {
        let Some(candles) = input.primary_window(self.min_bars, self.lookback) else {
            return Ok(AnalyzerResult::empty(Domain::Smc));
        };

        let swings = find_swings(candles, self.swing_strength);
        let breaks = find_structure_breaks(candles, &swings, self.swing_strength);
        let order_blocks = find_order_blocks(candles);
        let fair_value_gaps = find_fair_value_gaps(candles);
        let liquidity = find_liquidity_pools(&swings);
        let zone = price_zone(candles);

        // Latest break defines structure; fall back to swing sequence.
        let structure = breaks
            .last()
            .map(|b| b.bias)
            .unwrap_or_else(|| structure_bias(&swings));

        let count = |bias: Bias, n: usize| (bias, Decimal::from(n as u64));
        let bull_blocks = order_blocks.iter().filter(|b| b.bias == Bias::Bullish).count();
        let bear_blocks = order_blocks.len() - bull_blocks;
        let bull_gaps = fair_value_gaps.iter().filter(|g| g.bias == Bias::Bullish).count();
        let bear_gaps = fair_value_gaps.len() - bull_gaps;

        let mut votes = vec![
            (structure, dec!(3)),
            count(Bias::Bullish, bull_blocks.min(2)),
            count(Bias::Bearish, bear_blocks.min(2)),
            count(Bias::Bullish, bull_gaps.min(2)),
            count(Bias::Bearish, bear_gaps.min(2)),
        ];
        if let Some(z) = &zone {
            match z.zone {
                PriceZone::Discount => votes.push((Bias::Bullish, dec!(1))),
                PriceZone::Premium => votes.push((Bias::Bearish, dec!(1))),
                PriceZone::Equilibrium => {}
            }
        }
        let (bias, _) = bias_from_votes(&votes, dec!(0.2));

        let findings = SmcFindings {
            structure,
            breaks,
            order_blocks,
            fair_value_gaps,
            liquidity,
            zone,
        };

        let mut score = Decimal::ZERO;
        if bias != Bias::Neutral {
            if findings.structure == bias {
                score += dec!(30);
            }
            if findings.latest_block(bias).is_some() {
                score += dec!(20);
            }
            if findings.has_gap(bias) {
                score += dec!(20);
            }
            if !findings.liquidity.is_empty() {
                score += dec!(10);
            }
            score += match (bias, findings.zone.map(|z| z.zone)) {
                (Bias::Bullish, Some(PriceZone::Discount))
                | (Bias::Bearish, Some(PriceZone::Premium)) => dec!(20),
                (_, Some(PriceZone::Equilibrium)) => dec!(10),
                _ => Decimal::ZERO,
            };
        } else if !findings.liquidity.is_empty() {
            score += dec!(10);
        }

        Ok(AnalyzerResult::new(Domain::Smc, score, bias, DomainFindings::Smc(findings)))
    }
}
