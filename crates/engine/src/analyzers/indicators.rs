//! Pure indicator math shared by the analyzers.
//!
//! No I/O, no side effects. Price-level indicators (EMA, RSI, MACD,
//! Bollinger, ATR) stay in `Decimal`; statistical routines (Hurst, return
//! volatility, regression, correlation) work in `f64` and convert back at the
//! boundary where a price is returned.
//!
//! References:
//!     Wilder (1978), "New Concepts in Technical Trading Systems".
//!     Hurst (1951), "Long-term storage capacity of reservoirs".

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::config::IndicatorParams;
use crate::types::market_data::{closes, highs, lows};
use crate::types::Candle;

// ═══════════════════════════════════════════════════════════════════════════
// Moving averages and oscillators
// ═══════════════════════════════════════════════════════════════════════════

/// Simple moving average of the last `period` values.
pub fn sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().copied().sum::<Decimal>() / Decimal::from(period as u64))
}

/// Exponential Moving Average.
///
/// Multiplier `k = 2 / (period + 1)`. First value seeded with SMA of the
/// first `period` prices, so the output has `len - period + 1` values.
/// Returns empty `Vec` if insufficient data.
pub fn ema(prices: &[Decimal], period: usize) -> Vec<Decimal> {
    if prices.len() < period || period == 0 {
        return Vec::new();
    }

    let k = dec!(2) / Decimal::from(period as u64 + 1);
    let one_minus_k = dec!(1) - k;

    let seed: Decimal =
        prices[..period].iter().copied().sum::<Decimal>() / Decimal::from(period as u64);

    let mut result = Vec::with_capacity(prices.len() - period + 1);
    result.push(seed);

    let mut prev = seed;
    for &price in &prices[period..] {
        prev = price * k + prev * one_minus_k;
        result.push(prev);
    }

    result
}

/// RSI series with Wilder's smoothing (factor `1/period`).
///
/// One value per price from index `period` onward. Both averages zero
/// (flat prices) reads as 50.
pub fn rsi_series(prices: &[Decimal], period: usize) -> Vec<Decimal> {
    if prices.len() < period + 1 || period == 0 {
        return Vec::new();
    }

    let period_d = Decimal::from(period as u64);
    let period_minus_1 = Decimal::from(period as u64 - 1);

    let changes: Vec<Decimal> = prices.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = changes[..period]
        .iter()
        .map(|&c| c.max(Decimal::ZERO))
        .sum::<Decimal>()
        / period_d;
    let mut avg_loss = changes[..period]
        .iter()
        .map(|&c| (-c).max(Decimal::ZERO))
        .sum::<Decimal>()
        / period_d;

    let mut out = Vec::with_capacity(changes.len() - period + 1);
    out.push(rsi_from_averages(avg_gain, avg_loss));

    for &c in &changes[period..] {
        let gain = c.max(Decimal::ZERO);
        let loss = (-c).max(Decimal::ZERO);
        avg_gain = (avg_gain * period_minus_1 + gain) / period_d;
        avg_loss = (avg_loss * period_minus_1 + loss) / period_d;
        out.push(rsi_from_averages(avg_gain, avg_loss));
    }

    out
}

fn rsi_from_averages(avg_gain: Decimal, avg_loss: Decimal) -> Decimal {
    if avg_loss.is_zero() {
        return if avg_gain.is_zero() { dec!(50) } else { dec!(100) };
    }
    let rs = avg_gain / avg_loss;
    dec!(100) - dec!(100) / (dec!(1) + rs)
}

/// Latest RSI. Returns 50 if insufficient data.
pub fn rsi(prices: &[Decimal], period: usize) -> Decimal {
    rsi_series(prices, period).last().copied().unwrap_or(dec!(50))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MacdReading {
    pub line: Decimal,
    pub signal: Decimal,
    pub histogram: Decimal,
}

/// Moving Average Convergence Divergence. Zeros if insufficient data.
pub fn macd(prices: &[Decimal], fast: usize, slow: usize, signal: usize) -> MacdReading {
    if fast >= slow || prices.len() < slow + signal {
        return MacdReading::default();
    }

    let fast_ema = ema(prices, fast);
    let slow_ema = ema(prices, slow);
    if fast_ema.is_empty() || slow_ema.is_empty() {
        return MacdReading::default();
    }

    // Align from the slow EMA's first value onward.
    let offset = slow - fast;
    let macd_values: Vec<Decimal> = (0..slow_ema.len())
        .map(|i| fast_ema[i + offset] - slow_ema[i])
        .collect();

    let signal_ema = ema(&macd_values, signal);
    match (macd_values.last(), signal_ema.last()) {
        (Some(&line), Some(&signal)) => MacdReading {
            line,
            signal,
            histogram: line - signal,
        },
        _ => MacdReading::default(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Bands {
    pub upper: Decimal,
    pub middle: Decimal,
    pub lower: Decimal,
}

impl Bands {
    /// Position of `price` within the bands: 0 at lower, 1 at upper.
    pub fn percent_b(&self, price: Decimal) -> Decimal {
        let width = self.upper - self.lower;
        if width.is_zero() {
            return dec!(0.5);
        }
        (price - self.lower) / width
    }
}

/// Bollinger Bands (SMA with population standard deviation). Falls back to
/// the last price on all three bands if insufficient data.
pub fn bollinger_bands(prices: &[Decimal], period: usize, std_mult: Decimal) -> Bands {
    let fallback = prices.last().copied().unwrap_or(Decimal::ZERO);
    let Some(middle) = sma(prices, period) else {
        return Bands {
            upper: fallback,
            middle: fallback,
            lower: fallback,
        };
    };

    let window = &prices[prices.len() - period..];
    let variance: Decimal = window
        .iter()
        .map(|&p| {
            let diff = p - middle;
            diff * diff
        })
        .sum::<Decimal>()
        / Decimal::from(period as u64);

    let std_dev = variance.sqrt().unwrap_or(Decimal::ZERO);
    Bands {
        upper: middle + std_mult * std_dev,
        middle,
        lower: middle - std_mult * std_dev,
    }
}

/// True ranges from the second candle on.
fn true_ranges(candles: &[Candle]) -> Vec<Decimal> {
    candles
        .windows(2)
        .map(|w| {
            let (prev, cur) = (&w[0], &w[1]);
            let hl = cur.high - cur.low;
            let hc = (cur.high - prev.close).abs();
            let lc = (cur.low - prev.close).abs();
            hl.max(hc).max(lc)
        })
        .collect()
}

/// Average True Range series (Wilder's smoothing).
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<Decimal> {
    if period == 0 || candles.len() < period + 1 {
        return Vec::new();
    }
    let trs = true_ranges(candles);
    let period_d = Decimal::from(period as u64);
    let period_m1 = Decimal::from(period as u64 - 1);

    let mut value: Decimal = trs[..period].iter().copied().sum::<Decimal>() / period_d;
    let mut out = Vec::with_capacity(trs.len() - period + 1);
    out.push(value);
    for &tr in &trs[period..] {
        value = (value * period_m1 + tr) / period_d;
        out.push(value);
    }
    out
}

/// Latest ATR, zero if insufficient data.
pub fn atr(candles: &[Candle], period: usize) -> Decimal {
    atr_series(candles, period).last().copied().unwrap_or(Decimal::ZERO)
}

/// Current ATR relative to its mean over the last `window` readings.
/// 1.0 when there is not enough history.
pub fn atr_ratio(candles: &[Candle], period: usize, window: usize) -> Decimal {
    let series = atr_series(candles, period);
    if series.len() < window || window == 0 {
        return dec!(1);
    }
    let recent = &series[series.len() - window..];
    let mean = recent.iter().copied().sum::<Decimal>() / Decimal::from(window as u64);
    match series.last() {
        Some(&current) if !mean.is_zero() => current / mean,
        _ => dec!(1),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Statistical helpers (f64)
// ═══════════════════════════════════════════════════════════════════════════

pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

pub fn from_f64(value: f64) -> Decimal {
    if !value.is_finite() {
        return Decimal::ZERO;
    }
    Decimal::from_f64((value * 1e8).round() / 1e8).unwrap_or(Decimal::ZERO)
}

/// Log returns, skipping non-positive prices.
pub fn log_returns(prices: &[Decimal]) -> Vec<f64> {
    prices
        .windows(2)
        .filter_map(|w| {
            let prev = to_f64(w[0]);
            let cur = to_f64(w[1]);
            (prev > 0.0 && cur > 0.0).then(|| (cur / prev).ln())
        })
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation; 0 for fewer than two values.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Standard deviation of log returns over the last `window` closes.
pub fn return_volatility(prices: &[Decimal], window: usize) -> f64 {
    let start = prices.len().saturating_sub(window);
    std_dev(&log_returns(&prices[start..]))
}

/// Least-squares fit of `values` against their index.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

pub fn linear_regression(values: &[f64]) -> LinearFit {
    let n = values.len();
    if n < 2 {
        return LinearFit::default();
    }
    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = mean(values);

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 {
        return LinearFit::default();
    }
    let slope = sxy / sxx;
    let r_squared = if syy == 0.0 {
        0.0
    } else {
        (sxy * sxy) / (sxx * syy)
    };
    LinearFit {
        slope,
        intercept: mean_y - slope * mean_x,
        r_squared,
    }
}

/// Pearson correlation over the common tail of `a` and `b`.
pub fn correlation(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 3 {
        return None;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];
    let (ma, mb) = (mean(a), mean(b));
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    if va == 0.0 || vb == 0.0 {
        return None;
    }
    Some((cov / (va.sqrt() * vb.sqrt())).clamp(-1.0, 1.0))
}

/// Kaufman efficiency ratio: net move over path length, in [0, 1].
pub fn efficiency_ratio(prices: &[Decimal]) -> f64 {
    if prices.len() < 2 {
        return 0.0;
    }
    let path: Decimal = prices.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    if path.is_zero() {
        return 0.0;
    }
    let net = (prices[prices.len() - 1] - prices[0]).abs();
    to_f64(net / path)
}

// ═══════════════════════════════════════════════════════════════════════════
// Regime
// ═══════════════════════════════════════════════════════════════════════════

/// Rescaled range (R/S) Hurst exponent.
///
/// H > 0.55 → persistent / trending
/// H < 0.45 → anti-persistent / mean-reverting
/// 0.45 ≤ H ≤ 0.55 → random walk
///
/// Returns `0.5` when there is insufficient data (< 20 returns).
pub fn hurst_exponent(prices: &[Decimal], max_lag: usize) -> Decimal {
    let log_returns = log_returns(prices);
    if log_returns.len() < 20 {
        return dec!(0.5);
    }

    let n = log_returns.len();
    let upper_lag = max_lag.min(n / 2);
    if upper_lag < 2 {
        return dec!(0.5);
    }

    let mut log_rs_values: Vec<f64> = Vec::new();
    let mut log_n_values: Vec<f64> = Vec::new();

    for lag in 2..=upper_lag {
        let mut rs_list: Vec<f64> = Vec::new();

        for chunk in log_returns.chunks_exact(lag) {
            let mean_val = mean(chunk);

            let mut running = 0.0_f64;
            let mut max_dev = f64::NEG_INFINITY;
            let mut min_dev = f64::INFINITY;
            for &val in chunk {
                running += val - mean_val;
                max_dev = max_dev.max(running);
                min_dev = min_dev.min(running);
            }
            let r = max_dev - min_dev;

            let var = chunk.iter().map(|&x| (x - mean_val).powi(2)).sum::<f64>() / lag as f64;
            let s = if var > 0.0 { var.sqrt() } else { 1e-10 };
            rs_list.push(r / s);
        }

        let avg_rs = mean(&rs_list);
        if avg_rs > 0.0 {
            log_rs_values.push(avg_rs.ln());
            log_n_values.push((lag as f64).ln());
        }
    }

    if log_rs_values.len() < 2 {
        return dec!(0.5);
    }

    // log(R/S) = H * log(n) + c, slope = H.
    let mean_x = mean(&log_n_values);
    let mean_y = mean(&log_rs_values);
    let numerator: f64 = log_n_values
        .iter()
        .zip(&log_rs_values)
        .map(|(&x, &y)| (x - mean_x) * (y - mean_y))
        .sum();
    let denominator: f64 = log_n_values.iter().map(|&x| (x - mean_x).powi(2)).sum();
    if denominator == 0.0 {
        return dec!(0.5);
    }

    let h = (numerator / denominator).clamp(0.0, 1.0);
    Decimal::from_f64((h * 1_000_000.0).round() / 1_000_000.0).unwrap_or(dec!(0.5))
}

// ═══════════════════════════════════════════════════════════════════════════
// Composite
// ═══════════════════════════════════════════════════════════════════════════

/// Every standard indicator for one series.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndicatorSnapshot {
    pub price: Decimal,
    pub ema_fast: Decimal,
    pub ema_slow: Decimal,
    pub ema_trend: Decimal,
    pub rsi: Decimal,
    pub macd: MacdReading,
    pub bollinger: Bands,
    pub atr: Decimal,
    /// Current ATR over its 50-reading mean.
    pub atr_ratio: Decimal,
    pub hurst: Decimal,
}

pub fn compute_snapshot(candles: &[Candle], params: &IndicatorParams) -> IndicatorSnapshot {
    let closes = closes(candles);
    let price = closes.last().copied().unwrap_or(Decimal::ZERO);
    let last_or_price = |v: Vec<Decimal>| v.last().copied().unwrap_or(price);

    IndicatorSnapshot {
        price,
        ema_fast: last_or_price(ema(&closes, params.ema_fast)),
        ema_slow: last_or_price(ema(&closes, params.ema_slow)),
        ema_trend: last_or_price(ema(&closes, params.ema_trend)),
        rsi: rsi(&closes, params.rsi_period),
        macd: macd(&closes, params.macd_fast, params.macd_slow, params.macd_signal),
        bollinger: bollinger_bands(&closes, params.bb_period, params.bb_std),
        atr: atr(candles, params.atr_period),
        atr_ratio: atr_ratio(candles, params.atr_period, 50),
        hurst: hurst_exponent(&closes, params.hurst_max_lag),
    }
}

/// Highest high and lowest low of `candles`.
pub fn range_extremes(candles: &[Candle]) -> Option<(Decimal, Decimal)> {
    let high = highs(candles).into_iter().max()?;
    let low = lows(candles).into_iter().min()?;
    Some((high, low))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn candle(close: Decimal, spread: Decimal) -> Candle {
        Candle {
            timestamp: 0,
            open: close,
            high: close + spread,
            low: close - spread,
            close,
            volume: dec!(1),
        }
    }

    #[test]
    fn test_ema_seed_and_length() {
        let prices: Vec<Decimal> = (1..=10).map(Decimal::from).collect();
        let result = ema(&prices, 3);
        assert_eq!(result[0], dec!(2));
        assert_eq!(result.len(), 8);
    }

    #[test]
    fn test_ema_insufficient_data() {
        assert!(ema(&[dec!(1), dec!(2)], 5).is_empty());
        assert!(ema(&[dec!(1), dec!(2), dec!(3)], 0).is_empty());
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<Decimal> = (1..=40).map(Decimal::from).collect();
        assert!(rsi(&rising, 14) > dec!(90));

        let falling: Vec<Decimal> = (1..=40).rev().map(Decimal::from).collect();
        assert!(rsi(&falling, 14) < dec!(10));

        assert_eq!(rsi(&[dec!(10), dec!(11)], 14), dec!(50));
        assert_eq!(rsi(&[dec!(5); 30], 14), dec!(50));
    }

    #[test]
    fn test_macd_flat_prices() {
        let m = macd(&[dec!(100); 50], 12, 26, 9);
        assert_eq!(m, MacdReading::default());
    }

    #[test]
    fn test_macd_rising_line_positive() {
        let prices: Vec<Decimal> = (0..80).map(|i| dec!(100) + Decimal::from(i)).collect();
        assert!(macd(&prices, 12, 26, 9).line > Decimal::ZERO);
    }

    #[test]
    fn test_bollinger_flat_and_fallback() {
        let b = bollinger_bands(&[dec!(100); 20], 20, dec!(2));
        assert_eq!((b.upper, b.middle, b.lower), (dec!(100), dec!(100), dec!(100)));
        assert_eq!(b.percent_b(dec!(100)), dec!(0.5));

        let b = bollinger_bands(&[dec!(50), dec!(51)], 20, dec!(2));
        assert_eq!(b.middle, dec!(51));
    }

    #[test]
    fn test_atr_constant_spread() {
        let candles: Vec<Candle> = (0..30).map(|_| candle(dec!(100), dec!(2))).collect();
        assert_eq!(atr(&candles, 14), dec!(4));
        assert_eq!(atr_ratio(&candles, 14, 10), dec!(1));
        assert_eq!(atr(&candles[..5], 14), Decimal::ZERO);
    }

    #[test]
    fn test_hurst_trending_series() {
        let prices: Vec<Decimal> = (0..200).map(|i| dec!(100) + Decimal::from(i)).collect();
        assert!(hurst_exponent(&prices, 20) > dec!(0.5));
        assert_eq!(hurst_exponent(&[dec!(100); 5], 20), dec!(0.5));
    }

    #[test]
    fn test_linear_regression_exact_line() {
        let fit = linear_regression(&[1.0, 3.0, 5.0, 7.0]);
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert!((fit.intercept - 1.0).abs() < 1e-12);
        assert!((fit.r_squared - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_correlation_signs() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [2.0, 4.0, 6.0, 8.0, 10.0];
        let c = [5.0, 4.0, 3.0, 2.0, 1.0];
        assert!((correlation(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        assert!((correlation(&a, &c).unwrap() + 1.0).abs() < 1e-12);
        assert!(correlation(&a, &[1.0; 5]).is_none());
    }

    #[test]
    fn test_efficiency_ratio_bounds() {
        let straight: Vec<Decimal> = (0..10).map(Decimal::from).collect();
        assert!((efficiency_ratio(&straight) - 1.0).abs() < 1e-12);
        let zigzag: Vec<Decimal> = (0..10).map(|i| Decimal::from(i % 2)).collect();
        assert!(efficiency_ratio(&zigzag) < 0.2);
    }

    proptest! {
        #[test]
        fn prop_rsi_bounded(prices in prop::collection::vec(1u32..100_000, 2..120)) {
            let prices: Vec<Decimal> = prices.into_iter().map(|p| Decimal::new(p as i64, 2)).collect();
            for value in rsi_series(&prices, 14) {
                prop_assert!(value >= Decimal::ZERO && value <= dec!(100));
            }
        }

        #[test]
        fn prop_ema_recurrence(
            prices in prop::collection::vec(1u32..10_000, 1..80),
            period in 1usize..20,
        ) {
            let prices: Vec<Decimal> = prices.into_iter().map(Decimal::from).collect();
            let out = ema(&prices, period);
            if prices.len() < period {
                prop_assert!(out.is_empty());
            } else {
                prop_assert_eq!(out.len(), prices.len() - period + 1);
                let seed = prices[..period].iter().copied().sum::<Decimal>()
                    / Decimal::from(period as u64);
                prop_assert_eq!(out[0], seed);
                let k = dec!(2) / Decimal::from(period as u64 + 1);
                for i in 1..out.len() {
                    let expected = prices[period + i - 1] * k + out[i - 1] * (dec!(1) - k);
                    prop_assert_eq!(out[i], expected);
                }
            }
        }
    }
}
