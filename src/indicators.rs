//! Technical indicator calculations over a candle window.
//!
//! Stateless functions returning `Option<f64>`; `None` means the window is
//! too short, never an error. The typed [`IndicatorSnapshot`] gathers one
//! reading of everything the downstream engines consume; absence of a value
//! is an explicit `None` field, not a missing-key lookup.

use crate::candles::CandleWindow;
use serde::{Deserialize, Serialize};

/// Simple moving average of the last `period` values
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period || period == 0 {
        return None;
    }
    let sum: f64 = values[values.len() - period..].iter().sum();
    Some(sum / period as f64)
}

/// Exponential moving average seeded with the first value
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).and_then(|s| s.last().copied())
}

/// Full EMA series, one value per input value
pub fn ema_series(values: &[f64], period: usize) -> Option<Vec<f64>> {
    if values.is_empty() || period == 0 {
        return None;
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut current = values[0];
    out.push(current);
    for v in values.iter().skip(1) {
        current = (v - current) * multiplier + current;
        out.push(current);
    }
    Some(out)
}

/// Relative Strength Index over the last `period` changes
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period + 1 || period == 0 {
        return None;
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in closes.len() - period..closes.len() {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            gains += change;
        } else {
            losses += change.abs();
        }
    }
    if losses == 0.0 {
        return Some(100.0);
    }
    let rs = gains / losses;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Average True Range over the last `period` bars
pub fn atr(window: &CandleWindow, period: usize) -> Option<f64> {
    let candles = window.candles();
    if candles.len() < period + 1 || period == 0 {
        return None;
    }
    let start = candles.len() - period;
    let mut sum_tr = 0.0;
    for i in start..candles.len() {
        let prev_close = candles[i - 1].close;
        let tr = (candles[i].high - candles[i].low)
            .max((candles[i].high - prev_close).abs())
            .max((candles[i].low - prev_close).abs());
        sum_tr += tr;
    }
    Some(sum_tr / period as f64)
}

/// ATR as a percentage of the last close
pub fn atr_percent(window: &CandleWindow, period: usize) -> Option<f64> {
    let atr = atr(window, period)?;
    let close = window.current_price();
    if close <= 0.0 {
        return None;
    }
    Some(atr / close * 100.0)
}

/// Average Directional Index from smoothed +DM/-DM and TR
pub fn adx(window: &CandleWindow, period: usize) -> Option<f64> {
    let candles = window.candles();
    if candles.len() < period * 2 || period == 0 {
        return None;
    }

    let mut plus_dm = Vec::with_capacity(candles.len() - 1);
    let mut minus_dm = Vec::with_capacity(candles.len() - 1);
    let mut tr_values = Vec::with_capacity(candles.len() - 1);

    for i in 1..candles.len() {
        let up_move = candles[i].high - candles[i - 1].high;
        let down_move = candles[i - 1].low - candles[i].low;

        plus_dm.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dm.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });

        let prev_close = candles[i - 1].close;
        let tr = (candles[i].high - candles[i].low)
            .max((candles[i].high - prev_close).abs())
            .max((candles[i].low - prev_close).abs());
        tr_values.push(tr);
    }

    let smooth_plus = ema(&plus_dm, period)?;
    let smooth_minus = ema(&minus_dm, period)?;
    let smooth_tr = ema(&tr_values, period)?;
    if smooth_tr == 0.0 {
        return None;
    }

    let plus_di = 100.0 * smooth_plus / smooth_tr;
    let minus_di = 100.0 * smooth_minus / smooth_tr;
    let di_sum = plus_di + minus_di;
    if di_sum == 0.0 {
        return None;
    }
    Some(100.0 * (plus_di - minus_di).abs() / di_sum)
}

/// MACD (12/26/9): returns (macd_line, signal_line, histogram)
pub fn macd(closes: &[f64]) -> Option<(f64, f64, f64)> {
    if closes.len() < 26 {
        return None;
    }
    let fast = ema_series(closes, 12)?;
    let slow = ema_series(closes, 26)?;
    let macd_line: Vec<f64> = fast.iter().zip(slow.iter()).map(|(f, s)| f - s).collect();
    let signal = ema(&macd_line, 9)?;
    let line = *macd_line.last()?;
    Some((line, signal, line - signal))
}

/// Bollinger bands: returns (upper, middle, lower)
pub fn bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<(f64, f64, f64)> {
    let mid = sma(closes, period)?;
    let variance: f64 = closes[closes.len() - period..]
        .iter()
        .map(|c| (c - mid).powi(2))
        .sum::<f64>()
        / period as f64;
    let std = variance.sqrt();
    Some((mid + num_std * std, mid, mid - num_std * std))
}

/// Bollinger %B: 0 at the lower band, 1 at the upper band
pub fn bollinger_percent_b(closes: &[f64], period: usize, num_std: f64) -> Option<f64> {
    let (upper, _, lower) = bollinger(closes, period, num_std)?;
    let width = upper - lower;
    if width <= 0.0 {
        return None;
    }
    let last = *closes.last()?;
    Some((last - lower) / width)
}

/// Volume-weighted average price across the window
pub fn vwap(window: &CandleWindow) -> Option<f64> {
    let mut sum_pv = 0.0;
    let mut sum_v = 0.0;
    for c in window.candles() {
        let typical = (c.high + c.low + c.close) / 3.0;
        sum_pv += typical * c.volume;
        sum_v += c.volume;
    }
    if sum_v <= 0.0 {
        return None;
    }
    Some(sum_pv / sum_v)
}

/// Last bar's volume relative to the average of the `lookback` bars before it
pub fn volume_ratio(volumes: &[f64], lookback: usize) -> Option<f64> {
    if volumes.len() < 2 || lookback == 0 {
        return None;
    }
    let current = *volumes.last()?;
    let count = lookback.min(volumes.len() - 1);
    let avg: f64 =
        volumes[volumes.len() - 1 - count..volumes.len() - 1].iter().sum::<f64>() / count as f64;
    if avg <= 0.0 {
        return None;
    }
    Some(current / avg)
}

/// One reading of every indicator the decision engines consume.
///
/// Fields are `None` when the window was too short to compute them. External
/// callers may supply precomputed values for a subset of fields; see
/// [`IndicatorSnapshot::overlay`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub ema_20: Option<f64>,
    pub ema_50: Option<f64>,
    pub ema_200: Option<f64>,
    pub adx_14: Option<f64>,
    pub rsi_14: Option<f64>,
    pub atr_14: Option<f64>,
    pub atr_percent: Option<f64>,
    pub macd_line: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bb_percent_b: Option<f64>,
    pub volume_ratio: Option<f64>,
}

impl IndicatorSnapshot {
    /// Compute every indicator the window is long enough for.
    pub fn compute(window: &CandleWindow) -> Self {
        let closes = window.closes();
        let volumes = window.volumes();
        let macd = macd(&closes);

        Self {
            ema_20: ema(&closes, 20),
            ema_50: ema(&closes, 50),
            ema_200: ema(&closes, 200),
            adx_14: adx(window, 14),
            rsi_14: rsi(&closes, 14),
            atr_14: atr(window, 14),
            atr_percent: atr_percent(window, 14),
            macd_line: macd.map(|m| m.0),
            macd_signal: macd.map(|m| m.1),
            macd_histogram: macd.map(|m| m.2),
            bb_percent_b: bollinger_percent_b(&closes, 20, 2.0),
            volume_ratio: volume_ratio(&volumes, 20),
        }
    }

    /// Overlay externally supplied precomputed values onto this snapshot.
    /// `Some` fields in `overrides` win; `None` fields keep the computed value.
    pub fn overlay(mut self, overrides: &IndicatorSnapshot) -> Self {
        macro_rules! take {
            ($field:ident) => {
                if overrides.$field.is_some() {
                    self.$field = overrides.$field;
                }
            };
        }
        take!(ema_20);
        take!(ema_50);
        take!(ema_200);
        take!(adx_14);
        take!(rsi_14);
        take!(atr_14);
        take!(atr_percent);
        take!(macd_line);
        take!(macd_signal);
        take!(macd_histogram);
        take!(bb_percent_b);
        take!(volume_ratio);
        self
    }

    /// Look up an indicator by the name used in strategy rule sets.
    /// Unknown names return `None` just like an uncomputed field.
    pub fn by_name(&self, name: &str) -> Option<f64> {
        match name {
            "ema_20" => self.ema_20,
            "ema_50" => self.ema_50,
            "ema_200" => self.ema_200,
            "adx_14" | "adx" => self.adx_14,
            "rsi_14" | "rsi" => self.rsi_14,
            "atr_14" | "atr" => self.atr_14,
            "atr_percent" => self.atr_percent,
            "macd_line" | "macd" => self.macd_line,
            "macd_signal" => self.macd_signal,
            "macd_histogram" => self.macd_histogram,
            "bb_percent_b" => self.bb_percent_b,
            "volume_ratio" => self.volume_ratio,
            _ => None,
        }
    }

    /// True if `name` maps to a known snapshot field
    pub fn is_known_indicator(name: &str) -> bool {
        matches!(
            name,
            "ema_20"
                | "ema_50"
                | "ema_200"
                | "adx_14"
                | "adx"
                | "rsi_14"
                | "rsi"
                | "atr_14"
                | "atr"
                | "atr_percent"
                | "macd_line"
                | "macd"
                | "macd_signal"
                | "macd_histogram"
                | "bb_percent_b"
                | "volume_ratio"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::test_support::{flat_window, rising_window, window_from_bars};

    #[test]
    fn test_sma_basic() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&values, 5), Some(3.0));
        assert_eq!(sma(&values, 2), Some(4.5));
        assert_eq!(sma(&values, 6), None);
    }

    #[test]
    fn test_ema_converges_to_constant() {
        let values = vec![10.0; 50];
        let e = ema(&values, 20).unwrap();
        assert!((e - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&closes, 14), Some(100.0));
    }

    #[test]
    fn test_rsi_flat_series_is_100() {
        // flat series has zero losses -> 100 by convention
        let closes = vec![50.0; 20];
        assert_eq!(rsi(&closes, 14), Some(100.0));
    }

    #[test]
    fn test_atr_constant_range() {
        // every bar spans exactly 2.0 with no gaps
        let bars: Vec<_> = (0..20).map(|_| (10.0, 11.0, 9.0, 10.0, 1.0)).collect();
        let w = window_from_bars(&bars);
        let a = atr(&w, 14).unwrap();
        assert!((a - 2.0).abs() < 1e-9);
        let ap = atr_percent(&w, 14).unwrap();
        assert!((ap - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_adx_needs_data() {
        let w = flat_window(100.0, 10);
        assert_eq!(adx(&w, 14), None);
    }

    #[test]
    fn test_macd_sign_on_trend() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let (line, _signal, _hist) = macd(&closes).unwrap();
        assert!(line > 0.0, "rising series should have positive MACD line");
    }

    #[test]
    fn test_percent_b_bounds() {
        let w = rising_window(100.0, 1.0, 40);
        let b = bollinger_percent_b(&w.closes(), 20, 2.0).unwrap();
        // last close of a steady uptrend sits in the upper half of the bands
        assert!(b > 0.5);
    }

    #[test]
    fn test_volume_ratio() {
        let mut volumes = vec![100.0; 21];
        *volumes.last_mut().unwrap() = 250.0;
        let r = volume_ratio(&volumes, 20).unwrap();
        assert!((r - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_short_window_has_nones() {
        let w = flat_window(100.0, 5);
        let snap = IndicatorSnapshot::compute(&w);
        assert!(snap.ema_200.is_none());
        assert!(snap.adx_14.is_none());
        assert!(snap.rsi_14.is_none());
        // seeded EMA produces a value for any non-empty series
        assert!(snap.ema_20.is_some());
    }

    #[test]
    fn test_snapshot_overlay_prefers_overrides() {
        let w = flat_window(100.0, 60);
        let computed = IndicatorSnapshot::compute(&w);
        let overrides = IndicatorSnapshot {
            rsi_14: Some(33.0),
            ..Default::default()
        };
        let merged = computed.clone().overlay(&overrides);
        assert_eq!(merged.rsi_14, Some(33.0));
        assert_eq!(merged.ema_20, computed.ema_20);
    }

    #[test]
    fn test_by_name_lookup() {
        let snap = IndicatorSnapshot {
            rsi_14: Some(55.0),
            ..Default::default()
        };
        assert_eq!(snap.by_name("rsi_14"), Some(55.0));
        assert_eq!(snap.by_name("rsi"), Some(55.0));
        assert_eq!(snap.by_name("unknown"), None);
        assert!(!IndicatorSnapshot::is_known_indicator("unknown"));
    }
}
