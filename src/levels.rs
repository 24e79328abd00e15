//! Support/resistance level detection, merging, scoring and classification.
//!
//! The detection pipeline, in order:
//! 1. ATR establishes the zone width for point-like levels
//! 2. Swing highs/lows via local-extremum windowing
//! 3. Pivot points (standard/fibonacci/camarilla) from the prior day
//! 4. Price clusters from repeated high/low touches
//! 5. Prior daily/weekly extremes and window VWAP
//! 6. Left-to-right merge of overlapping zones (single sorted pass)
//! 7. Touch-count strength scoring
//! 8. Support/resistance classification relative to current price
//! 9. Top-N selection, balanced across both sides of price
//!
//! All calls are serialized through a coarse lock; aside from that, the
//! engine is a pure function of the window and its config.

use crate::candles::CandleWindow;
use crate::indicators;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

/// Kind of detected price level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelKind {
    Support,
    Resistance,
    Pivot,
    SwingHigh,
    SwingLow,
    DailyHigh,
    DailyLow,
    WeeklyHigh,
    WeeklyLow,
    Vwap,
}

impl LevelKind {
    /// Pre-tagged kinds survive classification untouched
    fn is_pretagged(&self) -> bool {
        matches!(
            self,
            LevelKind::Pivot
                | LevelKind::DailyHigh
                | LevelKind::DailyLow
                | LevelKind::WeeklyHigh
                | LevelKind::WeeklyLow
                | LevelKind::Vwap
        )
    }
}

impl std::fmt::Display for LevelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelKind::Support => write!(f, "SUPPORT"),
            LevelKind::Resistance => write!(f, "RESISTANCE"),
            LevelKind::Pivot => write!(f, "PIVOT"),
            LevelKind::SwingHigh => write!(f, "SWING_HIGH"),
            LevelKind::SwingLow => write!(f, "SWING_LOW"),
            LevelKind::DailyHigh => write!(f, "DAILY_HIGH"),
            LevelKind::DailyLow => write!(f, "DAILY_LOW"),
            LevelKind::WeeklyHigh => write!(f, "WEEKLY_HIGH"),
            LevelKind::WeeklyLow => write!(f, "WEEKLY_LOW"),
            LevelKind::Vwap => write!(f, "VWAP"),
        }
    }
}

/// Level strength from touch count
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelStrength {
    Weak,
    Moderate,
    Strong,
    Key,
}

/// A detected support/resistance zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    /// Stable hash of (price_mid, kind, timeframe)
    pub id: String,
    pub price_low: f64,
    pub price_high: f64,
    pub price_mid: f64,
    pub kind: LevelKind,
    pub strength: LevelStrength,
    pub touches: u32,
    pub timeframe: String,
}

impl Level {
    fn point(price: f64, half_width: f64, kind: LevelKind, timeframe: &str) -> Self {
        let price_low = price - half_width;
        let price_high = price + half_width;
        Self {
            id: level_id(price, kind, timeframe),
            price_low,
            price_high,
            price_mid: price,
            kind,
            strength: LevelStrength::Weak,
            touches: 1,
            timeframe: timeframe.to_string(),
        }
    }

    /// Does the zone contain this price?
    pub fn contains(&self, price: f64) -> bool {
        price >= self.price_low && price <= self.price_high
    }

    fn refresh_id(&mut self) {
        self.id = level_id(self.price_mid, self.kind, &self.timeframe);
    }
}

/// Stable level id: blake3 over the rounded mid price, kind and timeframe
fn level_id(price_mid: f64, kind: LevelKind, timeframe: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    // round to 1e-8 so float noise does not change the id
    hasher.update(&((price_mid * 1e8).round() as i64).to_le_bytes());
    hasher.update(kind.to_string().as_bytes());
    hasher.update(timeframe.as_bytes());
    hasher.finalize().to_hex()[..16].to_string()
}

/// Pivot point calculation variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PivotVariant {
    Standard,
    Fibonacci,
    Camarilla,
}

impl std::str::FromStr for PivotVariant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(PivotVariant::Standard),
            "fibonacci" => Ok(PivotVariant::Fibonacci),
            "camarilla" => Ok(PivotVariant::Camarilla),
            other => anyhow::bail!("unsupported pivot variant: {}", other),
        }
    }
}

/// Configuration for level detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    /// ATR period used for zone widths (default: 14)
    pub atr_period: usize,
    /// Zone half-width as a multiple of ATR (default: 0.25)
    pub zone_width_atr_mult: f64,
    /// Bars on each side required for a local extremum (default: 5)
    pub swing_lookback: usize,
    /// Merge/cluster proximity threshold in percent of price (default: 0.3)
    pub proximity_merge_pct: f64,
    /// Minimum touches for a price cluster to become a level (default: 3)
    pub cluster_min_touches: u32,
    /// Compute pivot points from the prior day (default: true)
    pub pivots_enabled: bool,
    pub pivot_variant: PivotVariant,
    /// Emit prior daily/weekly high-low levels (default: true)
    pub period_levels_enabled: bool,
    /// Emit the window VWAP as a level (default: true)
    pub vwap_enabled: bool,
    /// Touches at or above this make a KEY level (default: 5)
    pub key_touch_threshold: u32,
    /// Touches at or above this make a STRONG level (default: 3)
    pub strong_touch_threshold: u32,
    /// Hard cap on returned levels, split across both sides (default: 12)
    pub max_levels: usize,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            atr_period: 14,
            zone_width_atr_mult: 0.25,
            swing_lookback: 5,
            proximity_merge_pct: 0.3,
            cluster_min_touches: 3,
            pivots_enabled: true,
            pivot_variant: PivotVariant::Standard,
            period_levels_enabled: true,
            vwap_enabled: true,
            key_touch_threshold: 5,
            strong_touch_threshold: 3,
            max_levels: 12,
        }
    }
}

/// Detected levels for one symbol/timeframe, ordered by price
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelsResult {
    pub symbol: String,
    pub timeframe: String,
    pub current_price: f64,
    /// Sorted ascending by `price_mid`
    pub levels: Vec<Level>,
}

impl LevelsResult {
    pub fn empty(symbol: &str, timeframe: &str, current_price: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            current_price,
            levels: Vec::new(),
        }
    }

    /// Closest SUPPORT level strictly below `price`
    pub fn nearest_support(&self, price: f64) -> Option<&Level> {
        self.levels
            .iter()
            .filter(|l| l.kind == LevelKind::Support && l.price_mid < price)
            .max_by(|a, b| a.price_mid.total_cmp(&b.price_mid))
    }

    /// Closest RESISTANCE level strictly above `price`
    pub fn nearest_resistance(&self, price: f64) -> Option<&Level> {
        self.levels
            .iter()
            .filter(|l| l.kind == LevelKind::Resistance && l.price_mid > price)
            .min_by(|a, b| a.price_mid.total_cmp(&b.price_mid))
    }

    /// Same lookups defaulting to the result's own current price
    pub fn nearest_support_from_current(&self) -> Option<&Level> {
        self.nearest_support(self.current_price)
    }

    pub fn nearest_resistance_from_current(&self) -> Option<&Level> {
        self.nearest_resistance(self.current_price)
    }
}

/// Level detection engine. All calls go through one coarse lock.
#[derive(Debug)]
pub struct LevelEngine {
    config: LevelConfig,
    lock: Mutex<()>,
}

impl LevelEngine {
    pub fn new(config: LevelConfig) -> Self {
        Self {
            config,
            lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &LevelConfig {
        &self.config
    }

    /// Run the full detection pipeline over the window.
    ///
    /// `current_price` overrides the window's last close as the
    /// classification reference.
    pub fn detect_levels(
        &self,
        window: &CandleWindow,
        symbol: &str,
        timeframe: &str,
        current_price: Option<f64>,
    ) -> LevelsResult {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let reference = current_price.unwrap_or_else(|| window.current_price());

        // 1. zone width from ATR, with a percent-of-price fallback
        let atr = indicators::atr(window, self.config.atr_period)
            .unwrap_or(reference * 0.005);
        let half_width = atr * self.config.zone_width_atr_mult;

        let mut raw: Vec<Level> = Vec::new();

        // 2. swing extremes
        raw.extend(self.detect_swings(window, half_width, timeframe));

        // 3. pivots from the prior completed day
        if self.config.pivots_enabled {
            raw.extend(self.compute_pivots(window, half_width, timeframe));
        }

        // 4. repeated-touch clusters
        raw.extend(self.detect_clusters(window, reference, half_width, timeframe));

        // 5. prior daily/weekly extremes + VWAP
        if self.config.period_levels_enabled {
            raw.extend(self.detect_period_extremes(window, half_width, timeframe));
        }
        if self.config.vwap_enabled {
            if let Some(v) = indicators::vwap(window) {
                raw.push(Level::point(v, half_width, LevelKind::Vwap, timeframe));
            }
        }

        let raw_count = raw.len();

        // 6. merge overlapping zones in one sorted left-to-right pass
        let mut merged = merge_levels(raw, self.config.proximity_merge_pct);

        // 7. strength from touch counts across the whole window
        for level in &mut merged {
            let recount = count_touches(window, level);
            level.touches = level.touches.max(recount);
            level.strength = self.strength_for(level.touches);
        }

        // 8. classify relative to current price
        for level in &mut merged {
            if !level.kind.is_pretagged() {
                level.kind = if level.price_mid < reference {
                    LevelKind::Support
                } else {
                    LevelKind::Resistance
                };
            }
            level.refresh_id();
        }

        // 9. keep the strongest/closest levels on each side of price
        let levels = self.select_top(merged, reference);

        debug!(
            symbol,
            timeframe,
            raw = raw_count,
            kept = levels.len(),
            "level detection complete"
        );

        LevelsResult {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            current_price: reference,
            levels,
        }
    }

    /// Map a touch count to a strength tag
    pub fn strength_for(&self, touches: u32) -> LevelStrength {
        if touches >= self.config.key_touch_threshold {
            LevelStrength::Key
        } else if touches >= self.config.strong_touch_threshold {
            LevelStrength::Strong
        } else if touches >= 2 {
            LevelStrength::Moderate
        } else {
            LevelStrength::Weak
        }
    }

    fn detect_swings(
        &self,
        window: &CandleWindow,
        half_width: f64,
        timeframe: &str,
    ) -> Vec<Level> {
        let candles = window.candles();
        let lookback = self.config.swing_lookback;
        let mut out = Vec::new();
        if candles.len() < lookback * 2 + 1 {
            return out;
        }

        for i in lookback..candles.len() - lookback {
            let h = candles[i].high;
            let is_swing_high = (i - lookback..i + lookback + 1)
                .filter(|&j| j != i)
                .all(|j| candles[j].high < h);
            if is_swing_high {
                out.push(Level::point(h, half_width, LevelKind::SwingHigh, timeframe));
            }

            let l = candles[i].low;
            let is_swing_low = (i - lookback..i + lookback + 1)
                .filter(|&j| j != i)
                .all(|j| candles[j].low > l);
            if is_swing_low {
                out.push(Level::point(l, half_width, LevelKind::SwingLow, timeframe));
            }
        }
        out
    }

    fn compute_pivots(
        &self,
        window: &CandleWindow,
        half_width: f64,
        timeframe: &str,
    ) -> Vec<Level> {
        let Some((high, low, close)) = prior_day_hlc(window) else {
            return Vec::new();
        };
        let range = high - low;
        if range <= 0.0 {
            return Vec::new();
        }

        let prices: Vec<f64> = match self.config.pivot_variant {
            PivotVariant::Standard => {
                let p = (high + low + close) / 3.0;
                vec![
                    p,
                    2.0 * p - low,
                    2.0 * p - high,
                    p + range,
                    p - range,
                ]
            }
            PivotVariant::Fibonacci => {
                let p = (high + low + close) / 3.0;
                vec![
                    p,
                    p + range * 0.382,
                    p - range * 0.382,
                    p + range * 0.618,
                    p - range * 0.618,
                    p + range,
                    p - range,
                ]
            }
            PivotVariant::Camarilla => {
                let unit = range * 1.1;
                vec![
                    close + unit / 12.0,
                    close - unit / 12.0,
                    close + unit / 6.0,
                    close - unit / 6.0,
                    close + unit / 4.0,
                    close - unit / 4.0,
                ]
            }
        };

        prices
            .into_iter()
            .map(|p| Level::point(p, half_width, LevelKind::Pivot, timeframe))
            .collect()
    }

    fn detect_clusters(
        &self,
        window: &CandleWindow,
        reference: f64,
        half_width: f64,
        timeframe: &str,
    ) -> Vec<Level> {
        // every bar extreme is a touch candidate
        let mut touch_prices: Vec<f64> = Vec::with_capacity(window.len() * 2);
        for c in window.candles() {
            touch_prices.push(c.high);
            touch_prices.push(c.low);
        }
        touch_prices.sort_by(|a, b| a.total_cmp(b));

        let mut out = Vec::new();
        let mut group_start = 0usize;
        for i in 1..=touch_prices.len() {
            let group_anchor = touch_prices[group_start];
            let threshold = group_anchor * self.config.proximity_merge_pct / 100.0;
            let split = i == touch_prices.len() || touch_prices[i] - group_anchor > threshold;
            if !split {
                continue;
            }
            let count = (i - group_start) as u32;
            if count >= self.config.cluster_min_touches {
                let group = &touch_prices[group_start..i];
                let mean = group.iter().sum::<f64>() / group.len() as f64;
                let kind = if mean < reference {
                    LevelKind::Support
                } else {
                    LevelKind::Resistance
                };
                let mut level = Level::point(mean, half_width, kind, timeframe);
                level.touches = count;
                out.push(level);
            }
            group_start = i;
        }
        out
    }

    fn detect_period_extremes(
        &self,
        window: &CandleWindow,
        half_width: f64,
        timeframe: &str,
    ) -> Vec<Level> {
        let mut out = Vec::new();

        if let Some((high, low, _)) = prior_day_hlc(window) {
            out.push(Level::point(high, half_width, LevelKind::DailyHigh, timeframe));
            out.push(Level::point(low, half_width, LevelKind::DailyLow, timeframe));
        }
        if let Some((high, low)) = prior_week_hl(window) {
            out.push(Level::point(high, half_width, LevelKind::WeeklyHigh, timeframe));
            out.push(Level::point(low, half_width, LevelKind::WeeklyLow, timeframe));
        }
        out
    }

    fn select_top(&self, levels: Vec<Level>, reference: f64) -> Vec<Level> {
        if levels.len() <= self.config.max_levels {
            let mut sorted = levels;
            sorted.sort_by(|a, b| a.price_mid.total_cmp(&b.price_mid));
            return sorted;
        }

        let per_side = (self.config.max_levels / 2).max(1);
        let (mut below, mut above): (Vec<Level>, Vec<Level>) =
            levels.into_iter().partition(|l| l.price_mid < reference);

        let rank = |side: &mut Vec<Level>| {
            side.sort_by(|a, b| {
                b.strength
                    .cmp(&a.strength)
                    .then_with(|| {
                        (a.price_mid - reference)
                            .abs()
                            .total_cmp(&(b.price_mid - reference).abs())
                    })
                    .then_with(|| a.price_mid.total_cmp(&b.price_mid))
            });
            side.truncate(per_side);
        };
        rank(&mut below);
        rank(&mut above);

        let mut kept = below;
        kept.extend(above);
        kept.sort_by(|a, b| a.price_mid.total_cmp(&b.price_mid));
        kept
    }
}

/// Merge overlapping zones in one left-to-right pass over the sorted list.
///
/// A level folds into the accumulated zone when its low reaches the zone's
/// high plus a proximity threshold derived from the zone. The merge is
/// transitive within the pass and the list is NOT re-sorted afterwards;
/// that ordering is the deterministic tie-break callers rely on.
pub fn merge_levels(mut levels: Vec<Level>, proximity_pct: f64) -> Vec<Level> {
    levels.sort_by(|a, b| a.price_mid.total_cmp(&b.price_mid));

    let mut merged: Vec<Level> = Vec::with_capacity(levels.len());
    for level in levels {
        let Some(prev) = merged.last_mut() else {
            merged.push(level);
            continue;
        };
        let threshold = prev.price_mid * proximity_pct / 100.0;
        if level.price_low <= prev.price_high + threshold {
            prev.price_low = prev.price_low.min(level.price_low);
            prev.price_high = prev.price_high.max(level.price_high);
            prev.price_mid = (prev.price_low + prev.price_high) / 2.0;
            prev.touches += level.touches;
            prev.strength = prev.strength.max(level.strength);
            prev.refresh_id();
        } else {
            merged.push(level);
        }
    }
    merged
}

/// Count candles whose high or low lands inside the zone
fn count_touches(window: &CandleWindow, level: &Level) -> u32 {
    window
        .candles()
        .iter()
        .filter(|c| level.contains(c.high) || level.contains(c.low))
        .count() as u32
}

/// High/low/close of the last completed day in the window
fn prior_day_hlc(window: &CandleWindow) -> Option<(f64, f64, f64)> {
    let mut days: BTreeMap<NaiveDate, (f64, f64, f64)> = BTreeMap::new();
    for c in window.candles() {
        let date = c.timestamp.date_naive();
        days.entry(date)
            .and_modify(|(h, l, cl)| {
                *h = h.max(c.high);
                *l = l.min(c.low);
                *cl = c.close;
            })
            .or_insert((c.high, c.low, c.close));
    }
    if days.len() < 2 {
        return None;
    }
    // last entry is the (possibly partial) current day; take the one before
    days.iter().rev().nth(1).map(|(_, v)| *v)
}

/// High/low of the last completed ISO week in the window
fn prior_week_hl(window: &CandleWindow) -> Option<(f64, f64)> {
    let mut weeks: BTreeMap<(i32, u32), (f64, f64)> = BTreeMap::new();
    for c in window.candles() {
        let iso = c.timestamp.iso_week();
        weeks
            .entry((iso.year(), iso.week()))
            .and_modify(|(h, l)| {
                *h = h.max(c.high);
                *l = l.min(c.low);
            })
            .or_insert((c.high, c.low));
    }
    if weeks.len() < 2 {
        return None;
    }
    weeks.iter().rev().nth(1).map(|(_, v)| *v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::test_support::window_from_bars;

    fn mk_level(low: f64, high: f64, kind: LevelKind, touches: u32) -> Level {
        let mid = (low + high) / 2.0;
        Level {
            id: level_id(mid, kind, "1h"),
            price_low: low,
            price_high: high,
            price_mid: mid,
            kind,
            strength: LevelStrength::Weak,
            touches,
            timeframe: "1h".to_string(),
        }
    }

    #[test]
    fn test_level_zone_invariant() {
        let l = mk_level(99.0, 101.0, LevelKind::Support, 1);
        assert!(l.price_low <= l.price_mid && l.price_mid <= l.price_high);
    }

    #[test]
    fn test_merge_overlapping_zones() {
        let a = mk_level(99.0, 100.0, LevelKind::Support, 2);
        let b = mk_level(100.1, 101.0, LevelKind::SwingLow, 3);
        let merged = merge_levels(vec![b, a], 0.3);
        assert_eq!(merged.len(), 1);
        let m = &merged[0];
        assert_eq!(m.price_low, 99.0);
        assert_eq!(m.price_high, 101.0);
        assert_eq!(m.touches, 5);
        // left (lower) level's kind wins the merged zone
        assert_eq!(m.kind, LevelKind::Support);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let levels = vec![
            mk_level(99.0, 100.0, LevelKind::Support, 2),
            mk_level(100.05, 100.8, LevelKind::SwingLow, 1),
            mk_level(105.0, 106.0, LevelKind::Resistance, 4),
            mk_level(110.0, 110.5, LevelKind::SwingHigh, 1),
        ];
        let once = merge_levels(levels, 0.3);
        let twice = merge_levels(once.clone(), 0.3);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_keeps_distant_levels_apart() {
        let a = mk_level(99.0, 100.0, LevelKind::Support, 1);
        let b = mk_level(104.0, 105.0, LevelKind::Resistance, 1);
        let merged = merge_levels(vec![a, b], 0.3);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_keeps_stronger_strength() {
        let mut a = mk_level(99.0, 100.0, LevelKind::Support, 2);
        a.strength = LevelStrength::Key;
        let b = mk_level(100.1, 101.0, LevelKind::SwingLow, 1);
        let merged = merge_levels(vec![a, b], 0.3);
        assert_eq!(merged[0].strength, LevelStrength::Key);
    }

    #[test]
    fn test_strength_thresholds() {
        let engine = LevelEngine::new(LevelConfig {
            key_touch_threshold: 5,
            strong_touch_threshold: 3,
            ..Default::default()
        });
        assert_eq!(engine.strength_for(5), LevelStrength::Key);
        assert_eq!(engine.strength_for(4), LevelStrength::Strong);
        assert_eq!(engine.strength_for(3), LevelStrength::Strong);
        assert_eq!(engine.strength_for(2), LevelStrength::Moderate);
        assert_eq!(engine.strength_for(1), LevelStrength::Weak);
    }

    #[test]
    fn test_nearest_support_and_resistance() {
        let result = LevelsResult {
            symbol: "BTCUSDT".to_string(),
            timeframe: "1h".to_string(),
            current_price: 101.0,
            levels: vec![
                mk_level(89.5, 90.5, LevelKind::Support, 2),
                mk_level(94.5, 95.5, LevelKind::Support, 2),
                mk_level(104.5, 105.5, LevelKind::Resistance, 2),
            ],
        };
        let support = result.nearest_support(101.0).unwrap();
        assert!((support.price_mid - 95.0).abs() < 1e-9);
        let resistance = result.nearest_resistance(101.0).unwrap();
        assert!((resistance.price_mid - 105.0).abs() < 1e-9);
        assert!(result.nearest_support(89.0).is_none());
    }

    #[test]
    fn test_level_id_is_stable() {
        let a = level_id(100.123456789, LevelKind::Support, "1h");
        let b = level_id(100.123456789, LevelKind::Support, "1h");
        let c = level_id(100.123456789, LevelKind::Support, "4h");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_swing_detection() {
        // clear swing high at bar 7 (price 110) and swing low at bar 12 (90)
        let mut bars = Vec::new();
        for i in 0..20 {
            let base = match i {
                7 => 110.0,
                12 => 90.0,
                _ => 100.0 + (i % 3) as f64 * 0.1,
            };
            bars.push((base, base + 0.5, base - 0.5, base, 10.0));
        }
        let w = window_from_bars(&bars);
        let engine = LevelEngine::new(LevelConfig {
            swing_lookback: 3,
            pivots_enabled: false,
            period_levels_enabled: false,
            vwap_enabled: false,
            cluster_min_touches: 100, // effectively disable clusters
            ..Default::default()
        });
        let result = engine.detect_levels(&w, "BTCUSDT", "1h", None);
        // the 110 swing becomes resistance, the 90 swing support
        assert!(result.nearest_resistance(101.0).is_some());
        assert!(result.nearest_support(100.0).is_some());
        for l in &result.levels {
            assert!(l.price_low <= l.price_mid && l.price_mid <= l.price_high);
        }
    }

    #[test]
    fn test_detection_is_deterministic() {
        let mut bars = Vec::new();
        for i in 0..60 {
            let base = 100.0 + ((i * 7) % 13) as f64 * 0.4;
            bars.push((base, base + 0.6, base - 0.6, base + 0.1, 10.0 + i as f64));
        }
        let w = window_from_bars(&bars);
        let engine = LevelEngine::new(LevelConfig::default());
        let a = engine.detect_levels(&w, "ETHUSDT", "1h", None);
        let b = engine.detect_levels(&w, "ETHUSDT", "1h", None);
        assert_eq!(a.levels, b.levels);
    }

    #[test]
    fn test_max_levels_cap() {
        let mut bars = Vec::new();
        // sprawling series with many extremes
        for i in 0..120 {
            let base = 100.0 + ((i * 11) % 29) as f64;
            bars.push((base, base + 1.0, base - 1.0, base, 5.0));
        }
        let w = window_from_bars(&bars);
        let engine = LevelEngine::new(LevelConfig {
            max_levels: 6,
            cluster_min_touches: 2,
            ..Default::default()
        });
        let result = engine.detect_levels(&w, "BTCUSDT", "1h", None);
        assert!(result.levels.len() <= 6);
        // still sorted by mid after selection
        for pair in result.levels.windows(2) {
            assert!(pair[0].price_mid <= pair[1].price_mid);
        }
    }

    #[test]
    fn test_pivot_variant_parse() {
        assert!("standard".parse::<PivotVariant>().is_ok());
        assert!("camarilla".parse::<PivotVariant>().is_ok());
        assert!("renko".parse::<PivotVariant>().is_err());
    }
}
