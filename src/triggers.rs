//! Entry trigger evaluation against detected levels.
//!
//! Three patterns are recognized at a candidate level:
//! - BREAKOUT: the bar closes beyond the level zone with volume expansion
//! - PULLBACK: price returns to a level it had departed from and holds it
//! - SFP: the wick pierces the zone edge but the body closes back inside
//!
//! The regime gate lives here, not in the orchestrator: breakout and
//! pullback are trend-following entries and are refused when the regime does
//! not sanction market entries; SFP is the reversal exception and stays
//! allowed in chop. The highest-confidence qualifying pattern wins.

use crate::candles::CandleWindow;
use crate::context::MarketContext;
use crate::exits::ExitLevels;
use crate::levels::{Level, LevelKind, LevelStrength};
use crate::types::Direction;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Recognized entry pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Breakout,
    Pullback,
    Sfp,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerType::Breakout => write!(f, "BREAKOUT"),
            TriggerType::Pullback => write!(f, "PULLBACK"),
            TriggerType::Sfp => write!(f, "SFP"),
        }
    }
}

/// Outcome state of a trigger evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    Pending,
    Triggered,
    Expired,
    Rejected,
}

/// Result of one trigger evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResult {
    pub status: TriggerStatus,
    pub trigger_type: Option<TriggerType>,
    /// 0..=1, only meaningful when triggered
    pub confidence: f64,
    /// The level the pattern fired against
    pub level: Option<Level>,
    pub reason: String,
    /// Filled in by the orchestrator once the trigger is accepted
    pub exit_levels: Option<ExitLevels>,
}

impl TriggerResult {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: TriggerStatus::Rejected,
            trigger_type: None,
            confidence: 0.0,
            level: None,
            reason: reason.into(),
            exit_levels: None,
        }
    }

    fn pending(reason: impl Into<String>) -> Self {
        Self {
            status: TriggerStatus::Pending,
            trigger_type: None,
            confidence: 0.0,
            level: None,
            reason: reason.into(),
            exit_levels: None,
        }
    }
}

/// Configuration for trigger evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Candidate levels must sit within this many ATRs of price (default: 3.0)
    pub level_reach_atr_mult: f64,
    /// Close must clear the zone edge by this percent of price (default: 0.05)
    pub breakout_buffer_pct: f64,
    /// Minimum volume ratio for a breakout confirmation (default: 1.5)
    pub breakout_volume_ratio_min: f64,
    /// Bars searched for the departure leg of a pullback (default: 10)
    pub pullback_lookback: usize,
    /// Departure from the level required before a retest counts, in ATRs
    /// (default: 1.5)
    pub pullback_min_move_atr: f64,
    /// Minimum wick penetration beyond the zone edge for an SFP, as a
    /// fraction of the bar range (default: 0.25)
    pub sfp_min_penetration: f64,
    /// Lowest confidence that still triggers (default: 0.55)
    pub min_confidence: f64,
    /// Bars a pending setup may wait before it expires (default: 12)
    pub max_pending_bars: u32,
    /// Bars after a closed position before a new trigger is accepted
    /// (default: 10)
    pub cooldown_bars: u32,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            level_reach_atr_mult: 3.0,
            breakout_buffer_pct: 0.05,
            breakout_volume_ratio_min: 1.5,
            pullback_lookback: 10,
            pullback_min_move_atr: 1.5,
            sfp_min_penetration: 0.25,
            min_confidence: 0.55,
            max_pending_bars: 12,
            cooldown_bars: 10,
        }
    }
}

/// One scored pattern match, before the best is chosen
#[derive(Debug, Clone)]
struct PatternMatch {
    trigger_type: TriggerType,
    confidence: f64,
    level: Level,
    reason: String,
}

/// Evaluates entry triggers against the context's levels
#[derive(Debug, Clone)]
pub struct TriggerEngine {
    config: TriggerConfig,
}

impl TriggerEngine {
    pub fn new(config: TriggerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// Evaluate all candidate levels for the requested direction and return
    /// the highest-confidence qualifying pattern.
    ///
    /// `bars_since_exit` enforces the re-entry cooldown; `pending_age_bars`
    /// is how long the caller has been waiting on a pending setup.
    pub fn find_best_trigger(
        &self,
        ctx: &MarketContext,
        window: &CandleWindow,
        direction: Direction,
        bars_since_exit: Option<u32>,
        pending_age_bars: u32,
    ) -> TriggerResult {
        if !direction.is_directional() {
            return TriggerResult::rejected("no direction to evaluate");
        }
        if let Some(bars) = bars_since_exit {
            if bars < self.config.cooldown_bars {
                return TriggerResult::rejected(format!(
                    "cooldown: {} of {} bars since last exit",
                    bars, self.config.cooldown_bars
                ));
            }
        }
        if pending_age_bars > self.config.max_pending_bars {
            return TriggerResult {
                status: TriggerStatus::Expired,
                trigger_type: None,
                confidence: 0.0,
                level: None,
                reason: format!("setup expired after {} bars", pending_age_bars),
                exit_levels: None,
            };
        }

        let market_entry_ok = ctx.regime.allows_market_entry();
        let atr = effective_atr(ctx);
        let price = ctx.current_price;
        let reach = atr * self.config.level_reach_atr_mult;

        let candidates: Vec<&Level> = ctx
            .levels
            .levels
            .iter()
            .filter(|l| (l.price_mid - price).abs() <= reach)
            .collect();

        if candidates.is_empty() {
            return TriggerResult::rejected("no levels within reach of price");
        }

        let mut matches: Vec<PatternMatch> = Vec::new();
        for level in &candidates {
            if market_entry_ok {
                if let Some(m) = self.check_breakout(ctx, window, direction, level) {
                    matches.push(m);
                }
                if let Some(m) = self.check_pullback(ctx, window, direction, level, atr) {
                    matches.push(m);
                }
            }
            if let Some(m) = self.check_sfp(window, direction, level) {
                matches.push(m);
            }
        }

        let best = matches
            .into_iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

        match best {
            Some(m) if m.confidence >= self.config.min_confidence => {
                debug!(
                    trigger = %m.trigger_type,
                    confidence = m.confidence,
                    level = %m.level.price_mid,
                    "trigger fired"
                );
                TriggerResult {
                    status: TriggerStatus::Triggered,
                    trigger_type: Some(m.trigger_type),
                    confidence: m.confidence,
                    level: Some(m.level),
                    reason: m.reason,
                    exit_levels: None,
                }
            }
            Some(m) => TriggerResult::pending(format!(
                "best candidate {} at {:.4} below confidence floor",
                m.trigger_type, m.confidence
            )),
            None if market_entry_ok => {
                TriggerResult::pending("levels in reach, no pattern formed")
            }
            None => TriggerResult::pending(
                "regime blocks market entries; waiting for an SFP reclaim",
            ),
        }
    }

    /// Bar closes beyond the level zone with volume confirmation.
    ///
    /// No kind requirement: the level that just broke classifies as support
    /// once price closes above it (role reversal), so the check is purely
    /// geometric: the close cleared a zone the previous close had not.
    fn check_breakout(
        &self,
        ctx: &MarketContext,
        window: &CandleWindow,
        direction: Direction,
        level: &Level,
    ) -> Option<PatternMatch> {
        let bar = window.last();
        let prev_close = window.without_last().map(|w| w.current_price());
        let buffer = ctx.current_price * self.config.breakout_buffer_pct / 100.0;

        let broke = match direction {
            Direction::Long => {
                bar.close > level.price_high + buffer
                    && prev_close.map_or(true, |p| p <= level.price_high)
            }
            Direction::Short => {
                bar.close < level.price_low - buffer
                    && prev_close.map_or(true, |p| p >= level.price_low)
            }
            Direction::Neutral => false,
        };
        if !broke {
            return None;
        }

        let volume_ratio = ctx.indicators.volume_ratio.unwrap_or(1.0);
        if volume_ratio < self.config.breakout_volume_ratio_min {
            return None;
        }

        let confidence = (0.6
            + 0.1 * ((volume_ratio / self.config.breakout_volume_ratio_min) - 1.0).min(1.5)
            + strength_bonus(level.strength))
        .min(0.95);

        Some(PatternMatch {
            trigger_type: TriggerType::Breakout,
            confidence,
            level: (*level).clone(),
            reason: format!(
                "close {:.4} beyond {} zone at {:.4} on {:.1}x volume",
                bar.close, level.kind, level.price_mid, volume_ratio
            ),
        })
    }

    /// Price departed from the level and has now returned to hold it
    fn check_pullback(
        &self,
        ctx: &MarketContext,
        window: &CandleWindow,
        direction: Direction,
        level: &Level,
        atr: f64,
    ) -> Option<PatternMatch> {
        let bar = window.last();
        let in_zone = level.contains(bar.low) || level.contains(bar.close) || level.contains(bar.high);
        if !in_zone {
            return None;
        }

        let holds = match direction {
            Direction::Long => level.kind == LevelKind::Support && bar.close >= level.price_mid,
            Direction::Short => level.kind == LevelKind::Resistance && bar.close <= level.price_mid,
            Direction::Neutral => false,
        };
        if !holds {
            return None;
        }

        // the retest only counts after a real departure from the level
        let candles = window.candles();
        let lookback = self.config.pullback_lookback.min(candles.len().saturating_sub(1));
        let required = atr * self.config.pullback_min_move_atr;
        let departed = candles[candles.len() - 1 - lookback..candles.len() - 1]
            .iter()
            .any(|c| match direction {
                Direction::Long => c.close >= level.price_high + required,
                Direction::Short => c.close <= level.price_low - required,
                Direction::Neutral => false,
            });
        if !departed {
            return None;
        }

        let confidence = (0.55 + strength_bonus(level.strength)
            + if ctx.regime.confidence > 0.7 { 0.1 } else { 0.0 })
        .min(0.95);

        Some(PatternMatch {
            trigger_type: TriggerType::Pullback,
            confidence,
            level: (*level).clone(),
            reason: format!(
                "retest of {} zone at {:.4} after {:.1}-ATR departure",
                level.kind, level.price_mid, self.config.pullback_min_move_atr
            ),
        })
    }

    /// Wick pierces the zone edge, body closes back inside
    fn check_sfp(
        &self,
        window: &CandleWindow,
        direction: Direction,
        level: &Level,
    ) -> Option<PatternMatch> {
        let bar = window.last();
        let range = bar.range();
        if range <= 0.0 {
            return None;
        }
        let body_low = bar.open.min(bar.close);
        let body_high = bar.open.max(bar.close);

        let (pierced, penetration) = match direction {
            Direction::Long => {
                // sweep below a support, reclaim it
                let ok = level.kind == LevelKind::Support
                    && bar.low < level.price_low
                    && body_low > level.price_low;
                (ok, (level.price_low - bar.low) / range)
            }
            Direction::Short => {
                let ok = level.kind == LevelKind::Resistance
                    && bar.high > level.price_high
                    && body_high < level.price_high;
                (ok, (bar.high - level.price_high) / range)
            }
            Direction::Neutral => (false, 0.0),
        };
        if !pierced || penetration < self.config.sfp_min_penetration {
            return None;
        }

        let confidence = (0.65 + 0.2 * (penetration - self.config.sfp_min_penetration)
            + strength_bonus(level.strength))
        .min(0.95);

        Some(PatternMatch {
            trigger_type: TriggerType::Sfp,
            confidence,
            level: level.clone(),
            reason: format!(
                "wick swept {} zone at {:.4}, body closed back inside",
                level.kind, level.price_mid
            ),
        })
    }
}

/// ATR with the documented 1%-of-price fallback
pub(crate) fn effective_atr(ctx: &MarketContext) -> f64 {
    match ctx.indicators.atr_14 {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => ctx.current_price * 0.01,
    }
}

fn strength_bonus(strength: LevelStrength) -> f64 {
    match strength {
        LevelStrength::Key => 0.15,
        LevelStrength::Strong => 0.1,
        LevelStrength::Moderate => 0.05,
        LevelStrength::Weak => 0.0,
    }
}
