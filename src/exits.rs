//! Exit level calculation and open-position monitoring.
//!
//! Levels are computed once at entry: ATR- or percent-based stop and target,
//! a minimum risk:reward enforced by extending the target (the stop is never
//! tightened to make the numbers work), an optional structure stop tucked
//! behind the nearest level, partial take-profit and a trailing stop that
//! only ever moves in the trade's favor.
//!
//! Monitoring evaluates conditions in strict priority order; the first match
//! wins no matter how many are simultaneously true:
//! 1. stop-loss  2. take-profit  3. partial TP  4. time stop  5. reversal

use crate::candles::Candle;
use crate::levels::LevelsResult;
use crate::types::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Why a position should (partially) close
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitType {
    SlHit,
    TpHit,
    Partial,
    TimeStop,
    SignalReversal,
    Manual,
    TrailingStop,
}

impl std::fmt::Display for ExitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitType::SlHit => write!(f, "SL_HIT"),
            ExitType::TpHit => write!(f, "TP_HIT"),
            ExitType::Partial => write!(f, "PARTIAL"),
            ExitType::TimeStop => write!(f, "TIME_STOP"),
            ExitType::SignalReversal => write!(f, "SIGNAL_REVERSAL"),
            ExitType::Manual => write!(f, "MANUAL"),
            ExitType::TrailingStop => write!(f, "TRAILING_STOP"),
        }
    }
}

/// How a stop/target distance is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMethod {
    AtrMultiple,
    Percent,
}

/// Configuration for exit management
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    pub sl_method: DistanceMethod,
    /// Stop distance in ATRs when sl_method is AtrMultiple (default: 2.0)
    pub sl_atr_mult: f64,
    /// Stop distance in percent of entry when sl_method is Percent
    pub sl_percent: f64,
    pub tp_method: DistanceMethod,
    /// Target distance in ATRs (default: 3.0)
    pub tp_atr_mult: f64,
    pub tp_percent: f64,
    /// Floor on tp_distance / sl_distance; enforced by extending the target
    /// (default: 1.0)
    pub min_risk_reward: f64,
    pub trailing_enabled: bool,
    /// Unrealized profit (percent of entry) before the trail starts moving
    /// (default: 1.0)
    pub trailing_activation_profit_pct: f64,
    pub trailing_method: DistanceMethod,
    pub trailing_atr_mult: f64,
    pub trailing_percent: f64,
    /// Minimum stop improvement, percent of current price, before a trail
    /// update is applied (default: 0.1)
    pub trailing_step_percent: f64,
    pub partial_tp_enabled: bool,
    /// Where the partial target sits, as a fraction of the full TP distance
    /// (default: 0.5)
    pub partial_tp_fraction: f64,
    /// Fraction of the position closed at the partial target (default: 0.5)
    pub partial_close_fraction: f64,
    /// Move the stop to breakeven once the partial fills (default: true)
    pub breakeven_after_partial: bool,
    pub structure_stop_enabled: bool,
    /// ATR buffer beyond the structure level (default: 0.5)
    pub structure_stop_atr_buffer: f64,
    /// Bars before the time stop fires (default: 48)
    pub max_holding_bars: u32,
    /// Opposing entry score that forces an exit (default: 0.6)
    pub signal_reversal_threshold: f64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            sl_method: DistanceMethod::AtrMultiple,
            sl_atr_mult: 2.0,
            sl_percent: 2.0,
            tp_method: DistanceMethod::AtrMultiple,
            tp_atr_mult: 3.0,
            tp_percent: 4.0,
            min_risk_reward: 1.0,
            trailing_enabled: true,
            trailing_activation_profit_pct: 1.0,
            trailing_method: DistanceMethod::AtrMultiple,
            trailing_atr_mult: 2.0,
            trailing_percent: 1.5,
            trailing_step_percent: 0.1,
            partial_tp_enabled: true,
            partial_tp_fraction: 0.5,
            partial_close_fraction: 0.5,
            breakeven_after_partial: true,
            structure_stop_enabled: true,
            structure_stop_atr_buffer: 0.5,
            max_holding_bars: 48,
            signal_reversal_threshold: 0.6,
        }
    }
}

/// Full set of exit levels computed at entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitLevels {
    pub entry_price: f64,
    pub direction: Direction,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Price at which the trailing stop arms, when trailing is enabled
    pub trailing_activation: Option<f64>,
    /// First partial take-profit target, when partials are enabled
    pub partial_tp_1: Option<f64>,
    /// Structure-derived stop that overrode the computed one, if any
    pub structure_stop: Option<f64>,
    pub breakeven_price: f64,
    pub sl_distance: f64,
    pub tp_distance: f64,
    pub risk_reward: f64,
    pub sl_percent: f64,
    pub tp_percent: f64,
    /// "atr", "percent" or "structure"
    pub sl_method: String,
    /// "atr", "percent" or "min_rr_extended"
    pub tp_method: String,
}

/// Exit decision for one monitoring tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitSignal {
    pub should_exit: bool,
    pub exit_type: Option<ExitType>,
    pub reason: String,
    pub suggested_exit_price: f64,
    /// Fraction of the position to close; only set for partial exits
    pub partial_close_fraction: Option<f64>,
    /// Replacement stop accompanying this signal (breakeven move, trail)
    pub new_sl: Option<f64>,
}

impl ExitSignal {
    fn hold(price: f64) -> Self {
        Self {
            should_exit: false,
            exit_type: None,
            reason: String::new(),
            suggested_exit_price: price,
            partial_close_fraction: None,
            new_sl: None,
        }
    }
}

/// The single open-position record the monitoring path mutates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionState {
    pub position_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exits: ExitLevels,
    /// Live stop, moved only in the trade's favor
    pub current_sl: f64,
    pub partial_taken: bool,
    pub bars_held: u32,
    /// Extremes since entry, for trailing and MFE/MAE reporting
    pub highest_price: f64,
    pub lowest_price: f64,
}

impl PositionState {
    pub fn open(symbol: &str, exits: ExitLevels, entry_time: DateTime<Utc>) -> Self {
        let entry_price = exits.entry_price;
        Self {
            position_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            direction: exits.direction,
            entry_price,
            entry_time,
            current_sl: exits.stop_loss,
            exits,
            partial_taken: false,
            bars_held: 0,
            highest_price: entry_price,
            lowest_price: entry_price,
        }
    }

    /// Track the new bar's extremes and age the position
    pub fn observe_bar(&mut self, bar: &Candle) {
        self.bars_held += 1;
        self.highest_price = self.highest_price.max(bar.high);
        self.lowest_price = self.lowest_price.min(bar.low);
    }

    pub fn unrealized_pnl_pct(&self, current_price: f64) -> f64 {
        match self.direction {
            Direction::Long => (current_price - self.entry_price) / self.entry_price * 100.0,
            Direction::Short => (self.entry_price - current_price) / self.entry_price * 100.0,
            Direction::Neutral => 0.0,
        }
    }
}

/// Exit level calculator and position monitor
#[derive(Debug, Clone)]
pub struct ExitEngine {
    config: ExitConfig,
}

impl ExitEngine {
    pub fn new(config: ExitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExitConfig {
        &self.config
    }

    /// Compute the full exit-level set for a new position.
    ///
    /// A missing or malformed ATR falls back to 1% of entry. The minimum
    /// risk:reward is enforced by extending the target, never by tightening
    /// the stop. A structure stop may then tighten the stop, but never
    /// loosen it.
    pub fn calculate_exit_levels(
        &self,
        entry_price: f64,
        direction: Direction,
        atr: Option<f64>,
        levels: Option<&LevelsResult>,
    ) -> ExitLevels {
        let atr = match atr {
            Some(v) if v.is_finite() && v > 0.0 => v,
            _ => entry_price * 0.01,
        };

        let sl_distance = match self.config.sl_method {
            DistanceMethod::AtrMultiple => atr * self.config.sl_atr_mult,
            DistanceMethod::Percent => entry_price * self.config.sl_percent / 100.0,
        };
        let mut tp_distance = match self.config.tp_method {
            DistanceMethod::AtrMultiple => atr * self.config.tp_atr_mult,
            DistanceMethod::Percent => entry_price * self.config.tp_percent / 100.0,
        };
        let sl_method = match self.config.sl_method {
            DistanceMethod::AtrMultiple => "atr",
            DistanceMethod::Percent => "percent",
        };
        let mut tp_method = match self.config.tp_method {
            DistanceMethod::AtrMultiple => "atr",
            DistanceMethod::Percent => "percent",
        };

        // risk:reward floor extends the target only
        if tp_distance < sl_distance * self.config.min_risk_reward {
            tp_distance = sl_distance * self.config.min_risk_reward;
            tp_method = "min_rr_extended";
        }

        let sign = match direction {
            Direction::Long => 1.0,
            _ => -1.0,
        };
        let mut stop_loss = entry_price - sign * sl_distance;
        let take_profit = entry_price + sign * tp_distance;

        let trailing_activation = self.config.trailing_enabled.then(|| {
            entry_price * (1.0 + sign * self.config.trailing_activation_profit_pct / 100.0)
        });
        let partial_tp_1 = self
            .config
            .partial_tp_enabled
            .then(|| entry_price + sign * tp_distance * self.config.partial_tp_fraction);

        // structure stop: only adopt a level-derived stop that is TIGHTER
        // than the computed one
        let mut sl_method = sl_method.to_string();
        let mut structure_stop = None;
        if self.config.structure_stop_enabled {
            if let Some(levels) = levels {
                let buffer = atr * self.config.structure_stop_atr_buffer;
                let candidate = match direction {
                    Direction::Long => levels
                        .nearest_support(entry_price)
                        .map(|l| l.price_low - buffer),
                    Direction::Short => levels
                        .nearest_resistance(entry_price)
                        .map(|l| l.price_high + buffer),
                    Direction::Neutral => None,
                };
                if let Some(candidate) = candidate {
                    let tighter = match direction {
                        Direction::Long => candidate > stop_loss && candidate < entry_price,
                        Direction::Short => candidate < stop_loss && candidate > entry_price,
                        Direction::Neutral => false,
                    };
                    if tighter {
                        debug!(candidate, stop_loss, "structure stop override");
                        stop_loss = candidate;
                        structure_stop = Some(candidate);
                        sl_method = "structure".to_string();
                    }
                }
            }
        }

        let sl_distance = (entry_price - stop_loss).abs();
        let tp_distance = (take_profit - entry_price).abs();
        let risk_reward = if sl_distance > 0.0 {
            tp_distance / sl_distance
        } else {
            0.0
        };

        ExitLevels {
            entry_price,
            direction,
            stop_loss,
            take_profit,
            trailing_activation,
            partial_tp_1,
            structure_stop,
            breakeven_price: entry_price,
            sl_distance,
            tp_distance,
            risk_reward,
            sl_percent: sl_distance / entry_price * 100.0,
            tp_percent: tp_distance / entry_price * 100.0,
            sl_method,
            tp_method: tp_method.to_string(),
        }
    }

    /// Evaluate exit conditions for the latest bar, in strict priority order.
    /// Nothing here can fail: a hold signal is returned when no condition
    /// matches.
    pub fn check_exit_conditions(
        &self,
        position: &PositionState,
        bar: &Candle,
        opposing_score: Option<f64>,
    ) -> ExitSignal {
        let exits = &position.exits;
        let sl = position.current_sl;
        let long = position.direction == Direction::Long;

        // 1. stop-loss
        let sl_hit = if long { bar.low <= sl } else { bar.high >= sl };
        if sl_hit {
            let trailed = sl != exits.stop_loss;
            return ExitSignal {
                should_exit: true,
                exit_type: Some(if trailed {
                    ExitType::TrailingStop
                } else {
                    ExitType::SlHit
                }),
                reason: format!("stop at {:.4} hit", sl),
                suggested_exit_price: sl,
                partial_close_fraction: None,
                new_sl: None,
            };
        }

        // 2. take-profit
        let tp = exits.take_profit;
        let tp_hit = if long { bar.high >= tp } else { bar.low <= tp };
        if tp_hit {
            return ExitSignal {
                should_exit: true,
                exit_type: Some(ExitType::TpHit),
                reason: format!("target at {:.4} hit", tp),
                suggested_exit_price: tp,
                partial_close_fraction: None,
                new_sl: None,
            };
        }

        // 3. partial take-profit
        if self.config.partial_tp_enabled && !position.partial_taken {
            if let Some(partial) = exits.partial_tp_1 {
                let partial_hit = if long {
                    bar.high >= partial
                } else {
                    bar.low <= partial
                };
                if partial_hit {
                    let new_sl = self
                        .config
                        .breakeven_after_partial
                        .then_some(exits.breakeven_price);
                    return ExitSignal {
                        should_exit: true,
                        exit_type: Some(ExitType::Partial),
                        reason: format!("partial target at {:.4} hit", partial),
                        suggested_exit_price: partial,
                        partial_close_fraction: Some(self.config.partial_close_fraction),
                        new_sl,
                    };
                }
            }
        }

        // 4. time stop
        if position.bars_held >= self.config.max_holding_bars {
            return ExitSignal {
                should_exit: true,
                exit_type: Some(ExitType::TimeStop),
                reason: format!("held {} bars", position.bars_held),
                suggested_exit_price: bar.close,
                partial_close_fraction: None,
                new_sl: None,
            };
        }

        // 5. signal reversal
        if let Some(score) = opposing_score {
            if score >= self.config.signal_reversal_threshold {
                return ExitSignal {
                    should_exit: true,
                    exit_type: Some(ExitType::SignalReversal),
                    reason: format!("opposing entry score {:.2}", score),
                    suggested_exit_price: bar.close,
                    partial_close_fraction: None,
                    new_sl: None,
                };
            }
        }

        ExitSignal::hold(bar.close)
    }

    /// Compute a trailing-stop update, if one is warranted.
    ///
    /// Returns the new stop only when the trail is active (profit above the
    /// activation threshold), the move is in the trade's favor, and the
    /// improvement exceeds the debounce step.
    pub fn calculate_trailing_stop(
        &self,
        position: &PositionState,
        current_price: f64,
        atr: Option<f64>,
    ) -> Option<f64> {
        if !self.config.trailing_enabled {
            return None;
        }
        if position.unrealized_pnl_pct(current_price) < self.config.trailing_activation_profit_pct
        {
            return None;
        }

        let atr = match atr {
            Some(v) if v.is_finite() && v > 0.0 => v,
            _ => position.entry_price * 0.01,
        };
        let distance = match self.config.trailing_method {
            DistanceMethod::AtrMultiple => atr * self.config.trailing_atr_mult,
            DistanceMethod::Percent => current_price * self.config.trailing_percent / 100.0,
        };

        let candidate = match position.direction {
            Direction::Long => current_price - distance,
            Direction::Short => current_price + distance,
            Direction::Neutral => return None,
        };

        // never loosen
        let improves = match position.direction {
            Direction::Long => candidate > position.current_sl,
            Direction::Short => candidate < position.current_sl,
            Direction::Neutral => false,
        };
        if !improves {
            return None;
        }

        // debounce small updates
        let improvement_pct =
            (candidate - position.current_sl).abs() / current_price * 100.0;
        if improvement_pct < self.config.trailing_step_percent {
            return None;
        }

        debug!(
            from = position.current_sl,
            to = candidate,
            "trailing stop update"
        );
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels::{Level, LevelKind, LevelStrength, LevelsResult};
    use chrono::TimeZone;

    fn config_with(sl_mult: f64, tp_mult: f64, min_rr: f64) -> ExitConfig {
        ExitConfig {
            sl_atr_mult: sl_mult,
            tp_atr_mult: tp_mult,
            min_risk_reward: min_rr,
            structure_stop_enabled: false,
            ..Default::default()
        }
    }

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 10.0,
        }
    }

    fn open_position(engine: &ExitEngine, entry: f64, direction: Direction, atr: f64) -> PositionState {
        let exits = engine.calculate_exit_levels(entry, direction, Some(atr), None);
        PositionState::open(
            "BTCUSDT",
            exits,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_long_levels_atr_based() {
        let engine = ExitEngine::new(config_with(2.0, 3.0, 1.0));
        let exits = engine.calculate_exit_levels(100.0, Direction::Long, Some(2.0), None);
        assert!((exits.stop_loss - 96.0).abs() < 1e-9);
        assert!((exits.take_profit - 106.0).abs() < 1e-9);
        assert!((exits.risk_reward - 1.5).abs() < 1e-9);
        assert!(exits.stop_loss < exits.entry_price && exits.entry_price < exits.take_profit);
    }

    #[test]
    fn test_short_levels_min_rr_extends_target() {
        let engine = ExitEngine::new(config_with(1.5, 1.0, 2.0));
        let exits = engine.calculate_exit_levels(100.0, Direction::Short, Some(1.0), None);
        assert!((exits.sl_distance - 1.5).abs() < 1e-9);
        assert!((exits.stop_loss - 101.5).abs() < 1e-9);
        assert!((exits.tp_distance - 3.0).abs() < 1e-9);
        assert!((exits.take_profit - 97.0).abs() < 1e-9);
        assert_eq!(exits.tp_method, "min_rr_extended");
        assert!(exits.risk_reward >= 2.0 - 1e-9);
        assert!(exits.take_profit < exits.entry_price && exits.entry_price < exits.stop_loss);
    }

    #[test]
    fn test_missing_atr_falls_back_to_one_percent() {
        let engine = ExitEngine::new(config_with(2.0, 3.0, 1.0));
        let exits = engine.calculate_exit_levels(200.0, Direction::Long, None, None);
        // 1% of 200 = 2.0 proxy ATR
        assert!((exits.sl_distance - 4.0).abs() < 1e-9);
        let nan = engine.calculate_exit_levels(200.0, Direction::Long, Some(f64::NAN), None);
        assert!((nan.sl_distance - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_structure_stop_only_tightens() {
        let mut config = config_with(2.0, 3.0, 1.0);
        config.structure_stop_enabled = true;
        config.structure_stop_atr_buffer = 0.5;
        let engine = ExitEngine::new(config);

        let support = Level {
            id: "s".to_string(),
            price_low: 98.5,
            price_high: 99.0,
            price_mid: 98.75,
            kind: LevelKind::Support,
            strength: LevelStrength::Strong,
            touches: 4,
            timeframe: "1h".to_string(),
        };
        let levels = LevelsResult {
            symbol: "BTCUSDT".to_string(),
            timeframe: "1h".to_string(),
            current_price: 100.0,
            levels: vec![support],
        };

        // computed SL would be 96; support-derived stop 98.5 - 1.0 = 97.5 is
        // tighter and wins
        let exits =
            engine.calculate_exit_levels(100.0, Direction::Long, Some(2.0), Some(&levels));
        assert!((exits.stop_loss - 97.5).abs() < 1e-9);
        assert_eq!(exits.sl_method, "structure");
        assert_eq!(exits.structure_stop, Some(97.5));

        // a distant support (candidate below computed SL) never loosens
        let far = LevelsResult {
            levels: vec![Level {
                price_low: 90.0,
                price_high: 91.0,
                price_mid: 90.5,
                ..exits_level()
            }],
            ..exits_levels_shell()
        };
        let exits2 = engine.calculate_exit_levels(100.0, Direction::Long, Some(2.0), Some(&far));
        assert!((exits2.stop_loss - 96.0).abs() < 1e-9);
        assert_eq!(exits2.sl_method, "atr");
    }

    fn exits_level() -> Level {
        Level {
            id: "x".to_string(),
            price_low: 0.0,
            price_high: 0.0,
            price_mid: 0.0,
            kind: LevelKind::Support,
            strength: LevelStrength::Weak,
            touches: 1,
            timeframe: "1h".to_string(),
        }
    }

    fn exits_levels_shell() -> LevelsResult {
        LevelsResult {
            symbol: "BTCUSDT".to_string(),
            timeframe: "1h".to_string(),
            current_price: 100.0,
            levels: Vec::new(),
        }
    }

    #[test]
    fn test_sl_beats_tp_when_both_hit() {
        let engine = ExitEngine::new(config_with(2.0, 3.0, 1.0));
        let position = open_position(&engine, 100.0, Direction::Long, 2.0);
        // pathological wide bar touches both 96 and 106
        let wide = bar(100.0, 107.0, 95.0, 101.0);
        let signal = engine.check_exit_conditions(&position, &wide, None);
        assert!(signal.should_exit);
        assert_eq!(signal.exit_type, Some(ExitType::SlHit));
        assert!((signal.suggested_exit_price - 96.0).abs() < 1e-9);
    }

    #[test]
    fn test_tp_hit_long() {
        let engine = ExitEngine::new(config_with(2.0, 3.0, 1.0));
        let position = open_position(&engine, 100.0, Direction::Long, 2.0);
        let signal = engine.check_exit_conditions(&position, &bar(105.0, 106.5, 104.5, 106.0), None);
        assert_eq!(signal.exit_type, Some(ExitType::TpHit));
        assert!((signal.suggested_exit_price - 106.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_moves_stop_to_breakeven() {
        let mut config = config_with(2.0, 3.0, 1.0);
        config.partial_tp_enabled = true;
        config.partial_tp_fraction = 0.5;
        config.breakeven_after_partial = true;
        let engine = ExitEngine::new(config);
        let position = open_position(&engine, 100.0, Direction::Long, 2.0);
        // partial target = 100 + 6*0.5 = 103
        let signal = engine.check_exit_conditions(&position, &bar(102.0, 103.5, 101.5, 103.0), None);
        assert_eq!(signal.exit_type, Some(ExitType::Partial));
        assert_eq!(signal.partial_close_fraction, Some(0.5));
        assert_eq!(signal.new_sl, Some(100.0));
    }

    #[test]
    fn test_partial_fires_once() {
        let engine = ExitEngine::new(config_with(2.0, 3.0, 1.0));
        let mut position = open_position(&engine, 100.0, Direction::Long, 2.0);
        position.partial_taken = true;
        let signal = engine.check_exit_conditions(&position, &bar(102.0, 103.5, 101.5, 103.0), None);
        assert!(!signal.should_exit);
    }

    #[test]
    fn test_time_stop() {
        let engine = ExitEngine::new(config_with(2.0, 3.0, 1.0));
        let mut position = open_position(&engine, 100.0, Direction::Long, 2.0);
        position.bars_held = 48;
        position.partial_taken = true;
        let signal = engine.check_exit_conditions(&position, &bar(100.0, 100.5, 99.5, 100.2), None);
        assert_eq!(signal.exit_type, Some(ExitType::TimeStop));
    }

    #[test]
    fn test_signal_reversal() {
        let engine = ExitEngine::new(config_with(2.0, 3.0, 1.0));
        let mut position = open_position(&engine, 100.0, Direction::Long, 2.0);
        position.partial_taken = true;
        let signal =
            engine.check_exit_conditions(&position, &bar(100.0, 100.5, 99.5, 100.2), Some(0.7));
        assert_eq!(signal.exit_type, Some(ExitType::SignalReversal));
        // below the threshold nothing fires
        let hold =
            engine.check_exit_conditions(&position, &bar(100.0, 100.5, 99.5, 100.2), Some(0.5));
        assert!(!hold.should_exit);
    }

    #[test]
    fn test_trailing_long_only_rises() {
        let engine = ExitEngine::new(config_with(2.0, 10.0, 1.0));
        let mut position = open_position(&engine, 100.0, Direction::Long, 2.0);

        // below activation profit: no trail
        assert_eq!(engine.calculate_trailing_stop(&position, 100.5, Some(2.0)), None);

        // at +5%: candidate = 105 - 4 = 101 beats the 96 stop
        let new_sl = engine
            .calculate_trailing_stop(&position, 105.0, Some(2.0))
            .unwrap();
        assert!((new_sl - 101.0).abs() < 1e-9);
        position.current_sl = new_sl;

        // price retreats: candidate 102-4=98 would loosen, refused
        assert_eq!(engine.calculate_trailing_stop(&position, 102.0, Some(2.0)), None);

        // tiny improvement below the step is debounced
        let mut cfg = engine.config().clone();
        cfg.trailing_step_percent = 2.0;
        let strict = ExitEngine::new(cfg);
        assert_eq!(strict.calculate_trailing_stop(&position, 105.5, Some(2.0)), None);
    }

    #[test]
    fn test_trailing_short_only_falls() {
        let engine = ExitEngine::new(config_with(2.0, 10.0, 1.0));
        let mut position = open_position(&engine, 100.0, Direction::Short, 2.0);

        let new_sl = engine
            .calculate_trailing_stop(&position, 95.0, Some(2.0))
            .unwrap();
        assert!((new_sl - 99.0).abs() < 1e-9);
        position.current_sl = new_sl;

        // price bounces back up: candidate would loosen the stop, refused
        assert_eq!(engine.calculate_trailing_stop(&position, 98.0, Some(2.0)), None);
    }

    #[test]
    fn test_observe_bar_tracks_extremes() {
        let engine = ExitEngine::new(config_with(2.0, 3.0, 1.0));
        let mut position = open_position(&engine, 100.0, Direction::Long, 2.0);
        position.observe_bar(&bar(100.0, 104.0, 99.0, 103.0));
        assert_eq!(position.bars_held, 1);
        assert!((position.highest_price - 104.0).abs() < 1e-9);
        assert!((position.lowest_price - 99.0).abs() < 1e-9);
    }
}
