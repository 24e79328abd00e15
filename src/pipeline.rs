//! Decision pipeline orchestration.
//!
//! Owns one instance of every engine and the single open-position record.
//! The full pipeline (regime -> levels -> score -> trigger -> leverage) runs
//! only when a new bar timestamp is observed; between bars only the cheap
//! exit monitor runs against the refreshed last bar. Config reload builds a
//! fresh pipeline state from the new config and swaps it wholesale; nothing
//! is patched while a cycle is in flight.

use crate::candles::CandleWindow;
use crate::config::PipelineConfig;
use crate::context::{MarketContextBuilder, MarketContext};
use crate::exits::{ExitEngine, ExitSignal, ExitType, PositionState};
use crate::indicators::IndicatorSnapshot;
use crate::leverage::{LeverageEngine, LeverageResult};
use crate::levels::LevelEngine;
use crate::regime::{RegimeDetector, RegimeResult};
use crate::scoring::{EntryScoreEngine, EntryScoreResult};
use crate::triggers::{TriggerEngine, TriggerResult, TriggerStatus};
use crate::types::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One cycle's decision, for the journal/UI and the execution collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub context_id: String,
    pub symbol: String,
    pub timeframe: String,
    /// Absent on intra-bar ticks, which skip the context rebuild
    pub regime: Option<RegimeResult>,
    pub score: Option<EntryScoreResult>,
    pub trigger: Option<TriggerResult>,
    pub leverage: Option<LeverageResult>,
    pub exit_signal: Option<ExitSignal>,
    /// Open position after this cycle, if any
    pub position_id: Option<Uuid>,
    pub note: String,
}

/// The deterministic decision pipeline.
///
/// Engines are explicitly constructed and owned here; there are no global
/// instances. Reload = construct a new `DecisionPipeline` (or call
/// [`DecisionPipeline::replace_config`]) and drop the old one.
pub struct DecisionPipeline {
    config: PipelineConfig,
    context_builder: MarketContextBuilder,
    scoring: EntryScoreEngine,
    triggers: TriggerEngine,
    exits: ExitEngine,
    leverage: LeverageEngine,

    last_bar_ts: Option<DateTime<Utc>>,
    position: Option<PositionState>,
    bars_since_exit: Option<u32>,
    pending_age_bars: u32,
}

impl DecisionPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let context_builder = MarketContextBuilder::new(
            RegimeDetector::new(config.regime.clone()),
            LevelEngine::new(config.levels.clone()),
            config.context.clone(),
        );
        Self {
            context_builder,
            scoring: EntryScoreEngine::new(config.scoring.clone()),
            triggers: TriggerEngine::new(config.triggers.clone()),
            exits: ExitEngine::new(config.exits.clone()),
            leverage: LeverageEngine::new(config.leverage.clone()),
            config,
            last_bar_ts: None,
            position: None,
            bars_since_exit: None,
            pending_age_bars: 0,
        }
    }

    /// Swap in a new config wholesale. The open position and bar bookkeeping
    /// survive; every engine is rebuilt from the new config.
    pub fn replace_config(&mut self, config: PipelineConfig) {
        info!("pipeline config replaced");
        let position = self.position.take();
        let last_bar_ts = self.last_bar_ts;
        let bars_since_exit = self.bars_since_exit;
        let pending_age_bars = self.pending_age_bars;

        *self = DecisionPipeline::new(config);
        self.position = position;
        self.last_bar_ts = last_bar_ts;
        self.bars_since_exit = bars_since_exit;
        self.pending_age_bars = pending_age_bars;
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn position(&self) -> Option<&PositionState> {
        self.position.as_ref()
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    /// Close the open position on external instruction (the manual path of
    /// the execution collaborator).
    pub fn close_manual(&mut self, price: f64) -> Option<ExitSignal> {
        let position = self.position.take()?;
        self.bars_since_exit = Some(0);
        info!(
            position = %position.position_id,
            price,
            "manual close"
        );
        Some(ExitSignal {
            should_exit: true,
            exit_type: Some(ExitType::Manual),
            reason: "manual close requested".to_string(),
            suggested_exit_price: price,
            partial_close_fraction: None,
            new_sl: None,
        })
    }

    /// Feed the latest window through the pipeline.
    ///
    /// Returns a record when the cycle produced something worth journaling:
    /// every full bar-close cycle does; an intra-bar tick only does when the
    /// exit monitor fired.
    pub fn process(
        &mut self,
        window: &CandleWindow,
        symbol: &str,
        timeframe: &str,
        precomputed: Option<&IndicatorSnapshot>,
    ) -> Option<DecisionRecord> {
        let bar_ts = window.last().timestamp;
        let is_new_bar = self.last_bar_ts != Some(bar_ts);

        if !is_new_bar {
            // intra-bar tick: price/PnL refresh and exit monitoring only
            return self.monitor_tick(window, symbol, timeframe);
        }

        self.last_bar_ts = Some(bar_ts);
        if let Some(bars) = self.bars_since_exit.as_mut() {
            *bars = bars.saturating_add(1);
        }

        let ctx = self
            .context_builder
            .build(window, symbol, timeframe, precomputed);

        if self.position.is_some() {
            self.manage_position(&ctx, window, bar_ts)
        } else {
            self.evaluate_entry(&ctx, window, bar_ts)
        }
    }

    /// Intra-bar refresh: monitor the open position against the live bar,
    /// skipping context rebuilds and the opposing-score check.
    fn monitor_tick(
        &mut self,
        window: &CandleWindow,
        symbol: &str,
        timeframe: &str,
    ) -> Option<DecisionRecord> {
        let position = self.position.as_mut()?;
        let bar = window.last();
        position.highest_price = position.highest_price.max(bar.high);
        position.lowest_price = position.lowest_price.min(bar.low);

        let signal = self.exits.check_exit_conditions(position, bar, None);
        if !signal.should_exit {
            return None;
        }

        let record = DecisionRecord {
            decision_id: Uuid::new_v4(),
            timestamp: bar.timestamp,
            context_id: String::new(),
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            regime: None,
            score: None,
            trigger: None,
            leverage: None,
            exit_signal: Some(signal.clone()),
            position_id: Some(position.position_id),
            note: "intra-bar exit".to_string(),
        };
        self.apply_exit_signal(signal);
        Some(record)
    }

    /// Bar-close cycle with an open position: trail, then monitor exits.
    fn manage_position(
        &mut self,
        ctx: &Arc<MarketContext>,
        window: &CandleWindow,
        bar_ts: DateTime<Utc>,
    ) -> Option<DecisionRecord> {
        let bar = window.last();
        let position = self.position.as_mut()?;
        position.observe_bar(bar);

        // trailing update first, so this bar's stop check uses the new stop
        if let Some(new_sl) =
            self.exits
                .calculate_trailing_stop(position, ctx.current_price, ctx.indicators.atr_14)
        {
            position.current_sl = new_sl;
        }

        let opposing = self
            .scoring
            .calculate(ctx, position.direction.opposite())
            .final_score;
        let signal = self
            .exits
            .check_exit_conditions(position, bar, Some(opposing));

        let position_id = position.position_id;
        let note = if signal.should_exit {
            format!("exit: {}", signal.reason)
        } else {
            "position held".to_string()
        };

        let record = DecisionRecord {
            decision_id: Uuid::new_v4(),
            timestamp: bar_ts,
            context_id: ctx.context_id.clone(),
            symbol: ctx.symbol.clone(),
            timeframe: ctx.timeframe.clone(),
            regime: Some(ctx.regime.clone()),
            score: None,
            trigger: None,
            leverage: None,
            exit_signal: Some(signal.clone()),
            position_id: Some(position_id),
            note,
        };

        self.apply_exit_signal(signal);
        Some(record)
    }

    fn apply_exit_signal(&mut self, signal: ExitSignal) {
        if !signal.should_exit {
            return;
        }
        match signal.exit_type {
            Some(ExitType::Partial) => {
                if let Some(position) = self.position.as_mut() {
                    position.partial_taken = true;
                    if let Some(new_sl) = signal.new_sl {
                        // breakeven move counts as favorable by construction
                        let favorable = match position.direction {
                            Direction::Long => new_sl > position.current_sl,
                            Direction::Short => new_sl < position.current_sl,
                            Direction::Neutral => false,
                        };
                        if favorable {
                            position.current_sl = new_sl;
                        }
                    }
                    info!(
                        position = %position.position_id,
                        fraction = ?signal.partial_close_fraction,
                        "partial take-profit"
                    );
                }
            }
            Some(exit_type) => {
                if let Some(position) = self.position.take() {
                    info!(
                        position = %position.position_id,
                        %exit_type,
                        price = signal.suggested_exit_price,
                        "position closed"
                    );
                    self.bars_since_exit = Some(0);
                }
            }
            None => {}
        }
    }

    /// Bar-close cycle while flat: score, trigger, size, maybe open.
    fn evaluate_entry(
        &mut self,
        ctx: &Arc<MarketContext>,
        window: &CandleWindow,
        bar_ts: DateTime<Utc>,
    ) -> Option<DecisionRecord> {
        let direction = self.pick_direction(ctx);
        let score = match &self.config.rule_set {
            Some(rules) => self.scoring.calculate_with_rules(ctx, direction, rules),
            None => self.scoring.calculate(ctx, direction),
        };

        let mut trigger = self.triggers.find_best_trigger(
            ctx,
            window,
            direction,
            self.bars_since_exit,
            self.pending_age_bars,
        );

        // pending-setup aging
        self.pending_age_bars = match trigger.status {
            TriggerStatus::Pending => self.pending_age_bars.saturating_add(1),
            _ => 0,
        };

        let mut leverage = None;
        let mut position_id = None;
        let mut note;

        match trigger.status {
            TriggerStatus::Triggered if score.final_score < self.config.min_entry_score => {
                warn!(
                    score = score.final_score,
                    floor = self.config.min_entry_score,
                    "trigger vetoed by entry score"
                );
                trigger.status = TriggerStatus::Rejected;
                trigger.reason = format!(
                    "{} (score {:.2} below floor {:.2})",
                    trigger.reason, score.final_score, self.config.min_entry_score
                );
                note = "trigger vetoed by score".to_string();
            }
            TriggerStatus::Triggered => {
                let exit_levels = self.exits.calculate_exit_levels(
                    ctx.current_price,
                    direction,
                    ctx.indicators.atr_14,
                    Some(&ctx.levels),
                );
                let sized = self.leverage.calculate(&ctx.symbol, ctx.regime.regime);
                let position = PositionState::open(&ctx.symbol, exit_levels.clone(), bar_ts);
                position_id = Some(position.position_id);

                info!(
                    symbol = %ctx.symbol,
                    %direction,
                    entry = ctx.current_price,
                    stop = exit_levels.stop_loss,
                    target = exit_levels.take_profit,
                    leverage = sized.final_leverage,
                    "position opened"
                );

                trigger.exit_levels = Some(exit_levels);
                leverage = Some(sized);
                self.position = Some(position);
                note = "entry triggered".to_string();
            }
            TriggerStatus::Pending => {
                note = "waiting on setup".to_string();
            }
            TriggerStatus::Expired => {
                note = "setup expired".to_string();
            }
            TriggerStatus::Rejected => {
                note = format!("no entry: {}", trigger.reason);
            }
        }

        if let Some(degraded) = &score.degraded {
            note = format!("{} (degraded: {})", note, degraded);
        }

        debug!(
            context = %ctx.context_id,
            status = ?trigger.status,
            score = score.final_score,
            "entry evaluation complete"
        );

        Some(DecisionRecord {
            decision_id: Uuid::new_v4(),
            timestamp: bar_ts,
            context_id: ctx.context_id.clone(),
            symbol: ctx.symbol.clone(),
            timeframe: ctx.timeframe.clone(),
            regime: Some(ctx.regime.clone()),
            score: Some(score),
            trigger: Some(trigger),
            leverage,
            exit_signal: None,
            position_id,
            note,
        })
    }

    /// Direction to evaluate this cycle: follow the regime when it leans,
    /// otherwise take the better-scoring side (SFP entries remain possible
    /// in chop).
    fn pick_direction(&self, ctx: &MarketContext) -> Direction {
        if ctx.regime.regime.is_bullish() {
            return Direction::Long;
        }
        if ctx.regime.regime.is_bearish() {
            return Direction::Short;
        }
        let long = self.scoring.calculate(ctx, Direction::Long).final_score;
        let short = self.scoring.calculate(ctx, Direction::Short).final_score;
        if short > long {
            Direction::Short
        } else {
            Direction::Long
        }
    }
}
