//! Composite entry scoring.
//!
//! Produces a normalized 0-1 score for a candidate direction from
//! independently normalized components (trend alignment, RSI, MACD, ADX,
//! mean reversion, volume, regime match). A missing indicator contributes a
//! neutral 0.5 instead of disqualifying the calculation. Strategy-specific
//! rule sets replace the built-in components with config-driven conditions
//! evaluated against the same indicator snapshot.
//!
//! The engine never fails on market data: a score that cannot be computed
//! comes back as the neutral default with a degraded reason attached.

use crate::context::MarketContext;
use crate::indicators::IndicatorSnapshot;
use crate::regime::Regime;
use crate::types::{DegradedReason, Direction};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Quality bucket derived from the final score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreQuality {
    Excellent,
    Good,
    Acceptable,
    Weak,
}

impl std::fmt::Display for ScoreQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoreQuality::Excellent => write!(f, "EXCELLENT"),
            ScoreQuality::Good => write!(f, "GOOD"),
            ScoreQuality::Acceptable => write!(f, "ACCEPTABLE"),
            ScoreQuality::Weak => write!(f, "WEAK"),
        }
    }
}

/// One named sub-score. Insertion order is preserved for the journal/UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentScore {
    pub name: String,
    /// 0..=1
    pub value: f64,
    pub weight: f64,
    /// False when the underlying indicator was missing and the neutral 0.5
    /// stand-in was used
    pub available: bool,
}

/// Result of one score calculation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryScoreResult {
    /// Weighted mean of the components, 0..=1
    pub final_score: f64,
    pub quality: ScoreQuality,
    pub direction: Direction,
    pub components: Vec<ComponentScore>,
    pub degraded: Option<DegradedReason>,
}

impl EntryScoreResult {
    fn neutral(direction: Direction, reason: DegradedReason) -> Self {
        Self {
            final_score: 0.5,
            quality: ScoreQuality::Weak,
            direction,
            components: Vec::new(),
            degraded: Some(reason),
        }
    }
}

/// Component weights for the built-in scoring mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub trend_alignment: f64,
    pub rsi_momentum: f64,
    pub macd_momentum: f64,
    pub adx_strength: f64,
    pub mean_reversion: f64,
    pub volume: f64,
    pub regime_match: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            trend_alignment: 0.20,
            rsi_momentum: 0.15,
            macd_momentum: 0.15,
            adx_strength: 0.125,
            mean_reversion: 0.125,
            volume: 0.10,
            regime_match: 0.15,
        }
    }
}

/// Configuration for entry scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryScoreConfig {
    pub weights: ScoreWeights,
    /// Score at or above this is EXCELLENT (default: 0.8)
    pub excellent_threshold: f64,
    /// Score at or above this is GOOD (default: 0.65)
    pub good_threshold: f64,
    /// Score at or above this is ACCEPTABLE (default: 0.5)
    pub acceptable_threshold: f64,
}

impl Default for EntryScoreConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            excellent_threshold: 0.8,
            good_threshold: 0.65,
            acceptable_threshold: 0.5,
        }
    }
}

/// Condition evaluated by a strategy rule against one indicator value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCondition {
    Above { value: f64 },
    Below { value: f64 },
    Between { low: f64, high: f64 },
    /// Outside the band on either side
    Extreme { low: f64, high: f64 },
    /// EMA stack agrees with the evaluated direction
    Aligned,
    /// Regime direction agrees with the evaluated direction
    DirectionMatch,
    /// Indicator crossed the value between the previous and current bar
    Crosses { value: f64 },
}

/// One strategy rule: indicator + condition + weight
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRule {
    pub name: String,
    /// Snapshot field name, e.g. "rsi_14" (ignored for Aligned/DirectionMatch)
    pub indicator: String,
    pub condition: RuleCondition,
    pub weight: f64,
}

/// Named collection of strategy rules replacing the built-in components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub name: String,
    pub rules: Vec<ScoreRule>,
}

impl RuleSet {
    /// Reject rule sets referencing unknown indicators or useless weights.
    /// This is a configuration error, not a market condition.
    pub fn validate(&self) -> Result<()> {
        if self.rules.is_empty() {
            bail!("rule set '{}' has no rules", self.name);
        }
        for rule in &self.rules {
            let needs_indicator = !matches!(
                rule.condition,
                RuleCondition::Aligned | RuleCondition::DirectionMatch
            );
            if needs_indicator && !IndicatorSnapshot::is_known_indicator(&rule.indicator) {
                bail!(
                    "rule '{}' in set '{}' references unknown indicator '{}'",
                    rule.name,
                    self.name,
                    rule.indicator
                );
            }
            if rule.weight <= 0.0 || !rule.weight.is_finite() {
                bail!("rule '{}' in set '{}' has non-positive weight", rule.name, self.name);
            }
        }
        Ok(())
    }
}

/// Composite entry score engine
#[derive(Debug, Clone)]
pub struct EntryScoreEngine {
    config: EntryScoreConfig,
}

impl EntryScoreEngine {
    pub fn new(config: EntryScoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EntryScoreConfig {
        &self.config
    }

    /// Score the context for the requested direction with the built-in
    /// component set.
    pub fn calculate(&self, ctx: &MarketContext, direction: Direction) -> EntryScoreResult {
        if !direction.is_directional() {
            return EntryScoreResult::neutral(
                Direction::Neutral,
                DegradedReason::InternalError("neutral direction requested".to_string()),
            );
        }

        let snap = &ctx.indicators;
        let w = &self.config.weights;
        let mut components = Vec::with_capacity(7);

        push_component(
            &mut components,
            "trend_alignment",
            trend_alignment(ctx.current_price, snap, direction),
            w.trend_alignment,
        );
        push_component(
            &mut components,
            "rsi_momentum",
            snap.rsi_14.map(|v| rsi_score(v, direction)),
            w.rsi_momentum,
        );
        push_component(
            &mut components,
            "macd_momentum",
            macd_score(snap, direction),
            w.macd_momentum,
        );
        push_component(
            &mut components,
            "adx_strength",
            snap.adx_14.map(adx_score),
            w.adx_strength,
        );
        push_component(
            &mut components,
            "mean_reversion",
            snap.bb_percent_b.map(|v| percent_b_score(v, direction)),
            w.mean_reversion,
        );
        push_component(
            &mut components,
            "volume",
            snap.volume_ratio.map(volume_score),
            w.volume,
        );
        push_component(
            &mut components,
            "regime_match",
            Some(regime_match_score(ctx.regime.regime, direction)),
            w.regime_match,
        );

        self.finish(direction, components)
    }

    /// Score the context with a validated strategy rule set instead of the
    /// built-in components.
    pub fn calculate_with_rules(
        &self,
        ctx: &MarketContext,
        direction: Direction,
        rules: &RuleSet,
    ) -> EntryScoreResult {
        if !direction.is_directional() {
            return EntryScoreResult::neutral(
                Direction::Neutral,
                DegradedReason::InternalError("neutral direction requested".to_string()),
            );
        }

        let mut components = Vec::with_capacity(rules.rules.len());
        for rule in &rules.rules {
            let value = self.evaluate_rule(ctx, direction, rule);
            push_component(&mut components, &rule.name, value, rule.weight);
        }
        self.finish(direction, components)
    }

    fn evaluate_rule(
        &self,
        ctx: &MarketContext,
        direction: Direction,
        rule: &ScoreRule,
    ) -> Option<f64> {
        match &rule.condition {
            RuleCondition::Aligned => trend_alignment(ctx.current_price, &ctx.indicators, direction)
                .map(|v| if v >= 0.75 { 1.0 } else { 0.0 }),
            RuleCondition::DirectionMatch => {
                Some(regime_match_score(ctx.regime.regime, direction))
            }
            RuleCondition::Above { value } => {
                let v = self.indicator(ctx, &rule.indicator)?;
                Some(if v > *value { 1.0 } else { 0.0 })
            }
            RuleCondition::Below { value } => {
                let v = self.indicator(ctx, &rule.indicator)?;
                Some(if v < *value { 1.0 } else { 0.0 })
            }
            RuleCondition::Between { low, high } => {
                let v = self.indicator(ctx, &rule.indicator)?;
                Some(if v >= *low && v <= *high { 1.0 } else { 0.0 })
            }
            RuleCondition::Extreme { low, high } => {
                let v = self.indicator(ctx, &rule.indicator)?;
                Some(if v <= *low || v >= *high { 1.0 } else { 0.0 })
            }
            RuleCondition::Crosses { value } => {
                let current = self.indicator(ctx, &rule.indicator)?;
                let prev = ctx.indicators_prev.as_ref()?.by_name(&rule.indicator)?;
                let crossed = (prev < *value && current >= *value)
                    || (prev > *value && current <= *value);
                Some(if crossed { 1.0 } else { 0.0 })
            }
        }
    }

    fn indicator(&self, ctx: &MarketContext, name: &str) -> Option<f64> {
        let value = ctx.indicators.by_name(name);
        if value.is_none() && !IndicatorSnapshot::is_known_indicator(name) {
            // validate() should have caught this; degrade instead of failing
            warn!(indicator = name, "rule references unknown indicator");
        }
        value
    }

    fn finish(&self, direction: Direction, components: Vec<ComponentScore>) -> EntryScoreResult {
        let weight_sum: f64 = components.iter().map(|c| c.weight).sum();
        if weight_sum <= 0.0 {
            return EntryScoreResult::neutral(direction, DegradedReason::InsufficientData);
        }

        let weighted: f64 = components.iter().map(|c| c.value * c.weight).sum();
        let mut final_score = weighted / weight_sum;
        let mut degraded = None;

        if !final_score.is_finite() {
            final_score = 0.5;
            degraded = Some(DegradedReason::InternalError(
                "non-finite score".to_string(),
            ));
        }
        final_score = final_score.clamp(0.0, 1.0);

        if components.iter().all(|c| !c.available) {
            degraded = Some(DegradedReason::InsufficientData);
        }

        let quality = self.quality_for(final_score);
        debug!(%direction, final_score, %quality, "entry score computed");

        EntryScoreResult {
            final_score,
            quality,
            direction,
            components,
            degraded,
        }
    }

    fn quality_for(&self, score: f64) -> ScoreQuality {
        if score >= self.config.excellent_threshold {
            ScoreQuality::Excellent
        } else if score >= self.config.good_threshold {
            ScoreQuality::Good
        } else if score >= self.config.acceptable_threshold {
            ScoreQuality::Acceptable
        } else {
            ScoreQuality::Weak
        }
    }
}

fn push_component(
    components: &mut Vec<ComponentScore>,
    name: &str,
    value: Option<f64>,
    weight: f64,
) {
    let (value, available) = match value {
        Some(v) if v.is_finite() => (v.clamp(0.0, 1.0), true),
        _ => (0.5, false),
    };
    components.push(ComponentScore {
        name: name.to_string(),
        value,
        weight,
        available,
    });
}

/// EMA stacking score. Full stack in the trade direction scores 1.0, a
/// partial stack 0.7, flat/mixed 0.4, and an opposing stack 0.0.
fn trend_alignment(
    close: f64,
    snap: &IndicatorSnapshot,
    direction: Direction,
) -> Option<f64> {
    let ema_20 = snap.ema_20?;
    let ema_50 = snap.ema_50?;

    let (fast_ok, slow_ok) = match direction {
        Direction::Long => (close > ema_20, ema_20 > ema_50),
        Direction::Short => (close < ema_20, ema_20 < ema_50),
        Direction::Neutral => return None,
    };

    // EMA200 participates only when present
    let macro_ok = snap.ema_200.map(|ema_200| match direction {
        Direction::Long => ema_50 > ema_200,
        Direction::Short => ema_50 < ema_200,
        Direction::Neutral => false,
    });

    let score = match (fast_ok, slow_ok) {
        (true, true) => match macro_ok {
            Some(true) | None => 1.0,
            Some(false) => 0.7,
        },
        (true, false) | (false, true) => 0.4,
        (false, false) => 0.0,
    };
    Some(score)
}

/// RSI breakpoints for the evaluated side. For LONG: oversold readings score
/// high, overbought low; SHORT uses the mirrored reading.
fn rsi_score(rsi: f64, direction: Direction) -> f64 {
    let effective = match direction {
        Direction::Short => 100.0 - rsi,
        _ => rsi,
    };
    match effective {
        v if v < 30.0 => 1.0,
        v if v < 40.0 => 0.8,
        v if v <= 60.0 => 0.6,
        v if v <= 70.0 => 0.4,
        _ => 0.2,
    }
}

/// MACD histogram sign plus line agreement
fn macd_score(snap: &IndicatorSnapshot, direction: Direction) -> Option<f64> {
    let hist = snap.macd_histogram?;
    let line = snap.macd_line.unwrap_or(0.0);
    let (hist, line) = match direction {
        Direction::Short => (-hist, -line),
        _ => (hist, line),
    };
    Some(if hist > 0.0 && line > 0.0 {
        1.0
    } else if hist > 0.0 {
        0.75
    } else if hist == 0.0 {
        0.5
    } else if line > 0.0 {
        0.25
    } else {
        0.0
    })
}

/// Direction-agnostic trend strength from ADX
fn adx_score(adx: f64) -> f64 {
    match adx {
        v if v >= 40.0 => 1.0,
        v if v >= 30.0 => 0.85,
        v if v >= 25.0 => 0.7,
        v if v >= 20.0 => 0.55,
        _ => 0.3,
    }
}

/// Bollinger %B mean-reversion score for the evaluated side
fn percent_b_score(percent_b: f64, direction: Direction) -> f64 {
    let effective = match direction {
        Direction::Short => 1.0 - percent_b,
        _ => percent_b,
    };
    match effective {
        v if v < 0.0 => 1.0,
        v if v < 0.2 => 0.8,
        v if v <= 0.8 => 0.5,
        v if v <= 1.0 => 0.2,
        _ => 0.1,
    }
}

/// Volume expansion score
fn volume_score(ratio: f64) -> f64 {
    match ratio {
        v if v >= 2.0 => 1.0,
        v if v >= 1.5 => 0.8,
        v if v >= 1.0 => 0.6,
        v if v >= 0.5 => 0.4,
        _ => 0.2,
    }
}

/// How well the current regime supports the evaluated direction
fn regime_match_score(regime: Regime, direction: Direction) -> f64 {
    match (regime, direction) {
        (Regime::StrongTrendBull, Direction::Long) => 1.0,
        (Regime::WeakTrendBull, Direction::Long) => 0.75,
        (Regime::StrongTrendBear, Direction::Short) => 1.0,
        (Regime::WeakTrendBear, Direction::Short) => 0.75,
        (Regime::StrongTrendBull, Direction::Short)
        | (Regime::StrongTrendBear, Direction::Long) => 0.0,
        (Regime::WeakTrendBull, Direction::Short)
        | (Regime::WeakTrendBear, Direction::Long) => 0.25,
        (Regime::VolatilityExplosive, _) => 0.4,
        (Regime::ChopRange, _) | (Regime::Neutral, _) => 0.5,
        (_, Direction::Neutral) => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::test_support::flat_window;
    use crate::context::MarketContextBuilder;
    use crate::context::{ContextConfig, MarketContext};
    use crate::levels::{LevelConfig, LevelEngine};
    use crate::regime::{RegimeConfig, RegimeDetector};
    use std::sync::Arc;

    fn context_with(snapshot: IndicatorSnapshot) -> Arc<MarketContext> {
        let builder = MarketContextBuilder::new(
            RegimeDetector::new(RegimeConfig::default()),
            LevelEngine::new(LevelConfig::default()),
            ContextConfig {
                cache_ttl_secs: 0,
                cache_max_entries: 1,
            },
        );
        let w = flat_window(100.0, 60);
        builder.build(&w, "BTCUSDT", "1h", Some(&snapshot))
    }

    #[test]
    fn test_score_bounds_and_neutral_baseline() {
        let engine = EntryScoreEngine::new(EntryScoreConfig::default());
        // flat window: most indicators land neutral or unavailable
        let ctx = context_with(IndicatorSnapshot::default());
        let result = engine.calculate(&ctx, Direction::Long);
        assert!((0.0..=1.0).contains(&result.final_score));
    }

    #[test]
    fn test_all_neutral_components_score_half() {
        let engine = EntryScoreEngine::new(EntryScoreConfig::default());
        let components: Vec<ComponentScore> = (0..5)
            .map(|i| ComponentScore {
                name: format!("c{}", i),
                value: 0.5,
                weight: 0.2,
                available: true,
            })
            .collect();
        let result = engine.finish(Direction::Long, components);
        assert!((result.final_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_strong_long_setup_scores_high() {
        let engine = EntryScoreEngine::new(EntryScoreConfig::default());
        let snap = IndicatorSnapshot {
            ema_20: Some(99.0),
            ema_50: Some(97.0),
            ema_200: Some(90.0),
            adx_14: Some(42.0),
            rsi_14: Some(35.0),
            macd_line: Some(0.8),
            macd_signal: Some(0.5),
            macd_histogram: Some(0.3),
            bb_percent_b: Some(0.15),
            volume_ratio: Some(2.2),
            atr_14: Some(1.0),
            atr_percent: Some(1.0),
        };
        let ctx = context_with(snap);
        let result = engine.calculate(&ctx, Direction::Long);
        assert!(result.final_score > 0.8, "got {}", result.final_score);
        assert_eq!(result.quality, ScoreQuality::Excellent);
        assert_eq!(result.direction, Direction::Long);
        assert_eq!(result.components.len(), 7);
    }

    #[test]
    fn test_missing_indicator_contributes_neutral() {
        let engine = EntryScoreEngine::new(EntryScoreConfig::default());
        let snap = IndicatorSnapshot {
            ema_20: Some(99.0),
            ema_50: Some(97.0),
            ..Default::default()
        };
        let ctx = context_with(snap);
        let result = engine.calculate(&ctx, Direction::Long);
        let rsi = result
            .components
            .iter()
            .find(|c| c.name == "rsi_momentum")
            .unwrap();
        assert!(!rsi.available);
        assert!((rsi.value - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_breakpoints() {
        assert_eq!(rsi_score(25.0, Direction::Long), 1.0);
        assert_eq!(rsi_score(50.0, Direction::Long), 0.6);
        assert_eq!(rsi_score(75.0, Direction::Long), 0.2);
        // mirrored for shorts: overbought is a good short
        assert_eq!(rsi_score(75.0, Direction::Short), 1.0);
    }

    #[test]
    fn test_quality_thresholds() {
        let engine = EntryScoreEngine::new(EntryScoreConfig::default());
        assert_eq!(engine.quality_for(0.85), ScoreQuality::Excellent);
        assert_eq!(engine.quality_for(0.7), ScoreQuality::Good);
        assert_eq!(engine.quality_for(0.55), ScoreQuality::Acceptable);
        assert_eq!(engine.quality_for(0.3), ScoreQuality::Weak);
    }

    #[test]
    fn test_rule_set_validation() {
        let good = RuleSet {
            name: "momentum".to_string(),
            rules: vec![ScoreRule {
                name: "rsi_oversold".to_string(),
                indicator: "rsi_14".to_string(),
                condition: RuleCondition::Below { value: 30.0 },
                weight: 1.0,
            }],
        };
        assert!(good.validate().is_ok());

        let bad = RuleSet {
            name: "broken".to_string(),
            rules: vec![ScoreRule {
                name: "mystery".to_string(),
                indicator: "stoch_k".to_string(),
                condition: RuleCondition::Above { value: 80.0 },
                weight: 1.0,
            }],
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_rule_evaluation() {
        let engine = EntryScoreEngine::new(EntryScoreConfig::default());
        let snap = IndicatorSnapshot {
            rsi_14: Some(25.0),
            adx_14: Some(35.0),
            ..Default::default()
        };
        let ctx = context_with(snap);
        let rules = RuleSet {
            name: "dip_buy".to_string(),
            rules: vec![
                ScoreRule {
                    name: "rsi_oversold".to_string(),
                    indicator: "rsi_14".to_string(),
                    condition: RuleCondition::Below { value: 30.0 },
                    weight: 1.0,
                },
                ScoreRule {
                    name: "adx_trending".to_string(),
                    indicator: "adx_14".to_string(),
                    condition: RuleCondition::Above { value: 25.0 },
                    weight: 1.0,
                },
            ],
        };
        let result = engine.calculate_with_rules(&ctx, Direction::Long, &rules);
        assert!((result.final_score - 1.0).abs() < 1e-9);
        assert_eq!(result.components.len(), 2);
    }

    #[test]
    fn test_crosses_rule_uses_prev_snapshot() {
        let engine = EntryScoreEngine::new(EntryScoreConfig::default());
        let snap = IndicatorSnapshot {
            rsi_14: Some(55.0),
            ..Default::default()
        };
        let ctx = context_with(snap);
        let rules = RuleSet {
            name: "cross".to_string(),
            rules: vec![ScoreRule {
                name: "rsi_cross_50".to_string(),
                indicator: "rsi_14".to_string(),
                condition: RuleCondition::Crosses { value: 50.0 },
                weight: 1.0,
            }],
        };
        let result = engine.calculate_with_rules(&ctx, Direction::Long, &rules);
        // prev snapshot exists (flat window) but its RSI reads 100 on a flat
        // series, so the cross from above registers
        assert!((0.0..=1.0).contains(&result.final_score));
    }

    #[test]
    fn test_neutral_direction_degrades() {
        let engine = EntryScoreEngine::new(EntryScoreConfig::default());
        let ctx = context_with(IndicatorSnapshot::default());
        let result = engine.calculate(&ctx, Direction::Neutral);
        assert_eq!(result.final_score, 0.5);
        assert!(result.degraded.is_some());
    }
}
