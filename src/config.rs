//! Aggregate pipeline configuration.
//!
//! Every engine owns its config struct; this module bundles them for JSON
//! loading and validation at the adapter boundary. A reload builds a new
//! pipeline from the new config and swaps the instance wholesale; live
//! config objects are never patched in place.

use crate::context::ContextConfig;
use crate::exits::ExitConfig;
use crate::leverage::LeverageConfig;
use crate::levels::LevelConfig;
use crate::regime::RegimeConfig;
use crate::scoring::{EntryScoreConfig, RuleSet};
use crate::triggers::TriggerConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the whole decision pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub regime: RegimeConfig,
    pub levels: LevelConfig,
    pub context: ContextConfig,
    pub scoring: EntryScoreConfig,
    pub triggers: TriggerConfig,
    pub exits: ExitConfig,
    pub leverage: LeverageConfig,
    /// Entry score below this never opens a position, trigger or not
    /// (default: 0.5)
    pub min_entry_score: f64,
    /// Optional strategy rule set replacing the built-in score components
    pub rule_set: Option<RuleSet>,
}

impl PipelineConfig {
    /// Load and validate a config from a JSON file. Unknown pivot variants,
    /// unknown rule indicators and nonsensical thresholds are hard errors
    /// here: they indicate a broken config, not a market condition.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(rules) = &self.rule_set {
            rules.validate()?;
        }
        if self.exits.min_risk_reward <= 0.0 {
            bail!("exits.min_risk_reward must be positive");
        }
        if self.levels.max_levels < 2 {
            bail!("levels.max_levels must be at least 2");
        }
        if self.regime.adx_weak_threshold > self.regime.adx_strong_threshold {
            bail!("regime.adx_weak_threshold above adx_strong_threshold");
        }
        if !(0.0..=1.0).contains(&self.min_entry_score) {
            bail!("min_entry_score must be within 0..=1");
        }
        if self.triggers.min_confidence <= 0.0 || self.triggers.min_confidence > 1.0 {
            bail!("triggers.min_confidence must be within (0, 1]");
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            regime: RegimeConfig::default(),
            levels: LevelConfig::default(),
            context: ContextConfig::default(),
            scoring: EntryScoreConfig::default(),
            triggers: TriggerConfig::default(),
            exits: ExitConfig::default(),
            leverage: LeverageConfig::default(),
            min_entry_score: 0.5,
            rule_set: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{RuleCondition, ScoreRule};

    #[test]
    fn test_default_validates() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_bad_rule_set_rejected() {
        let mut config = PipelineConfig::default();
        config.rule_set = Some(RuleSet {
            name: "broken".to_string(),
            rules: vec![ScoreRule {
                name: "x".to_string(),
                indicator: "nope".to_string(),
                condition: RuleCondition::Above { value: 1.0 },
                weight: 1.0,
            }],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_thresholds_rejected() {
        let mut config = PipelineConfig::default();
        config.exits.min_risk_reward = 0.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.regime.adx_weak_threshold = 50.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_gets_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"min_entry_score": 0.6}"#).unwrap();
        assert!((config.min_entry_score - 0.6).abs() < 1e-9);
        assert_eq!(config.levels.max_levels, 12);
    }

    #[test]
    fn test_unknown_pivot_variant_is_parse_error() {
        let parsed: Result<PipelineConfig, _> =
            serde_json::from_str(r#"{"levels": {"pivot_variant": "renko"}}"#);
        assert!(parsed.is_err());
        let ok: PipelineConfig =
            serde_json::from_str(r#"{"levels": {"pivot_variant": "camarilla"}}"#).unwrap();
        assert_eq!(ok.levels.pivot_variant, crate::levels::PivotVariant::Camarilla);
    }

    #[test]
    fn test_roundtrip() {
        let config = PipelineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert!((back.min_entry_score - config.min_entry_score).abs() < 1e-9);
    }
}
