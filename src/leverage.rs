//! Leverage sizing from asset tier and market regime.
//!
//! Each symbol maps to a tier with a base leverage and a hard ceiling; the
//! regime then scales the base (strong trends boost it, chop and explosive
//! volatility cut it) and the result is clamped to the tier ceiling with a
//! floor of 1x. Deterministic and stateless aside from config.

use crate::regime::Regime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Asset quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetTier {
    BlueChip,
    MidCap,
    SmallCap,
}

impl std::fmt::Display for AssetTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetTier::BlueChip => write!(f, "BLUE_CHIP"),
            AssetTier::MidCap => write!(f, "MID_CAP"),
            AssetTier::SmallCap => write!(f, "SMALL_CAP"),
        }
    }
}

/// What the rules did to the base leverage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeverageAction {
    Kept,
    Boosted,
    Reduced,
    /// The regime multiplier pushed past the tier ceiling and was clamped
    CappedByTier,
}

/// Per-tier leverage bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierLimits {
    pub base_leverage: f64,
    pub max_leverage: f64,
}

/// Configuration for leverage sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeverageConfig {
    pub blue_chip: TierLimits,
    pub mid_cap: TierLimits,
    pub small_cap: TierLimits,
    /// Explicit symbol -> tier assignments; anything missing falls back to
    /// `default_tier`
    pub symbol_tiers: HashMap<String, AssetTier>,
    pub default_tier: AssetTier,
    /// Regime multipliers applied to the tier's base leverage
    pub strong_trend_multiplier: f64,
    pub weak_trend_multiplier: f64,
    pub chop_multiplier: f64,
    pub volatility_multiplier: f64,
    pub neutral_multiplier: f64,
}

impl Default for LeverageConfig {
    fn default() -> Self {
        let mut symbol_tiers = HashMap::new();
        for s in ["BTCUSDT", "ETHUSDT"] {
            symbol_tiers.insert(s.to_string(), AssetTier::BlueChip);
        }
        for s in ["SOLUSDT", "BNBUSDT", "XRPUSDT", "ADAUSDT"] {
            symbol_tiers.insert(s.to_string(), AssetTier::MidCap);
        }
        Self {
            blue_chip: TierLimits {
                base_leverage: 10.0,
                max_leverage: 20.0,
            },
            mid_cap: TierLimits {
                base_leverage: 5.0,
                max_leverage: 10.0,
            },
            small_cap: TierLimits {
                base_leverage: 3.0,
                max_leverage: 5.0,
            },
            symbol_tiers,
            default_tier: AssetTier::SmallCap,
            strong_trend_multiplier: 1.5,
            weak_trend_multiplier: 1.0,
            chop_multiplier: 0.5,
            volatility_multiplier: 0.4,
            neutral_multiplier: 0.75,
        }
    }
}

/// Result of one leverage calculation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeverageResult {
    pub symbol: String,
    pub tier: AssetTier,
    pub base_leverage: f64,
    pub regime_multiplier: f64,
    /// Bounded final leverage, >= 1
    pub final_leverage: f64,
    pub action: LeverageAction,
    pub reasoning: String,
}

/// Maps asset tier + regime into a bounded leverage multiplier
#[derive(Debug, Clone)]
pub struct LeverageEngine {
    config: LeverageConfig,
}

impl LeverageEngine {
    pub fn new(config: LeverageConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LeverageConfig {
        &self.config
    }

    pub fn tier_for(&self, symbol: &str) -> AssetTier {
        self.config
            .symbol_tiers
            .get(symbol)
            .copied()
            .unwrap_or(self.config.default_tier)
    }

    pub fn calculate(&self, symbol: &str, regime: Regime) -> LeverageResult {
        let tier = self.tier_for(symbol);
        let limits = match tier {
            AssetTier::BlueChip => &self.config.blue_chip,
            AssetTier::MidCap => &self.config.mid_cap,
            AssetTier::SmallCap => &self.config.small_cap,
        };

        let multiplier = match regime {
            Regime::StrongTrendBull | Regime::StrongTrendBear => {
                self.config.strong_trend_multiplier
            }
            Regime::WeakTrendBull | Regime::WeakTrendBear => self.config.weak_trend_multiplier,
            Regime::ChopRange => self.config.chop_multiplier,
            Regime::VolatilityExplosive => self.config.volatility_multiplier,
            Regime::Neutral => self.config.neutral_multiplier,
        };

        let unclamped = limits.base_leverage * multiplier;
        let final_leverage = unclamped.min(limits.max_leverage).max(1.0);

        let action = if unclamped > limits.max_leverage {
            LeverageAction::CappedByTier
        } else if multiplier > 1.0 {
            LeverageAction::Boosted
        } else if multiplier < 1.0 {
            LeverageAction::Reduced
        } else {
            LeverageAction::Kept
        };

        debug!(symbol, %tier, final_leverage, ?action, "leverage computed");

        LeverageResult {
            symbol: symbol.to_string(),
            tier,
            base_leverage: limits.base_leverage,
            regime_multiplier: multiplier,
            final_leverage,
            action,
            reasoning: format!(
                "{} base {:.1}x, {} multiplier {:.2}, bounded to {:.1}x",
                tier, limits.base_leverage, regime, multiplier, final_leverage
            ),
        }
    }
}
