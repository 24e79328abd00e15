//! Market regime classification.
//!
//! Classifies the current window into one of seven regimes from
//! trend/momentum/volatility components, in strict priority order:
//! 1. Extreme volatility overrides everything (VOLATILITY_EXPLOSIVE)
//! 2. EMA alignment (close/EMA20/EMA50 stacking with tolerance)
//! 3. ADX strength bucket (strong / weak / none)
//! 4. Alignment + strength combine into the final regime
//!
//! Never fails on market data: a short window yields Neutral with
//! confidence 0 and a degraded reason.

use crate::candles::CandleWindow;
use crate::indicators::IndicatorSnapshot;
use crate::types::DegradedReason;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Discrete market regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    StrongTrendBull,
    WeakTrendBull,
    StrongTrendBear,
    WeakTrendBear,
    ChopRange,
    VolatilityExplosive,
    Neutral,
}

impl Regime {
    /// Whether trend-following market entries (breakout/pullback) are
    /// sanctioned in this regime. SFP-style reversal entries have their own
    /// carve-out in the trigger engine.
    pub fn allows_market_entry(&self) -> bool {
        !matches!(self, Regime::ChopRange | Regime::Neutral)
    }

    pub fn is_bullish(&self) -> bool {
        matches!(self, Regime::StrongTrendBull | Regime::WeakTrendBull)
    }

    pub fn is_bearish(&self) -> bool {
        matches!(self, Regime::StrongTrendBear | Regime::WeakTrendBear)
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regime::StrongTrendBull => write!(f, "STRONG_TREND_BULL"),
            Regime::WeakTrendBull => write!(f, "WEAK_TREND_BULL"),
            Regime::StrongTrendBear => write!(f, "STRONG_TREND_BEAR"),
            Regime::WeakTrendBear => write!(f, "WEAK_TREND_BEAR"),
            Regime::ChopRange => write!(f, "CHOP_RANGE"),
            Regime::VolatilityExplosive => write!(f, "VOLATILITY_EXPLOSIVE"),
            Regime::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// close/EMA20/EMA50 stacking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmaAlignment {
    Bull,
    Bear,
    Neutral,
}

/// ADX trend-strength bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdxStrength {
    Strong,
    Weak,
    None,
}

/// ATR% volatility bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityState {
    Extreme,
    Elevated,
    Normal,
}

/// RSI momentum bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MomentumState {
    Overbought,
    Bullish,
    Neutral,
    Bearish,
    Oversold,
}

/// Configuration for regime detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// Minimum rows required for a classification (default: 50)
    pub min_window: usize,
    /// ATR% above this is an explosive-volatility override (default: 5.0)
    pub volatility_extreme_threshold: f64,
    /// ATR% above this counts as elevated volatility (default: 2.5)
    pub volatility_elevated_threshold: f64,
    /// Slack applied to EMA stacking comparisons, percent (default: 0.1)
    pub ema_alignment_tolerance_pct: f64,
    /// ADX at or above this is a strong trend (default: 30.0)
    pub adx_strong_threshold: f64,
    /// ADX at or above this is a weak trend (default: 20.0)
    pub adx_weak_threshold: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            min_window: 50,
            volatility_extreme_threshold: 5.0,
            volatility_elevated_threshold: 2.5,
            ema_alignment_tolerance_pct: 0.1,
            adx_strong_threshold: 30.0,
            adx_weak_threshold: 20.0,
        }
    }
}

/// Result of one regime classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeResult {
    pub regime: Regime,
    /// 0..=1
    pub confidence: f64,
    /// Human-readable explanation for the journal/UI
    pub reasoning: String,
    pub ema_alignment: EmaAlignment,
    pub adx_strength: AdxStrength,
    pub volatility_state: VolatilityState,
    pub momentum_state: MomentumState,
    pub adx: Option<f64>,
    pub atr_percent: Option<f64>,
    pub rsi: Option<f64>,
    /// Set when a safe default was returned instead of a real classification
    pub degraded: Option<DegradedReason>,
}

impl RegimeResult {
    pub fn allows_market_entry(&self) -> bool {
        self.regime.allows_market_entry()
    }

    fn neutral(reason: DegradedReason, text: String) -> Self {
        Self {
            regime: Regime::Neutral,
            confidence: 0.0,
            reasoning: text,
            ema_alignment: EmaAlignment::Neutral,
            adx_strength: AdxStrength::None,
            volatility_state: VolatilityState::Normal,
            momentum_state: MomentumState::Neutral,
            adx: None,
            atr_percent: None,
            rsi: None,
            degraded: Some(reason),
        }
    }
}

/// Deterministic regime detector, a pure function of the window + config
#[derive(Debug, Clone)]
pub struct RegimeDetector {
    config: RegimeConfig,
}

impl RegimeDetector {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Classify the window. Never fails: short or broken data degrades to
    /// Neutral with confidence 0.
    pub fn detect(&self, window: &CandleWindow, snapshot: &IndicatorSnapshot) -> RegimeResult {
        if window.len() < self.config.min_window {
            return RegimeResult::neutral(
                DegradedReason::InsufficientData,
                format!(
                    "only {} of {} bars available",
                    window.len(),
                    self.config.min_window
                ),
            );
        }

        let close = window.current_price();
        let momentum_state = momentum_state(snapshot.rsi_14);

        // 1. Volatility override: explosive ATR% trumps any trend reading
        let volatility_state = self.volatility_state(snapshot.atr_percent);
        if volatility_state == VolatilityState::Extreme {
            let atr_pct = snapshot.atr_percent.unwrap_or(0.0);
            debug!(atr_pct, "volatility override");
            return RegimeResult {
                regime: Regime::VolatilityExplosive,
                confidence: 0.9,
                reasoning: format!(
                    "ATR {:.2}% above explosive threshold {:.2}%",
                    atr_pct, self.config.volatility_extreme_threshold
                ),
                ema_alignment: self.ema_alignment(close, snapshot),
                adx_strength: self.adx_strength(snapshot.adx_14),
                volatility_state,
                momentum_state,
                adx: snapshot.adx_14,
                atr_percent: snapshot.atr_percent,
                rsi: snapshot.rsi_14,
                degraded: None,
            };
        }

        // 2 + 3. Component states
        let ema_alignment = self.ema_alignment(close, snapshot);
        let adx_strength = self.adx_strength(snapshot.adx_14);

        // 4. Combine
        let (regime, confidence, reasoning) =
            self.combine(ema_alignment, adx_strength, snapshot.adx_14);

        debug!(%regime, confidence, "regime classified");

        RegimeResult {
            regime,
            confidence,
            reasoning,
            ema_alignment,
            adx_strength,
            volatility_state,
            momentum_state,
            adx: snapshot.adx_14,
            atr_percent: snapshot.atr_percent,
            rsi: snapshot.rsi_14,
            degraded: None,
        }
    }

    fn volatility_state(&self, atr_percent: Option<f64>) -> VolatilityState {
        match atr_percent {
            Some(v) if v > self.config.volatility_extreme_threshold => VolatilityState::Extreme,
            Some(v) if v > self.config.volatility_elevated_threshold => VolatilityState::Elevated,
            _ => VolatilityState::Normal,
        }
    }

    fn ema_alignment(&self, close: f64, snapshot: &IndicatorSnapshot) -> EmaAlignment {
        let (Some(ema_20), Some(ema_50)) = (snapshot.ema_20, snapshot.ema_50) else {
            return EmaAlignment::Neutral;
        };
        // tolerance loosens the stacking comparison so a marginal cross
        // does not flip the regime every bar
        let tol = |v: f64| v.abs() * self.config.ema_alignment_tolerance_pct / 100.0;

        if close > ema_20 - tol(ema_20) && ema_20 > ema_50 - tol(ema_50) {
            EmaAlignment::Bull
        } else if close < ema_20 + tol(ema_20) && ema_20 < ema_50 + tol(ema_50) {
            EmaAlignment::Bear
        } else {
            EmaAlignment::Neutral
        }
    }

    fn adx_strength(&self, adx: Option<f64>) -> AdxStrength {
        match adx {
            Some(v) if v >= self.config.adx_strong_threshold => AdxStrength::Strong,
            Some(v) if v >= self.config.adx_weak_threshold => AdxStrength::Weak,
            _ => AdxStrength::None,
        }
    }

    fn combine(
        &self,
        alignment: EmaAlignment,
        strength: AdxStrength,
        adx: Option<f64>,
    ) -> (Regime, f64, String) {
        let adx_val = adx.unwrap_or(0.0);
        match (alignment, strength) {
            (EmaAlignment::Bull, AdxStrength::Strong) => (
                Regime::StrongTrendBull,
                0.85,
                format!("bullish EMA stack with ADX {:.1}", adx_val),
            ),
            (EmaAlignment::Bull, AdxStrength::Weak) => (
                Regime::WeakTrendBull,
                0.65,
                format!("bullish EMA stack, moderate ADX {:.1}", adx_val),
            ),
            (EmaAlignment::Bear, AdxStrength::Strong) => (
                Regime::StrongTrendBear,
                0.85,
                format!("bearish EMA stack with ADX {:.1}", adx_val),
            ),
            (EmaAlignment::Bear, AdxStrength::Weak) => (
                Regime::WeakTrendBear,
                0.65,
                format!("bearish EMA stack, moderate ADX {:.1}", adx_val),
            ),
            (EmaAlignment::Neutral, AdxStrength::None) => (
                Regime::ChopRange,
                0.6,
                format!("no EMA alignment, ADX {:.1} below trend threshold", adx_val),
            ),
            _ => (
                Regime::Neutral,
                0.4,
                "mixed alignment and strength readings".to_string(),
            ),
        }
    }
}

fn momentum_state(rsi: Option<f64>) -> MomentumState {
    match rsi {
        Some(v) if v >= 70.0 => MomentumState::Overbought,
        Some(v) if v >= 55.0 => MomentumState::Bullish,
        Some(v) if v <= 30.0 => MomentumState::Oversold,
        Some(v) if v <= 45.0 => MomentumState::Bearish,
        _ => MomentumState::Neutral,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::test_support::flat_window;
    use crate::types::DegradedReason;

    fn snapshot(
        ema_20: f64,
        ema_50: f64,
        adx: f64,
        atr_percent: f64,
    ) -> IndicatorSnapshot {
        IndicatorSnapshot {
            ema_20: Some(ema_20),
            ema_50: Some(ema_50),
            adx_14: Some(adx),
            atr_percent: Some(atr_percent),
            rsi_14: Some(50.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_short_window_is_neutral_confidence_zero() {
        let detector = RegimeDetector::new(RegimeConfig::default());
        let w = flat_window(100.0, 49);
        let result = detector.detect(&w, &IndicatorSnapshot::compute(&w));
        assert_eq!(result.regime, Regime::Neutral);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.degraded, Some(DegradedReason::InsufficientData));
    }

    #[test]
    fn test_volatility_override_beats_trend() {
        let detector = RegimeDetector::new(RegimeConfig::default());
        let w = flat_window(100.0, 60);
        // strongly bullish stack, but explosive ATR% wins
        let snap = snapshot(99.0, 95.0, 40.0, 6.5);
        let result = detector.detect(&w, &snap);
        assert_eq!(result.regime, Regime::VolatilityExplosive);
        assert!((result.confidence - 0.9).abs() < 1e-9);
        assert_eq!(result.volatility_state, VolatilityState::Extreme);
    }

    #[test]
    fn test_strong_trend_bull() {
        let detector = RegimeDetector::new(RegimeConfig::default());
        let w = flat_window(100.0, 60);
        let snap = snapshot(99.0, 95.0, 35.0, 1.0);
        let result = detector.detect(&w, &snap);
        assert_eq!(result.regime, Regime::StrongTrendBull);
        assert_eq!(result.ema_alignment, EmaAlignment::Bull);
        assert_eq!(result.adx_strength, AdxStrength::Strong);
        assert!(result.allows_market_entry());
    }

    #[test]
    fn test_weak_trend_bear() {
        let detector = RegimeDetector::new(RegimeConfig::default());
        let w = flat_window(100.0, 60);
        let snap = snapshot(101.0, 105.0, 25.0, 1.0);
        let result = detector.detect(&w, &snap);
        assert_eq!(result.regime, Regime::WeakTrendBear);
    }

    #[test]
    fn test_chop_range_blocks_market_entry() {
        let detector = RegimeDetector::new(RegimeConfig::default());
        let w = flat_window(100.0, 60);
        // close 100 sits between the EMAs, ADX dead
        let snap = snapshot(101.0, 99.0, 10.0, 1.0);
        let result = detector.detect(&w, &snap);
        assert_eq!(result.regime, Regime::ChopRange);
        assert!(!result.allows_market_entry());
    }

    #[test]
    fn test_mixed_readings_are_neutral() {
        let detector = RegimeDetector::new(RegimeConfig::default());
        let w = flat_window(100.0, 60);
        // neutral alignment but strong ADX: no clean trend call
        let snap = snapshot(101.0, 99.0, 35.0, 1.0);
        let result = detector.detect(&w, &snap);
        assert_eq!(result.regime, Regime::Neutral);
        assert!(!result.allows_market_entry());
    }

    #[test]
    fn test_missing_indicators_degrade_gracefully() {
        let detector = RegimeDetector::new(RegimeConfig::default());
        let w = flat_window(100.0, 60);
        let result = detector.detect(&w, &IndicatorSnapshot::default());
        // no EMAs, no ADX: neutral alignment + no strength = chop
        assert_eq!(result.regime, Regime::ChopRange);
        assert!(result.degraded.is_none());
    }
}
