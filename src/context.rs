//! Market context assembly.
//!
//! One `MarketContext` is built per evaluation cycle: regime + levels +
//! indicator snapshot + price, frozen behind an `Arc`. The context is
//! identified by a content hash of symbol/timeframe/window so identical
//! inputs always produce the identical id, and an optional bounded cache
//! short-circuits rebuilds within a TTL.

use crate::candles::CandleWindow;
use crate::indicators::IndicatorSnapshot;
use crate::levels::{LevelEngine, LevelsResult};
use crate::regime::{RegimeDetector, RegimeResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Immutable snapshot of everything the decision engines read for one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    /// Content hash of symbol + timeframe + window
    pub context_id: String,
    pub symbol: String,
    pub timeframe: String,
    pub current_price: f64,
    pub regime: RegimeResult,
    pub levels: LevelsResult,
    pub indicators: IndicatorSnapshot,
    /// Previous-bar snapshot for cross/slope style rules; `None` when the
    /// window held a single candle
    pub indicators_prev: Option<IndicatorSnapshot>,
    pub generated_at: DateTime<Utc>,
}

/// Configuration for context building and caching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Serve a cached context for identical input within this many seconds
    /// (default: 30). Zero disables caching.
    pub cache_ttl_secs: i64,
    /// Hard cap on cached entries (default: 64)
    pub cache_max_entries: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30,
            cache_max_entries: 64,
        }
    }
}

/// Builds `MarketContext` snapshots from a window, orchestrating the regime
/// detector and level engine. Owns the bounded context cache.
pub struct MarketContextBuilder {
    regime: RegimeDetector,
    levels: LevelEngine,
    config: ContextConfig,
    cache: Mutex<HashMap<String, (DateTime<Utc>, Arc<MarketContext>)>>,
}

impl MarketContextBuilder {
    pub fn new(regime: RegimeDetector, levels: LevelEngine, config: ContextConfig) -> Self {
        Self {
            regime,
            levels,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Build (or serve from cache) the context for this window.
    ///
    /// `precomputed` carries externally supplied indicator values that
    /// override the window-derived ones.
    pub fn build(
        &self,
        window: &CandleWindow,
        symbol: &str,
        timeframe: &str,
        precomputed: Option<&IndicatorSnapshot>,
    ) -> Arc<MarketContext> {
        let context_id = context_id(window, symbol, timeframe);

        if let Some(cached) = self.cached(&context_id) {
            debug!(%context_id, "context cache hit");
            return cached;
        }

        let mut indicators = IndicatorSnapshot::compute(window);
        if let Some(overrides) = precomputed {
            indicators = indicators.overlay(overrides);
        }
        // externally supplied values describe the latest bar only; the
        // previous-bar snapshot is always window-derived
        let indicators_prev = window
            .without_last()
            .map(|prev| IndicatorSnapshot::compute(&prev));

        let current_price = window.current_price();
        let regime = self.regime.detect(window, &indicators);
        let levels = self
            .levels
            .detect_levels(window, symbol, timeframe, Some(current_price));

        let context = Arc::new(MarketContext {
            context_id: context_id.clone(),
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            current_price,
            regime,
            levels,
            indicators,
            indicators_prev,
            generated_at: Utc::now(),
        });

        self.store(context_id, context.clone());
        context
    }

    fn cached(&self, context_id: &str) -> Option<Arc<MarketContext>> {
        if self.config.cache_ttl_secs <= 0 {
            return None;
        }
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let (stored_at, context) = cache.get(context_id)?;
        let age = Utc::now() - *stored_at;
        if age > Duration::seconds(self.config.cache_ttl_secs) {
            return None;
        }
        Some(context.clone())
    }

    fn store(&self, context_id: String, context: Arc<MarketContext>) {
        if self.config.cache_ttl_secs <= 0 {
            return;
        }
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let ttl = Duration::seconds(self.config.cache_ttl_secs);
        cache.retain(|_, (stored_at, _)| now - *stored_at <= ttl);
        // stale sweep above usually makes room; drop everything if not
        if cache.len() >= self.config.cache_max_entries {
            cache.clear();
        }
        cache.insert(context_id, (now, context));
    }
}

/// Deterministic content hash identifying a (symbol, timeframe, window) input
pub fn context_id(window: &CandleWindow, symbol: &str, timeframe: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(symbol.as_bytes());
    hasher.update(timeframe.as_bytes());
    for c in window.candles() {
        hasher.update(&c.timestamp.timestamp_millis().to_le_bytes());
        hasher.update(&c.close.to_le_bytes());
        hasher.update(&c.high.to_le_bytes());
        hasher.update(&c.low.to_le_bytes());
    }
    hasher.finalize().to_hex()[..16].to_string()
}
