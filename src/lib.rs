// Library crate - deterministic market-structure and trade-decision pipeline

pub mod candles;
pub mod config;
pub mod context;
pub mod exits;
pub mod indicators;
pub mod leverage;
pub mod levels;
pub mod pipeline;
pub mod regime;
pub mod scoring;
pub mod triggers;
pub mod types;

// Re-export commonly used types
pub use candles::{Candle, CandleWindow};
pub use config::PipelineConfig;
pub use context::{context_id, ContextConfig, MarketContext, MarketContextBuilder};
pub use exits::{
    DistanceMethod, ExitConfig, ExitEngine, ExitLevels, ExitSignal, ExitType, PositionState,
};
pub use indicators::IndicatorSnapshot;
pub use leverage::{AssetTier, LeverageAction, LeverageConfig, LeverageEngine, LeverageResult};
pub use levels::{
    Level, LevelConfig, LevelEngine, LevelKind, LevelStrength, LevelsResult, PivotVariant,
};
pub use pipeline::{DecisionPipeline, DecisionRecord};
pub use regime::{Regime, RegimeConfig, RegimeDetector, RegimeResult};
pub use scoring::{
    EntryScoreConfig, EntryScoreEngine, EntryScoreResult, RuleCondition, RuleSet, ScoreQuality,
    ScoreRule,
};
pub use triggers::{TriggerConfig, TriggerEngine, TriggerResult, TriggerStatus, TriggerType};
pub use types::{DegradedReason, Direction};
