pub mod cache_schema;
pub mod config;
pub mod decision;
pub mod events;
pub mod failure;
pub mod kinds;
pub mod phase;
pub mod state;

pub use cache_schema::CacheRow;
pub use config::{
    CacheConfig, ConfigError, DeskConfig, LlmConfig, OrchestrationConfig, ResearchDepth,
    RetryConfig,
};
pub use decision::{FinalDecision, TradeAction, TradingParams};
pub use events::{RunEvent, RunEventKind, StageStatus};
pub use failure::{CollaboratorErrorKind, Failure, FailureKind};
pub use kinds::{AnalystKind, DebateSide, ModelTier, RiskKind, StageKind};
pub use phase::{Phase, StateField};
pub use state::{DebateEntry, RiskEntry, RunMetadata, SharedState, StateError, StateUpdate};
