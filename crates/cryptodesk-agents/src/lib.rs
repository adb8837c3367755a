pub mod cached_data;
pub mod claude_cli;
pub mod collaborator;
pub mod coordinator;
pub mod debate;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod retry;
pub mod risk;
pub mod router;
pub mod stage;

pub mod test_support;

pub use cached_data::CacheDataCollaborator;
pub use claude_cli::ClaudeCliReasoner;
pub use collaborator::{DataCollaborator, NoData, PromptContext, ReasoningCollaborator};
pub use coordinator::{FanOut, RunContext};
pub use debate::{DebateLoop, DebateTurn};
pub use error::{AgentError, CollaboratorError};
pub use events::{EventBus, SharedEventBus, StageEmitter};
pub use orchestrator::{BatchEntry, Orchestrator, OrchestratorBuilder, RunOutcome};
pub use retry::RetryPolicy;
pub use risk::RiskDeliberation;
pub use router::PhaseRouter;
pub use stage::{LlmStage, Stage, StageContext};
