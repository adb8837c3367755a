use cryptodesk_models::{CollaboratorErrorKind, Failure, FailureKind, Phase, StateError};
use thiserror::Error;

/// Error reported by a reasoning or data collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct CollaboratorError {
    pub kind: CollaboratorErrorKind,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(kind: CollaboratorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CollaboratorErrorKind::NotFound, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: CollaboratorError,
    },

    #[error("collaborator error: {0}")]
    Collaborator(CollaboratorError),

    #[error("response parse error: {0}")]
    Parse(String),

    #[error("contract violation: {0}")]
    Contract(String),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::RetriesExhausted { last, .. } => FailureKind::RetriesExhausted(last.kind),
            Self::Collaborator(e) => FailureKind::RetriesExhausted(e.kind),
            Self::Parse(_) | Self::Json(_) => FailureKind::InvalidOutput,
            Self::Contract(_) | Self::State(_) => FailureKind::ContractViolation,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    /// Attribute this error to a stage.
    pub fn into_failure(self, phase: Phase, stage_id: &str) -> Failure {
        Failure::new(phase, stage_id, self.failure_kind(), self.to_string())
    }
}
