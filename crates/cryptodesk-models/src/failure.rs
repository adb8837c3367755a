use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::phase::Phase;

/// Error classes an external collaborator can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorErrorKind {
    RateLimited,
    InvalidResponse,
    Unavailable,
    NotFound,
    Timeout,
}

impl CollaboratorErrorKind {
    /// `NotFound` is an answer, not a transient condition.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::NotFound)
    }
}

impl fmt::Display for CollaboratorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate_limited"),
            Self::InvalidResponse => write!(f, "invalid_response"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::NotFound => write!(f, "not_found"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Why a stage (and therefore the run) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "collaborator_error")]
pub enum FailureKind {
    /// A collaborator kept failing until the retry policy gave up.
    RetriesExhausted(CollaboratorErrorKind),
    /// The collaborator answered, but the answer could not be used.
    InvalidOutput,
    /// The stage received state missing an upstream field, or produced a write
    /// the state rejected. Indicates a routing bug; never retried.
    ContractViolation,
    /// The phase deadline expired while the stage was still running.
    Timeout,
    /// The run was cancelled while the stage was still running.
    Cancelled,
    /// The stage task panicked.
    Panicked,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriesExhausted(kind) => write!(f, "retries exhausted ({kind})"),
            Self::InvalidOutput => write!(f, "invalid output"),
            Self::ContractViolation => write!(f, "contract violation"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Panicked => write!(f, "panicked"),
        }
    }
}

/// A terminal failure attributable to one phase and one stage.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{phase} phase, stage {stage_id}: {kind}: {message}")]
pub struct Failure {
    pub phase: Phase,
    pub stage_id: String,
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(
        phase: Phase,
        stage_id: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            phase,
            stage_id: stage_id.into(),
            kind,
            message: message.into(),
        }
    }
}
