use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decision::FinalDecision;
use crate::failure::Failure;
use crate::phase::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Started,
    InProgress,
    Completed,
    Failed,
}

/// Progress notification published to observers.
///
/// Sequence numbers are strictly increasing per bus. Events from concurrently
/// running stages interleave arbitrarily; events from one stage keep their order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunEvent {
    pub run_id: Uuid,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: RunEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum RunEventKind {
    Stage {
        phase: Phase,
        stage_id: String,
        status: StageStatus,
        detail: Option<String>,
    },
    PhaseCommitted {
        phase: Phase,
    },
    RunCompleted {
        final_decision: FinalDecision,
    },
    RunAborted {
        failure: Failure,
    },
}

impl RunEvent {
    /// Whether this event ends the run's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            RunEventKind::RunCompleted { .. } | RunEventKind::RunAborted { .. }
        )
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match &self.kind {
            RunEventKind::Stage { .. } => "stage",
            RunEventKind::PhaseCommitted { .. } => "phase_committed",
            RunEventKind::RunCompleted { .. } => "run_completed",
            RunEventKind::RunAborted { .. } => "run_aborted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::FailureKind;

    #[test]
    fn stage_event_json_shape() {
        let event = RunEvent {
            run_id: Uuid::nil(),
            sequence: 4,
            timestamp: Utc::now(),
            kind: RunEventKind::Stage {
                phase: Phase::Analyst,
                stage_id: "market_analyst".to_string(),
                status: StageStatus::InProgress,
                detail: None,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "stage");
        assert_eq!(json["status"], "in_progress");
        assert_eq!(json["sequence"], 4);

        let back: RunEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn aborted_event_is_terminal() {
        let event = RunEvent {
            run_id: Uuid::nil(),
            sequence: 9,
            timestamp: Utc::now(),
            kind: RunEventKind::RunAborted {
                failure: Failure::new(Phase::Risk, "risk_neutral", FailureKind::Timeout, "late"),
            },
        };
        assert!(event.is_terminal());
        assert_eq!(event.label(), "run_aborted");
    }
}
