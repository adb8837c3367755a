//! Fan-out/fan-in over a set of stages within one phase.
//!
//! Every stage sees the same immutable snapshot. Outputs are merged into a
//! copy of the input state in submission order, so the merged result does not
//! depend on completion order. Any failure discards all outputs of the phase.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cryptodesk_models::{
    ConfigError, Failure, FailureKind, Phase, SharedState, StageStatus, StateField,
};
use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AgentError;
use crate::events::SharedEventBus;
use crate::stage::{Stage, StageContext};

/// Per-run plumbing handed to every coordinator call.
#[derive(Clone)]
pub struct RunContext {
    pub bus: SharedEventBus,
    pub run_id: Uuid,
    /// Cancelled when the whole run should stop.
    pub cancel: CancellationToken,
    /// Deadline for the phase currently executing.
    pub deadline: Option<Instant>,
}

impl RunContext {
    pub fn new(bus: SharedEventBus, run_id: Uuid, cancel: CancellationToken) -> Self {
        Self {
            bus,
            run_id,
            cancel,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

pub struct FanOut {
    phase: Phase,
    stages: Vec<Arc<dyn Stage>>,
}

impl std::fmt::Debug for FanOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOut")
            .field("phase", &self.phase)
            .field("stages", &self.stage_ids())
            .finish()
    }
}

impl FanOut {
    /// Validate a stage set for `phase`: unique ids, every owned field
    /// belongs to the phase, and no two stages own the same field.
    pub fn new(phase: Phase, stages: Vec<Arc<dyn Stage>>) -> Result<Self, ConfigError> {
        let mut ids = HashSet::new();
        let mut owners: HashMap<StateField, &str> = HashMap::new();

        for stage in &stages {
            let id = stage.id();
            if !ids.insert(id) {
                return Err(ConfigError::DuplicateStage(id.to_string()));
            }

            let field = stage.owns();
            if field.owner() != phase {
                return Err(ConfigError::Invalid(format!(
                    "stage {id} writes {field}, which the {phase} phase does not own"
                )));
            }
            if let Some(first) = owners.get(&field) {
                return Err(ConfigError::OverlappingOwnership {
                    first: first.to_string(),
                    second: id.to_string(),
                    field,
                });
            }
            owners.insert(field, id);
        }

        Ok(Self { phase, stages })
    }

    pub fn single(phase: Phase, stage: Arc<dyn Stage>) -> Result<Self, ConfigError> {
        Self::new(phase, vec![stage])
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stage_ids(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.id()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage concurrently against `state` and merge their outputs.
    ///
    /// Returns the merged state, or the failure of the earliest-submitted
    /// failing stage. All stages run to completion (or cancellation) before
    /// this returns; a failure never abandons siblings mid-flight.
    pub async fn run(
        &self,
        state: &SharedState,
        ctx: &RunContext,
        round: Option<u8>,
    ) -> Result<SharedState, Failure> {
        if self.stages.is_empty() {
            return Ok(state.clone());
        }

        let snapshot = Arc::new(state.clone());
        let token = ctx.cancel.child_token();
        let phase = self.phase;

        let mut handles = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let stage = Arc::clone(stage);
            let snapshot = Arc::clone(&snapshot);
            let emitter = ctx.bus.emitter(ctx.run_id, phase, stage.id());
            let token = token.clone();

            handles.push(tokio::spawn(async move {
                emitter.emit(StageStatus::Started, None);
                let started = Instant::now();

                let stage_ctx = StageContext {
                    state: &snapshot,
                    emitter: &emitter,
                    cancel: &token,
                    round,
                };
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(AgentError::Cancelled),
                    result = stage.run(stage_ctx) => result,
                };

                let elapsed_ms = started.elapsed().as_millis() as u64;
                match &result {
                    Ok(_) => {
                        debug!(stage = stage.id(), elapsed_ms, "Stage completed");
                        emitter.emit(StageStatus::Completed, None);
                    }
                    Err(e) => {
                        warn!(stage = stage.id(), error = %e, elapsed_ms, "Stage failed");
                        emitter.emit(StageStatus::Failed, Some(e.to_string()));
                    }
                }
                result
            }));
        }

        let mut joined = std::pin::pin!(join_all(handles));
        let mut timed_out = false;
        let results = match ctx.deadline {
            None => joined.await,
            Some(deadline) => tokio::select! {
                results = &mut joined => results,
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(%phase, "Phase deadline expired, cancelling in-flight stages");
                    timed_out = true;
                    token.cancel();
                    joined.await
                }
            },
        };

        let mut outputs = Vec::with_capacity(results.len());
        let mut first_failure = None;
        for (stage, joined) in self.stages.iter().zip(results) {
            let failure = match joined {
                Ok(Ok(updates)) => {
                    outputs.push((stage, updates));
                    continue;
                }
                Ok(Err(AgentError::Cancelled)) if timed_out => Failure::new(
                    phase,
                    stage.id(),
                    FailureKind::Timeout,
                    "phase deadline expired",
                ),
                Ok(Err(e)) => e.into_failure(phase, stage.id()),
                Err(e) => Failure::new(phase, stage.id(), FailureKind::Panicked, e.to_string()),
            };
            first_failure.get_or_insert(failure);
        }

        if let Some(failure) = first_failure {
            return Err(failure);
        }

        if ctx.cancel.is_cancelled() {
            let first = self.stages[0].id();
            return Err(Failure::new(
                phase,
                first,
                FailureKind::Cancelled,
                "run cancelled before the phase could commit",
            ));
        }

        let mut merged = state.clone();
        for (stage, updates) in outputs {
            let owned = stage.owns();
            for update in updates {
                if update.field() != owned {
                    return Err(Failure::new(
                        phase,
                        stage.id(),
                        FailureKind::ContractViolation,
                        format!("stage owns {owned} but wrote {}", update.field()),
                    ));
                }
                merged
                    .apply(phase, update)
                    .map_err(|e| AgentError::from(e).into_failure(phase, stage.id()))?;
            }
        }

        Ok(merged)
    }
}
