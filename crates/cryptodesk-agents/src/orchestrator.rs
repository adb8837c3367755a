use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use cryptodesk_models::{
    ConfigError, Failure, FailureKind, FinalDecision, OrchestrationConfig, Phase, RunEvent,
    RunEventKind, RunMetadata, SharedState, StageKind,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::collaborator::{DataCollaborator, NoData, ReasoningCollaborator};
use crate::coordinator::{FanOut, RunContext};
use crate::debate::DebateLoop;
use crate::events::{EventBus, SharedEventBus};
use crate::retry::RetryPolicy;
use crate::risk::RiskDeliberation;
use crate::router::PhaseRouter;
use crate::stage::{LlmStage, Stage};

/// How a run ended. Exactly one of a final decision or a failure is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunOutcome {
    Done { state: SharedState },
    /// `state` is the last committed state; writes of the failed phase are discarded.
    Aborted { failure: Failure, state: SharedState },
}

impl RunOutcome {
    pub fn state(&self) -> &SharedState {
        match self {
            Self::Done { state } | Self::Aborted { state, .. } => state,
        }
    }

    pub fn final_decision(&self) -> Option<&FinalDecision> {
        match self {
            Self::Done { state } => state.final_decision(),
            Self::Aborted { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Done { .. } => None,
            Self::Aborted { failure, .. } => Some(failure),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// One subject of a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
    /// Set when the subject was rejected or never started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchEntry {
    pub fn succeeded(&self) -> bool {
        self.outcome.as_ref().is_some_and(RunOutcome::is_done)
    }
}

/// Drives the five phases in order and owns the state between them.
pub struct Orchestrator {
    router: PhaseRouter,
    config: OrchestrationConfig,
    bus: SharedEventBus,
}

impl Orchestrator {
    pub fn builder(config: OrchestrationConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.bus.subscribe()
    }

    pub fn event_bus(&self) -> SharedEventBus {
        Arc::clone(&self.bus)
    }

    /// Initial state for a run. Rejects empty or unsupported subjects.
    pub fn prepare(&self, subject: &str, as_of: NaiveDate) -> Result<SharedState, ConfigError> {
        let symbol = self.config.validate_subject(subject)?;
        let meta = RunMetadata::new(
            self.config.enabled_analysts.clone(),
            self.config.enabled_risk_perspectives.clone(),
            self.config.max_debate_rounds,
            self.config.max_risk_rounds,
        );
        Ok(SharedState::new(symbol, as_of, meta))
    }

    pub async fn run(&self, subject: &str, as_of: NaiveDate) -> Result<RunOutcome, ConfigError> {
        self.run_with_cancel(subject, as_of, CancellationToken::new())
            .await
    }

    pub async fn run_with_cancel(
        &self,
        subject: &str,
        as_of: NaiveDate,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, ConfigError> {
        let state = self.prepare(subject, as_of)?;
        Ok(self.execute(state, cancel).await)
    }

    /// Run all phases from a prepared state.
    pub async fn execute(&self, mut state: SharedState, cancel: CancellationToken) -> RunOutcome {
        let run_id = state.run_metadata().run_id;
        let start = Instant::now();
        info!(%run_id, subject = state.subject(), as_of = %state.as_of(), "Starting run");

        for phase in Phase::ALL {
            if cancel.is_cancelled() {
                let failure = Failure::new(
                    phase,
                    "orchestrator",
                    FailureKind::Cancelled,
                    "run cancelled before the phase started",
                );
                return self.abort(state, failure);
            }

            let deadline = self
                .config
                .phase_timeout()
                .map(|timeout| tokio::time::Instant::now() + timeout);
            let ctx = RunContext::new(Arc::clone(&self.bus), run_id, cancel.clone())
                .with_deadline(deadline);

            let phase_start = Instant::now();
            match self.router.run_phase(phase, &state, &ctx).await {
                Ok(mut next) => {
                    let sequence = self
                        .bus
                        .publish(run_id, RunEventKind::PhaseCommitted { phase });
                    next.mark_committed(phase, sequence);
                    state = next;
                    info!(
                        %run_id,
                        %phase,
                        elapsed_ms = phase_start.elapsed().as_millis() as u64,
                        "Phase committed"
                    );
                }
                Err(failure) => return self.abort(state, failure),
            }
        }

        let Some(final_decision) = state.final_decision().cloned() else {
            let failure = Failure::new(
                Phase::Portfolio,
                StageKind::PortfolioManager.id(),
                FailureKind::ContractViolation,
                "portfolio phase committed without a final decision",
            );
            return self.abort(state, failure);
        };

        info!(
            %run_id,
            subject = state.subject(),
            action = %final_decision.action,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Run complete"
        );
        self.bus
            .publish(run_id, RunEventKind::RunCompleted { final_decision });
        RunOutcome::Done { state }
    }

    fn abort(&self, state: SharedState, failure: Failure) -> RunOutcome {
        let run_id = state.run_metadata().run_id;
        warn!(%run_id, subject = state.subject(), %failure, "Run aborted");
        self.bus.publish(
            run_id,
            RunEventKind::RunAborted {
                failure: failure.clone(),
            },
        );
        RunOutcome::Aborted { failure, state }
    }

    /// Run subjects one after another. A failing subject does not stop the
    /// batch; cancellation does.
    pub async fn run_batch(
        &self,
        subjects: &[String],
        as_of: NaiveDate,
        cancel: &CancellationToken,
    ) -> Vec<BatchEntry> {
        let mut entries = Vec::with_capacity(subjects.len());
        for subject in subjects {
            if cancel.is_cancelled() {
                entries.push(BatchEntry {
                    subject: subject.clone(),
                    outcome: None,
                    error: Some("batch cancelled before this subject started".to_string()),
                });
                continue;
            }

            let entry = match self.run_with_cancel(subject, as_of, cancel.child_token()).await {
                Ok(outcome) => BatchEntry {
                    subject: outcome.state().subject().to_string(),
                    outcome: Some(outcome),
                    error: None,
                },
                Err(e) => {
                    warn!(subject, error = %e, "Subject rejected");
                    BatchEntry {
                        subject: subject.clone(),
                        outcome: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            entries.push(entry);
        }
        entries
    }
}

/// Assembles the stage graph from configuration and collaborators.
pub struct OrchestratorBuilder {
    config: OrchestrationConfig,
    reasoner: Option<Arc<dyn ReasoningCollaborator>>,
    data: Arc<dyn DataCollaborator>,
    retry: RetryPolicy,
    overrides: HashMap<StageKind, Arc<dyn Stage>>,
    bus: Option<SharedEventBus>,
}

impl OrchestratorBuilder {
    pub fn new(config: OrchestrationConfig) -> Self {
        Self {
            config,
            reasoner: None,
            data: Arc::new(NoData),
            retry: RetryPolicy::default(),
            overrides: HashMap::new(),
            bus: None,
        }
    }

    pub fn reasoner(mut self, reasoner: Arc<dyn ReasoningCollaborator>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    pub fn data(mut self, data: Arc<dyn DataCollaborator>) -> Self {
        self.data = data;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the built-in stage for `kind`.
    pub fn stage(mut self, kind: StageKind, stage: Arc<dyn Stage>) -> Self {
        self.overrides.insert(kind, stage);
        self
    }

    pub fn event_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    fn stage_for(&self, kind: StageKind) -> Result<Arc<dyn Stage>, ConfigError> {
        if let Some(stage) = self.overrides.get(&kind) {
            return Ok(Arc::clone(stage));
        }
        let reasoner = self.reasoner.clone().ok_or_else(|| {
            ConfigError::Invalid(format!("no reasoning collaborator for stage {}", kind.id()))
        })?;
        Ok(Arc::new(LlmStage::new(
            kind,
            reasoner,
            Arc::clone(&self.data),
            self.retry.clone(),
        )))
    }

    /// Validate the configuration and wire every phase. Nothing runs on error.
    pub fn build(self) -> Result<Orchestrator, ConfigError> {
        self.config.validate()?;

        let analysts = self
            .config
            .enabled_analysts
            .iter()
            .map(|kind| self.stage_for(StageKind::Analyst(*kind)))
            .collect::<Result<Vec<_>, _>>()?;
        let analysts = FanOut::new(Phase::Analyst, analysts)?;

        let debate = DebateLoop::new(
            self.stage_for(StageKind::Advocate)?,
            self.stage_for(StageKind::Skeptic)?,
            self.stage_for(StageKind::ResearchManager)?,
            self.config.max_debate_rounds,
        )?;

        let trader = FanOut::single(Phase::Trading, self.stage_for(StageKind::Trader)?)?;

        let perspectives = self
            .config
            .enabled_risk_perspectives
            .iter()
            .map(|kind| self.stage_for(StageKind::RiskDebator(*kind)))
            .collect::<Result<Vec<_>, _>>()?;
        let risk = RiskDeliberation::new(
            perspectives,
            self.stage_for(StageKind::RiskManager)?,
            self.config.max_risk_rounds,
        )?;

        let portfolio = FanOut::single(
            Phase::Portfolio,
            self.stage_for(StageKind::PortfolioManager)?,
        )?;

        let router = PhaseRouter::new(analysts, debate, trader, risk, portfolio);
        info!(
            analysts = ?router.analyst_ids(),
            risk_perspectives = ?self.config.enabled_risk_perspectives,
            max_debate_rounds = self.config.max_debate_rounds,
            max_risk_rounds = self.config.max_risk_rounds,
            "Orchestrator ready"
        );

        Ok(Orchestrator {
            router,
            config: self.config,
            bus: self.bus.unwrap_or_else(|| EventBus::new().shared()),
        })
    }
}
