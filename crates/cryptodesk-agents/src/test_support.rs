//! Scripted collaborators and configurable stages for exercising the
//! orchestration without a model or a cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use cryptodesk_models::{
    AnalystKind, CollaboratorErrorKind, RiskKind, RunMetadata, SharedState, StateField,
    StateUpdate,
};
use uuid::Uuid;

use crate::collaborator::{DataCollaborator, PromptContext, ReasoningCollaborator};
use crate::error::{AgentError, CollaboratorError};
use crate::stage::{Stage, StageContext};

pub const DEFAULT_VERDICT: &str = "Momentum and risk are balanced in favour of entry.\nFINAL DECISION: BUY";

pub fn test_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 12, 1).unwrap_or(NaiveDate::MIN)
}

/// BTC on 2024-12-01 with every analyst and risk perspective enabled.
pub fn test_state() -> SharedState {
    let meta = RunMetadata::new(AnalystKind::ALL.to_vec(), RiskKind::ALL.to_vec(), 1, 1);
    SharedState::new("BTC", test_date(), meta)
}

/// Random delay in `[0, max)`, drawn from a v4 UUID.
pub fn jitter(max: Duration) -> Duration {
    let micros = max.as_micros().max(1);
    Duration::from_micros((Uuid::new_v4().as_u128() % micros) as u64)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reasoning collaborator that answers from a script keyed by stage id.
///
/// Unscripted stages answer `"{stage_id} #{n}"` where `n` counts that stage's
/// calls; the portfolio manager answers [`DEFAULT_VERDICT`].
#[derive(Default)]
pub struct ScriptedReasoner {
    responses: Mutex<HashMap<String, String>>,
    failures: Mutex<HashMap<String, (u32, CollaboratorErrorKind)>>,
    calls: Mutex<Vec<PromptContext>>,
    max_delay: Option<Duration>,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep a random amount below `max` before every answer.
    pub fn with_jitter(mut self, max: Duration) -> Self {
        self.max_delay = Some(max);
        self
    }

    pub fn respond(&self, stage_id: &str, response: &str) {
        lock(&self.responses).insert(stage_id.to_string(), response.to_string());
    }

    /// Fail the next `times` calls for `stage_id`.
    pub fn fail_times(&self, stage_id: &str, times: u32, kind: CollaboratorErrorKind) {
        lock(&self.failures).insert(stage_id.to_string(), (times, kind));
    }

    pub fn fail_always(&self, stage_id: &str, kind: CollaboratorErrorKind) {
        self.fail_times(stage_id, u32::MAX, kind);
    }

    /// Every prompt received so far, in arrival order.
    pub fn calls(&self) -> Vec<PromptContext> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ReasoningCollaborator for ScriptedReasoner {
    async fn invoke(&self, prompt: &PromptContext) -> Result<String, CollaboratorError> {
        if let Some(max) = self.max_delay {
            tokio::time::sleep(jitter(max)).await;
        }

        let call_number = {
            let mut calls = lock(&self.calls);
            calls.push(prompt.clone());
            calls.iter().filter(|c| c.stage_id == prompt.stage_id).count()
        };

        {
            let mut failures = lock(&self.failures);
            if let Some((remaining, kind)) = failures.get_mut(&prompt.stage_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(CollaboratorError::new(
                        *kind,
                        format!("scripted failure for {}", prompt.stage_id),
                    ));
                }
            }
        }

        if let Some(response) = lock(&self.responses).get(&prompt.stage_id) {
            return Ok(response.clone());
        }
        if prompt.stage_id == "portfolio_manager" {
            return Ok(DEFAULT_VERDICT.to_string());
        }
        Ok(format!("{} #{call_number}", prompt.stage_id))
    }
}

/// Data collaborator serving fixed values per metric.
#[derive(Default)]
pub struct StaticData {
    values: HashMap<String, serde_json::Value>,
    failing: HashMap<String, CollaboratorErrorKind>,
}

impl StaticData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, metric: &str, value: serde_json::Value) -> Self {
        self.values.insert(metric.to_string(), value);
        self
    }

    /// Every fetch of `metric` fails with `kind`.
    pub fn failing(mut self, metric: &str, kind: CollaboratorErrorKind) -> Self {
        self.failing.insert(metric.to_string(), kind);
        self
    }
}

#[async_trait]
impl DataCollaborator for StaticData {
    async fn fetch(
        &self,
        subject: &str,
        _as_of: NaiveDate,
        metric: &str,
    ) -> Result<serde_json::Value, CollaboratorError> {
        if let Some(kind) = self.failing.get(metric) {
            return Err(CollaboratorError::new(*kind, format!("{metric} unavailable")));
        }
        self.values
            .get(metric)
            .cloned()
            .ok_or_else(|| CollaboratorError::not_found(format!("{metric}:{subject}")))
    }
}

enum Behavior {
    Succeed,
    Fail(CollaboratorErrorKind),
    Hang,
}

/// A stage with a fixed output, an optional delay and scripted failure modes.
pub struct TestStage {
    id: String,
    owns: StateField,
    output: Vec<StateUpdate>,
    delay: Duration,
    jitter: Option<Duration>,
    behavior: Behavior,
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl TestStage {
    pub fn new(id: &str, owns: StateField, output: Vec<StateUpdate>) -> Self {
        Self {
            id: id.to_string(),
            owns,
            output,
            delay: Duration::ZERO,
            jitter: None,
            behavior: Behavior::Succeed,
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    /// Writes `"{kind} report"` for its analyst kind.
    pub fn analyst(kind: AnalystKind) -> Self {
        Self::new(
            &format!("{kind}_analyst"),
            StateField::AnalystReport(kind),
            vec![StateUpdate::AnalystReport {
                kind,
                report: format!("{kind} report"),
            }],
        )
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_output(mut self, output: Vec<StateUpdate>) -> Self {
        self.output = output;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Add a random extra delay below `max` on every run.
    pub fn with_jitter(mut self, max: Duration) -> Self {
        self.jitter = Some(max);
        self
    }

    pub fn failing(mut self, kind: CollaboratorErrorKind) -> Self {
        self.behavior = Behavior::Fail(kind);
        self
    }

    /// Never finishes on its own; only cancellation ends it.
    pub fn hanging(mut self) -> Self {
        self.behavior = Behavior::Hang;
        self
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Runs that reached their end, successfully or not.
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for TestStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn owns(&self) -> StateField {
        self.owns
    }

    async fn run(&self, _ctx: StageContext<'_>) -> Result<Vec<StateUpdate>, AgentError> {
        self.started.fetch_add(1, Ordering::SeqCst);

        let mut delay = self.delay;
        if let Some(max) = self.jitter {
            delay += jitter(max);
        }
        if let Behavior::Hang = self.behavior {
            delay = Duration::from_secs(3600);
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = match self.behavior {
            Behavior::Fail(kind) => Err(AgentError::RetriesExhausted {
                attempts: 1,
                last: CollaboratorError::new(kind, format!("{} failed", self.id)),
            }),
            Behavior::Succeed | Behavior::Hang => Ok(self.output.clone()),
        };
        self.finished.fetch_add(1, Ordering::SeqCst);
        result
    }
}
