//! Progress event bus.
//!
//! Events go out over a Tokio broadcast channel. Publishing never blocks and
//! never fails: with no subscribers the event is dropped, and a subscriber that
//! falls more than [`CHANNEL_CAPACITY`] events behind sees `Lagged` on its
//! receiver. Observers cannot slow a run down.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use cryptodesk_models::{Phase, RunEvent, RunEventKind, StageStatus};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

pub const CHANNEL_CAPACITY: usize = 256;

pub type SharedEventBus = Arc<EventBus>;

pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
    /// Last assigned sequence number. Held across the send so subscribers
    /// observe sequence numbers in increasing order.
    sequence: Mutex<u64>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            sequence: Mutex::new(0),
        }
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Stamp and broadcast an event. Returns its sequence number.
    pub fn publish(&self, run_id: Uuid, kind: RunEventKind) -> u64 {
        let mut sequence = self.sequence.lock().unwrap_or_else(PoisonError::into_inner);
        *sequence += 1;
        let event = RunEvent {
            run_id,
            sequence: *sequence,
            timestamp: Utc::now(),
            kind,
        };
        let label = event.label();
        match self.sender.send(event) {
            Ok(receivers) => trace!(label, sequence = *sequence, receivers, "Event published"),
            Err(_) => trace!(label, sequence = *sequence, "Event published (no receivers)"),
        }
        *sequence
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Sequence number of the most recently published event (0 if none).
    #[cfg(test)]
    pub fn last_sequence(&self) -> u64 {
        *self.sequence.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emitter bound to one stage of one run.
    pub fn emitter(
        self: &Arc<Self>,
        run_id: Uuid,
        phase: Phase,
        stage_id: impl Into<String>,
    ) -> StageEmitter {
        StageEmitter {
            bus: Arc::clone(self),
            run_id,
            phase,
            stage_id: stage_id.into(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Publishes stage-scoped events on behalf of a single stage.
#[derive(Clone)]
pub struct StageEmitter {
    bus: SharedEventBus,
    run_id: Uuid,
    phase: Phase,
    stage_id: String,
}

impl StageEmitter {
    pub fn stage_id(&self) -> &str {
        &self.stage_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn emit(&self, status: StageStatus, detail: Option<String>) -> u64 {
        self.bus.publish(
            self.run_id,
            RunEventKind::Stage {
                phase: self.phase,
                stage_id: self.stage_id.clone(),
                status,
                detail,
            },
        )
    }

    /// Intermediate progress from inside a running stage.
    pub fn progress(&self, detail: impl Into<String>) -> u64 {
        self.emit(StageStatus::InProgress, Some(detail.into()))
    }
}
