use std::sync::Arc;

use cryptodesk_models::config::check_rounds;
use cryptodesk_models::{ConfigError, Failure, Phase, SharedState, StateField};
use tracing::debug;

use crate::coordinator::{FanOut, RunContext};
use crate::stage::Stage;

/// Position in the research debate state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebateTurn {
    Advocate { round: u8 },
    Skeptic { round: u8 },
    Synthesis,
    Finished,
}

impl DebateTurn {
    pub fn first() -> Self {
        Self::Advocate { round: 1 }
    }

    pub fn next(self, max_rounds: u8) -> Self {
        match self {
            Self::Advocate { round } => Self::Skeptic { round },
            Self::Skeptic { round } if round < max_rounds => Self::Advocate { round: round + 1 },
            Self::Skeptic { .. } => Self::Synthesis,
            Self::Synthesis | Self::Finished => Self::Finished,
        }
    }
}

/// Alternating advocate/skeptic debate followed by one synthesis turn.
///
/// Each turn runs through its own single-stage fan-out and commits before the
/// next one starts, so every debater sees the full history so far.
pub struct DebateLoop {
    advocate: FanOut,
    skeptic: FanOut,
    synthesis: FanOut,
    max_rounds: u8,
}

impl DebateLoop {
    pub fn new(
        advocate: Arc<dyn Stage>,
        skeptic: Arc<dyn Stage>,
        synthesis: Arc<dyn Stage>,
        max_rounds: u8,
    ) -> Result<Self, ConfigError> {
        check_rounds("max_debate_rounds", max_rounds)?;

        for (stage, expected) in [
            (&advocate, StateField::DebateHistory),
            (&skeptic, StateField::DebateHistory),
            (&synthesis, StateField::ResearchDecision),
        ] {
            if stage.owns() != expected {
                return Err(ConfigError::Invalid(format!(
                    "debate stage {} must write {expected}, not {}",
                    stage.id(),
                    stage.owns()
                )));
            }
        }
        if advocate.id() == skeptic.id() {
            return Err(ConfigError::DuplicateStage(advocate.id().to_string()));
        }

        Ok(Self {
            advocate: FanOut::single(Phase::Research, advocate)?,
            skeptic: FanOut::single(Phase::Research, skeptic)?,
            synthesis: FanOut::single(Phase::Research, synthesis)?,
            max_rounds,
        })
    }

    pub fn max_rounds(&self) -> u8 {
        self.max_rounds
    }

    pub async fn run(&self, state: &SharedState, ctx: &RunContext) -> Result<SharedState, Failure> {
        let mut working = state.clone();
        let mut turn = DebateTurn::first();
        loop {
            let (fan_out, round) = match turn {
                DebateTurn::Advocate { round } => (&self.advocate, Some(round)),
                DebateTurn::Skeptic { round } => (&self.skeptic, Some(round)),
                DebateTurn::Synthesis => (&self.synthesis, None),
                DebateTurn::Finished => return Ok(working),
            };
            debug!(?turn, "Debate turn");
            working = fan_out.run(&working, ctx, round).await?;
            turn = turn.next(self.max_rounds);
        }
    }
}
