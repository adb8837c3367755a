use std::sync::Arc;

use cryptodesk_models::config::check_rounds;
use cryptodesk_models::{ConfigError, Failure, Phase, SharedState, StateField, StateUpdate};
use tracing::debug;

use crate::coordinator::{FanOut, RunContext};
use crate::error::AgentError;
use crate::stage::Stage;

/// Round-based deliberation among the enabled risk perspectives.
///
/// Every round fans out over all perspectives and commits before the next
/// round, so round N sees the statements of round N-1. Perspectives only
/// append statements; after the last round the deliberation itself turns each
/// perspective's final statement into its risk report, and the synthesis
/// stage writes the summary. With no perspectives the phase is a no-op and
/// the summary stays empty.
pub struct RiskDeliberation {
    perspectives: FanOut,
    synthesis: FanOut,
    max_rounds: u8,
}

impl RiskDeliberation {
    pub fn new(
        perspectives: Vec<Arc<dyn Stage>>,
        synthesis: Arc<dyn Stage>,
        max_rounds: u8,
    ) -> Result<Self, ConfigError> {
        check_rounds("max_risk_rounds", max_rounds)?;

        for stage in &perspectives {
            if !matches!(stage.owns(), StateField::RiskStatement(_)) {
                return Err(ConfigError::Invalid(format!(
                    "risk perspective {} must write its risk statements, not {}",
                    stage.id(),
                    stage.owns()
                )));
            }
        }
        if synthesis.owns() != StateField::RiskSummary {
            return Err(ConfigError::Invalid(format!(
                "risk synthesis {} must write {}, not {}",
                synthesis.id(),
                StateField::RiskSummary,
                synthesis.owns()
            )));
        }

        Ok(Self {
            perspectives: FanOut::new(Phase::Risk, perspectives)?,
            synthesis: FanOut::single(Phase::Risk, synthesis)?,
            max_rounds,
        })
    }

    pub async fn run(&self, state: &SharedState, ctx: &RunContext) -> Result<SharedState, Failure> {
        if self.perspectives.is_empty() {
            debug!("No risk perspectives enabled, skipping deliberation");
            return Ok(state.clone());
        }

        let mut working = state.clone();
        for round in 1..=self.max_rounds {
            debug!(round, "Risk round");
            working = self.perspectives.run(&working, ctx, Some(round)).await?;
        }

        let finals: Vec<_> = working
            .risk_history()
            .iter()
            .filter(|e| e.round == self.max_rounds)
            .map(|e| (e.perspective, e.statement.clone()))
            .collect();
        for (kind, assessment) in finals {
            working
                .apply(Phase::Risk, StateUpdate::RiskReport { kind, assessment })
                .map_err(|e| AgentError::from(e).into_failure(Phase::Risk, &format!("risk_{kind}")))?;
        }

        self.synthesis.run(&working, ctx, None).await
    }
}
