use cryptodesk_models::{Failure, Phase, SharedState};

use crate::coordinator::{FanOut, RunContext};
use crate::debate::DebateLoop;
use crate::risk::RiskDeliberation;

/// Maps each phase to the mechanism that runs it.
pub struct PhaseRouter {
    analysts: FanOut,
    debate: DebateLoop,
    trader: FanOut,
    risk: RiskDeliberation,
    portfolio: FanOut,
}

impl PhaseRouter {
    pub fn new(
        analysts: FanOut,
        debate: DebateLoop,
        trader: FanOut,
        risk: RiskDeliberation,
        portfolio: FanOut,
    ) -> Self {
        Self {
            analysts,
            debate,
            trader,
            risk,
            portfolio,
        }
    }

    pub fn analyst_ids(&self) -> Vec<&str> {
        self.analysts.stage_ids()
    }

    /// Run one phase against `state`. On success the returned state holds
    /// exactly the writes of that phase on top of `state`.
    pub async fn run_phase(
        &self,
        phase: Phase,
        state: &SharedState,
        ctx: &RunContext,
    ) -> Result<SharedState, Failure> {
        match phase {
            Phase::Analyst => self.analysts.run(state, ctx, None).await,
            Phase::Research => self.debate.run(state, ctx).await,
            Phase::Trading => self.trader.run(state, ctx, None).await,
            Phase::Risk => self.risk.run(state, ctx).await,
            Phase::Portfolio => self.portfolio.run(state, ctx, None).await,
        }
    }
}
