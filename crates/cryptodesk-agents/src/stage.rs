//! Stages: the units of work the coordinator schedules.
//!
//! A stage reads the snapshot it is handed and returns the writes it wants
//! merged. It never sees a mutable state, so concurrently running stages cannot
//! observe each other.

use std::sync::Arc;

use async_trait::async_trait;
use cryptodesk_models::{
    AnalystKind, CollaboratorErrorKind, DebateEntry, DebateSide, RiskEntry, SharedState,
    StageKind, StateField, StateUpdate,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::collaborator::{DataCollaborator, PromptContext, ReasoningCollaborator};
use crate::error::AgentError;
use crate::events::StageEmitter;
use crate::parser::{clean_response, parse_final_decision};
use crate::prompts;
use crate::retry::RetryPolicy;

/// What a stage gets to see while it runs.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub state: &'a SharedState,
    pub emitter: &'a StageEmitter,
    pub cancel: &'a CancellationToken,
    /// Current round for stages invoked inside a round-based loop.
    pub round: Option<u8>,
}

/// Trait for stages. Mockable for testing.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable identifier, unique within a run.
    fn id(&self) -> &str;

    /// The single state field (or map key) this stage writes.
    fn owns(&self) -> StateField;

    async fn run(&self, ctx: StageContext<'_>) -> Result<Vec<StateUpdate>, AgentError>;
}

/// Metrics each analyst asks the data collaborator for, in order.
pub fn analyst_metrics(kind: AnalystKind) -> &'static [&'static str] {
    match kind {
        AnalystKind::Market => &["price_window", "technical_indicators"],
        AnalystKind::Social => &["social_sentiment"],
        AnalystKind::News => &["news"],
        AnalystKind::Fundamentals => &["fundamentals", "market_overview"],
    }
}

/// A stage served by the reasoning collaborator, parameterized by its variant.
pub struct LlmStage {
    kind: StageKind,
    id: String,
    reasoner: Arc<dyn ReasoningCollaborator>,
    data: Arc<dyn DataCollaborator>,
    retry: RetryPolicy,
}

impl LlmStage {
    pub fn new(
        kind: StageKind,
        reasoner: Arc<dyn ReasoningCollaborator>,
        data: Arc<dyn DataCollaborator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            kind,
            id: kind.id(),
            reasoner,
            data,
            retry,
        }
    }

    fn prompt(&self, user: String) -> PromptContext {
        PromptContext {
            stage_id: self.id.clone(),
            tier: self.kind.tier(),
            system: prompts::system_prompt(self.kind),
            user,
        }
    }

    async fn reason(&self, ctx: &StageContext<'_>, user: String) -> Result<String, AgentError> {
        let prompt = self.prompt(user);
        let emitter = ctx.emitter;
        let raw = self
            .retry
            .run(
                &self.id,
                ctx.cancel,
                |attempt, err, delay| {
                    emitter.progress(format!(
                        "reasoning attempt {attempt} failed ({err}), retrying in {}ms",
                        delay.as_millis()
                    ));
                },
                || self.reasoner.invoke(&prompt),
            )
            .await?;
        clean_response(&raw)
    }

    async fn gather(
        &self,
        ctx: &StageContext<'_>,
        kind: AnalystKind,
    ) -> Result<Vec<(&'static str, Option<serde_json::Value>)>, AgentError> {
        let subject = ctx.state.subject();
        let as_of = ctx.state.as_of();
        let emitter = ctx.emitter;
        let mut gathered = Vec::new();

        for &metric in analyst_metrics(kind) {
            emitter.progress(format!("fetching {metric}"));
            let result = self
                .retry
                .run(
                    &self.id,
                    ctx.cancel,
                    |attempt, err, delay| {
                        emitter.progress(format!(
                            "{metric} attempt {attempt} failed ({err}), retrying in {}ms",
                            delay.as_millis()
                        ));
                    },
                    || self.data.fetch(subject, as_of, metric),
                )
                .await;

            match result {
                Ok(value) => gathered.push((metric, Some(value))),
                Err(AgentError::Collaborator(e)) if e.kind == CollaboratorErrorKind::NotFound => {
                    debug!(stage = %self.id, metric, "No data");
                    gathered.push((metric, None));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(gathered)
    }

    async fn debate_turn(
        &self,
        ctx: &StageContext<'_>,
        side: DebateSide,
    ) -> Result<Vec<StateUpdate>, AgentError> {
        let state = ctx.state;
        if state.research_decision().is_some() {
            return Err(AgentError::Contract(
                "debate is closed once the research decision is written".to_string(),
            ));
        }
        let (due, round) = state.next_debate_turn();
        if due != side {
            return Err(AgentError::Contract(format!(
                "{side} invoked out of turn, {due} is due for round {round}"
            )));
        }

        let statement = self
            .reason(ctx, prompts::debate_prompt(state, side, round))
            .await?;
        Ok(vec![StateUpdate::Debate(DebateEntry {
            side,
            round,
            statement,
        })])
    }
}

#[async_trait]
impl Stage for LlmStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn owns(&self) -> StateField {
        self.kind.owns()
    }

    async fn run(&self, ctx: StageContext<'_>) -> Result<Vec<StateUpdate>, AgentError> {
        let state = ctx.state;
        match self.kind {
            StageKind::Analyst(kind) => {
                let data = self.gather(&ctx, kind).await?;
                let report = self
                    .reason(&ctx, prompts::analyst_prompt(state, kind, &data))
                    .await?;
                Ok(vec![StateUpdate::AnalystReport { kind, report }])
            }
            StageKind::Advocate => self.debate_turn(&ctx, DebateSide::Advocate).await,
            StageKind::Skeptic => self.debate_turn(&ctx, DebateSide::Skeptic).await,
            StageKind::ResearchManager => {
                state.require_debate()?;
                let decision = self
                    .reason(&ctx, prompts::research_manager_prompt(state))
                    .await?;
                Ok(vec![StateUpdate::ResearchDecision { decision }])
            }
            StageKind::Trader => {
                let research = state.require_research_decision()?;
                let plan = self
                    .reason(&ctx, prompts::trader_prompt(state, research))
                    .await?;
                Ok(vec![StateUpdate::TradingPlan { plan }])
            }
            StageKind::RiskDebator(perspective) => {
                let plan = state.require_trading_plan()?;
                let round = ctx.round.ok_or_else(|| {
                    AgentError::Contract(format!("{} invoked without a round", self.id))
                })?;
                let statement = self
                    .reason(
                        &ctx,
                        prompts::risk_debator_prompt(state, perspective, plan, round),
                    )
                    .await?;
                Ok(vec![StateUpdate::Risk(RiskEntry {
                    perspective,
                    round,
                    statement,
                })])
            }
            StageKind::RiskManager => {
                let plan = state.require_trading_plan()?;
                let summary = self
                    .reason(&ctx, prompts::risk_manager_prompt(state, plan))
                    .await?;
                Ok(vec![StateUpdate::RiskSummary { summary }])
            }
            StageKind::PortfolioManager => {
                let plan = state.require_trading_plan()?;
                let verdict = self
                    .reason(&ctx, prompts::portfolio_prompt(state, plan))
                    .await?;
                let decision = parse_final_decision(&verdict, state.subject())?;
                Ok(vec![StateUpdate::FinalDecision(decision)])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::test_support::{test_state, ScriptedReasoner, StaticData};
    use cryptodesk_models::{FailureKind, Phase, RiskKind, RunEventKind, TradeAction};

    struct Harness {
        emitter: StageEmitter,
        cancel: CancellationToken,
        bus: Arc<EventBus>,
    }

    impl Harness {
        fn new(phase: Phase, stage_id: &str) -> Self {
            let bus = EventBus::new().shared();
            Self {
                emitter: bus.emitter(uuid::Uuid::nil(), phase, stage_id),
                cancel: CancellationToken::new(),
                bus,
            }
        }

        fn ctx<'a>(&'a self, state: &'a SharedState, round: Option<u8>) -> StageContext<'a> {
            StageContext {
                state,
                emitter: &self.emitter,
                cancel: &self.cancel,
                round,
            }
        }
    }

    fn stage(kind: StageKind, reasoner: &Arc<ScriptedReasoner>, data: StaticData) -> LlmStage {
        LlmStage::new(
            kind,
            reasoner.clone(),
            Arc::new(data),
            RetryPolicy::immediate(3),
        )
    }

    #[tokio::test]
    async fn analyst_reports_with_partial_data() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        let data = StaticData::new().with("price_window", serde_json::json!({"close": [96000.0]}));
        let analyst = stage(StageKind::Analyst(AnalystKind::Market), &reasoner, data);
        let harness = Harness::new(Phase::Analyst, analyst.id());
        let state = test_state();

        let updates = analyst.run(harness.ctx(&state, None)).await.unwrap();
        assert!(matches!(
            &updates[..],
            [StateUpdate::AnalystReport { kind: AnalystKind::Market, .. }]
        ));

        let calls = reasoner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].user.contains("96000"));
        assert!(calls[0].user.contains("### technical_indicators\n(no data available)"));
        assert_eq!(calls[0].stage_id, "market_analyst");
    }

    #[tokio::test]
    async fn transient_failures_are_retried_and_reported() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.fail_times("trader", 2, CollaboratorErrorKind::RateLimited);
        let trader = stage(StageKind::Trader, &reasoner, StaticData::new());
        let harness = Harness::new(Phase::Trading, trader.id());
        let mut rx = harness.bus.subscribe();

        let mut state = test_state();
        state
            .apply(
                Phase::Research,
                StateUpdate::ResearchDecision {
                    decision: "accumulate".to_string(),
                },
            )
            .unwrap();

        let updates = trader.run(harness.ctx(&state, None)).await.unwrap();
        assert!(matches!(&updates[..], [StateUpdate::TradingPlan { .. }]));
        assert_eq!(reasoner.calls().len(), 3);

        let mut retries = 0;
        while let Ok(event) = rx.try_recv() {
            if let RunEventKind::Stage { detail: Some(detail), .. } = event.kind {
                assert!(detail.contains("retrying"));
                retries += 1;
            }
        }
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_stage() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.fail_always("research_manager", CollaboratorErrorKind::Unavailable);
        let manager = stage(StageKind::ResearchManager, &reasoner, StaticData::new());
        let harness = Harness::new(Phase::Research, manager.id());

        let mut state = test_state();
        for side in [DebateSide::Advocate, DebateSide::Skeptic] {
            state
                .apply(
                    Phase::Research,
                    StateUpdate::Debate(DebateEntry {
                        side,
                        round: 1,
                        statement: "x".to_string(),
                    }),
                )
                .unwrap();
        }

        let err = manager.run(harness.ctx(&state, None)).await.unwrap_err();
        assert_eq!(
            err.failure_kind(),
            FailureKind::RetriesExhausted(CollaboratorErrorKind::Unavailable)
        );
        assert_eq!(reasoner.calls().len(), 3);
    }

    #[tokio::test]
    async fn missing_upstream_field_is_a_contract_violation() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        let trader = stage(StageKind::Trader, &reasoner, StaticData::new());
        let harness = Harness::new(Phase::Trading, trader.id());
        let state = test_state();

        let err = trader.run(harness.ctx(&state, None)).await.unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::ContractViolation);
        assert!(reasoner.calls().is_empty());
    }

    #[tokio::test]
    async fn debater_out_of_turn_is_rejected() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        let skeptic = stage(StageKind::Skeptic, &reasoner, StaticData::new());
        let harness = Harness::new(Phase::Research, skeptic.id());
        let state = test_state();

        let err = skeptic.run(harness.ctx(&state, None)).await.unwrap_err();
        assert!(matches!(err, AgentError::Contract(_)));
    }

    #[tokio::test]
    async fn risk_debator_needs_a_round() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        let debator = stage(
            StageKind::RiskDebator(RiskKind::Neutral),
            &reasoner,
            StaticData::new(),
        );
        let harness = Harness::new(Phase::Risk, debator.id());
        let mut state = test_state();
        state
            .apply(
                Phase::Trading,
                StateUpdate::TradingPlan {
                    plan: "buy".to_string(),
                },
            )
            .unwrap();

        assert!(debator.run(harness.ctx(&state, None)).await.is_err());
        let updates = debator.run(harness.ctx(&state, Some(2))).await.unwrap();
        match &updates[..] {
            [StateUpdate::Risk(entry)] => {
                assert_eq!(entry.perspective, RiskKind::Neutral);
                assert_eq!(entry.round, 2);
            }
            other => panic!("unexpected updates {other:?}"),
        }
    }

    #[tokio::test]
    async fn portfolio_manager_extracts_decision() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.respond("portfolio_manager", "Trim exposure.\nFINAL DECISION: SELL");
        let manager = stage(StageKind::PortfolioManager, &reasoner, StaticData::new());
        let harness = Harness::new(Phase::Portfolio, manager.id());
        let mut state = test_state();
        state
            .apply(
                Phase::Trading,
                StateUpdate::TradingPlan {
                    plan: "sell".to_string(),
                },
            )
            .unwrap();

        let updates = manager.run(harness.ctx(&state, None)).await.unwrap();
        match &updates[..] {
            [StateUpdate::FinalDecision(decision)] => {
                assert_eq!(decision.action, TradeAction::Sell);
                assert_eq!(decision.trading_params.symbol, "BTC");
            }
            other => panic!("unexpected updates {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_stage_stops_early() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        let analyst = stage(
            StageKind::Analyst(AnalystKind::News),
            &reasoner,
            StaticData::new(),
        );
        let harness = Harness::new(Phase::Analyst, analyst.id());
        harness.cancel.cancel();
        let state = test_state();

        let err = analyst.run(harness.ctx(&state, None)).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }

    #[test]
    fn metrics_per_analyst() {
        assert_eq!(
            analyst_metrics(AnalystKind::Market),
            &["price_window", "technical_indicators"]
        );
        assert_eq!(
            analyst_metrics(AnalystKind::Fundamentals),
            &["fundamentals", "market_overview"]
        );
    }
}
