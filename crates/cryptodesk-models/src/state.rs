//! The shared state threaded through a desk run.
//!
//! Every write goes through [`SharedState::apply`], which checks that the
//! writing phase owns the field, that write-once fields are written once, and
//! that the debate history grows in strict advocate/skeptic order. Stages never
//! hold a mutable reference; they return [`StateUpdate`]s that the coordinator
//! merges into a fresh copy.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::MAX_ROUNDS;
use crate::decision::FinalDecision;
use crate::kinds::{AnalystKind, DebateSide, RiskKind};
use crate::phase::{Phase, StateField};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("{phase} phase may not write {field} (owned by the {owner} phase)")]
    NotOwner {
        phase: Phase,
        field: StateField,
        owner: Phase,
    },

    #[error("{0} has already been written")]
    AlreadyWritten(StateField),

    #[error("out-of-order {field} entry: expected {expected}, got {got}")]
    OutOfOrder {
        field: StateField,
        expected: String,
        got: String,
    },

    #[error("{0} is not enabled for this run")]
    NotEnabled(StateField),

    #[error("required field {0} is missing")]
    Missing(StateField),
}

/// One statement in the research debate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DebateEntry {
    pub side: DebateSide,
    /// 1-indexed round.
    pub round: u8,
    pub statement: String,
}

/// One perspective's statement in a risk deliberation round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RiskEntry {
    pub perspective: RiskKind,
    /// 1-indexed round.
    pub round: u8,
    pub statement: String,
}

/// A single write a stage asks the coordinator to merge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "update")]
pub enum StateUpdate {
    AnalystReport { kind: AnalystKind, report: String },
    Debate(DebateEntry),
    ResearchDecision { decision: String },
    TradingPlan { plan: String },
    Risk(RiskEntry),
    RiskReport { kind: RiskKind, assessment: String },
    RiskSummary { summary: String },
    FinalDecision(FinalDecision),
}

impl StateUpdate {
    pub fn field(&self) -> StateField {
        match self {
            Self::AnalystReport { kind, .. } => StateField::AnalystReport(*kind),
            Self::Debate(_) => StateField::DebateHistory,
            Self::ResearchDecision { .. } => StateField::ResearchDecision,
            Self::TradingPlan { .. } => StateField::TradingPlan,
            Self::Risk(entry) => StateField::RiskStatement(entry.perspective),
            Self::RiskReport { kind, .. } => StateField::RiskReport(*kind),
            Self::RiskSummary { .. } => StateField::RiskSummary,
            Self::FinalDecision(_) => StateField::FinalDecision,
        }
    }
}

/// Run configuration and bookkeeping carried alongside the state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub enabled_analysts: Vec<AnalystKind>,
    pub enabled_risk_perspectives: Vec<RiskKind>,
    pub max_debate_rounds: u8,
    pub max_risk_rounds: u8,
    pub started_at: DateTime<Utc>,
    /// Sequence number of the last event published before the latest commit.
    pub last_event_sequence: u64,
    pub completed_phases: Vec<Phase>,
}

impl RunMetadata {
    pub fn new(
        enabled_analysts: Vec<AnalystKind>,
        enabled_risk_perspectives: Vec<RiskKind>,
        max_debate_rounds: u8,
        max_risk_rounds: u8,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            enabled_analysts,
            enabled_risk_perspectives,
            max_debate_rounds,
            max_risk_rounds,
            started_at: Utc::now(),
            last_event_sequence: 0,
            completed_phases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedState {
    subject: String,
    as_of: NaiveDate,
    analyst_reports: BTreeMap<AnalystKind, String>,
    debate_history: Vec<DebateEntry>,
    research_decision: Option<String>,
    trading_plan: Option<String>,
    risk_history: Vec<RiskEntry>,
    risk_reports: BTreeMap<RiskKind, String>,
    risk_summary: Option<String>,
    final_decision: Option<FinalDecision>,
    run_metadata: RunMetadata,
}

impl SharedState {
    /// Fresh state with only the subject, date and metadata populated.
    pub fn new(subject: impl Into<String>, as_of: NaiveDate, run_metadata: RunMetadata) -> Self {
        Self {
            subject: subject.into().trim().to_ascii_uppercase(),
            as_of,
            analyst_reports: BTreeMap::new(),
            debate_history: Vec::new(),
            research_decision: None,
            trading_plan: None,
            risk_history: Vec::new(),
            risk_reports: BTreeMap::new(),
            risk_summary: None,
            final_decision: None,
            run_metadata,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub fn analyst_reports(&self) -> &BTreeMap<AnalystKind, String> {
        &self.analyst_reports
    }

    pub fn debate_history(&self) -> &[DebateEntry] {
        &self.debate_history
    }

    pub fn research_decision(&self) -> Option<&str> {
        self.research_decision.as_deref()
    }

    pub fn trading_plan(&self) -> Option<&str> {
        self.trading_plan.as_deref()
    }

    pub fn risk_history(&self) -> &[RiskEntry] {
        &self.risk_history
    }

    pub fn risk_reports(&self) -> &BTreeMap<RiskKind, String> {
        &self.risk_reports
    }

    pub fn risk_summary(&self) -> Option<&str> {
        self.risk_summary.as_deref()
    }

    pub fn final_decision(&self) -> Option<&FinalDecision> {
        self.final_decision.as_ref()
    }

    pub fn run_metadata(&self) -> &RunMetadata {
        &self.run_metadata
    }

    pub fn require_research_decision(&self) -> Result<&str, StateError> {
        self.research_decision()
            .ok_or(StateError::Missing(StateField::ResearchDecision))
    }

    pub fn require_trading_plan(&self) -> Result<&str, StateError> {
        self.trading_plan()
            .ok_or(StateError::Missing(StateField::TradingPlan))
    }

    /// The debate must have run at least one full round before synthesis.
    pub fn require_debate(&self) -> Result<&[DebateEntry], StateError> {
        let complete = self.debate_history.len() >= 2 && self.debate_history.len() % 2 == 0;
        if complete {
            Ok(&self.debate_history)
        } else {
            Err(StateError::Missing(StateField::DebateHistory))
        }
    }

    /// Statements made by one side so far, in order.
    pub fn statements_by(&self, side: DebateSide) -> impl Iterator<Item = &DebateEntry> + '_ {
        self.debate_history.iter().filter(move |e| e.side == side)
    }

    /// The `(side, round)` the next debate entry must carry.
    ///
    /// `apply` keeps the history within `MAX_ROUNDS` rounds, so the round
    /// always fits; past that it saturates and `apply` rejects the entry.
    pub fn next_debate_turn(&self) -> (DebateSide, u8) {
        let len = self.debate_history.len();
        let side = if len % 2 == 0 {
            DebateSide::Advocate
        } else {
            DebateSide::Skeptic
        };
        (side, u8::try_from(len / 2 + 1).unwrap_or(u8::MAX))
    }

    /// Highest risk round recorded so far (0 before the first round).
    pub fn risk_round(&self) -> u8 {
        self.risk_history.iter().map(|e| e.round).max().unwrap_or(0)
    }

    /// Apply one update on behalf of `phase`.
    pub fn apply(&mut self, phase: Phase, update: StateUpdate) -> Result<(), StateError> {
        let field = update.field();
        let owner = field.owner();
        if owner != phase {
            return Err(StateError::NotOwner {
                phase,
                field,
                owner,
            });
        }

        match update {
            StateUpdate::AnalystReport { kind, report } => {
                if !self.run_metadata.enabled_analysts.contains(&kind) {
                    return Err(StateError::NotEnabled(field));
                }
                if self.analyst_reports.contains_key(&kind) {
                    return Err(StateError::AlreadyWritten(field));
                }
                self.analyst_reports.insert(kind, report);
            }
            StateUpdate::Debate(entry) => {
                if self.research_decision.is_some() {
                    return Err(StateError::AlreadyWritten(StateField::ResearchDecision));
                }
                let (side, round) = self.next_debate_turn();
                if round > MAX_ROUNDS {
                    return Err(StateError::OutOfOrder {
                        field,
                        expected: format!("at most {MAX_ROUNDS} rounds"),
                        got: format!("{} round {}", entry.side, entry.round),
                    });
                }
                if entry.side != side || entry.round != round {
                    return Err(StateError::OutOfOrder {
                        field,
                        expected: format!("{side} round {round}"),
                        got: format!("{} round {}", entry.side, entry.round),
                    });
                }
                self.debate_history.push(entry);
            }
            StateUpdate::ResearchDecision { decision } => {
                set_once(&mut self.research_decision, decision, field)?;
            }
            StateUpdate::TradingPlan { plan } => {
                set_once(&mut self.trading_plan, plan, field)?;
            }
            StateUpdate::Risk(entry) => {
                if !self
                    .run_metadata
                    .enabled_risk_perspectives
                    .contains(&entry.perspective)
                {
                    return Err(StateError::NotEnabled(field));
                }
                // A perspective's report closes its own statements only.
                if self.risk_reports.contains_key(&entry.perspective) {
                    return Err(StateError::AlreadyWritten(StateField::RiskReport(
                        entry.perspective,
                    )));
                }
                let current = self.risk_round();
                let duplicate = self
                    .risk_history
                    .iter()
                    .any(|e| e.perspective == entry.perspective && e.round == entry.round);
                if duplicate || entry.round < current.max(1) || entry.round > current + 1 {
                    return Err(StateError::OutOfOrder {
                        field,
                        expected: format!("round {} or {}", current.max(1), current + 1),
                        got: format!("{} round {}", entry.perspective, entry.round),
                    });
                }
                self.risk_history.push(entry);
            }
            StateUpdate::RiskReport { kind, assessment } => {
                if !self.run_metadata.enabled_risk_perspectives.contains(&kind) {
                    return Err(StateError::NotEnabled(field));
                }
                if self.risk_reports.contains_key(&kind) {
                    return Err(StateError::AlreadyWritten(field));
                }
                self.risk_reports.insert(kind, assessment);
            }
            StateUpdate::RiskSummary { summary } => {
                set_once(&mut self.risk_summary, summary, field)?;
            }
            StateUpdate::FinalDecision(decision) => {
                set_once(&mut self.final_decision, decision, field)?;
            }
        }

        Ok(())
    }

    /// Record that `phase` committed, with the event sequence observed at commit.
    pub fn mark_committed(&mut self, phase: Phase, last_event_sequence: u64) {
        self.run_metadata.completed_phases.push(phase);
        self.run_metadata.last_event_sequence = self
            .run_metadata
            .last_event_sequence
            .max(last_event_sequence);
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, field: StateField) -> Result<(), StateError> {
    if slot.is_some() {
        return Err(StateError::AlreadyWritten(field));
    }
    *slot = Some(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{TradeAction, TradingParams};

    fn test_state() -> SharedState {
        let meta = RunMetadata::new(
            vec![AnalystKind::Market, AnalystKind::News],
            vec![RiskKind::Aggressive, RiskKind::Conservative],
            2,
            1,
        );
        SharedState::new("btc", NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(), meta)
    }

    fn debate(side: DebateSide, round: u8) -> StateUpdate {
        StateUpdate::Debate(DebateEntry {
            side,
            round,
            statement: format!("{side} {round}"),
        })
    }

    #[test]
    fn new_state_normalizes_subject() {
        let state = test_state();
        assert_eq!(state.subject(), "BTC");
        assert!(state.analyst_reports().is_empty());
        assert!(state.final_decision().is_none());
    }

    #[test]
    fn analyst_report_written_once() {
        let mut state = test_state();
        let update = StateUpdate::AnalystReport {
            kind: AnalystKind::Market,
            report: "uptrend".to_string(),
        };
        state.apply(Phase::Analyst, update.clone()).unwrap();
        assert_eq!(
            state.apply(Phase::Analyst, update),
            Err(StateError::AlreadyWritten(StateField::AnalystReport(
                AnalystKind::Market
            )))
        );
    }

    #[test]
    fn disabled_analyst_rejected() {
        let mut state = test_state();
        let result = state.apply(
            Phase::Analyst,
            StateUpdate::AnalystReport {
                kind: AnalystKind::Social,
                report: "hype".to_string(),
            },
        );
        assert!(matches!(result, Err(StateError::NotEnabled(_))));
    }

    #[test]
    fn every_out_of_phase_write_is_rejected() {
        let decision = FinalDecision {
            action: TradeAction::Hold,
            rationale: "wait".to_string(),
            position_size_pct: None,
            trading_params: TradingParams::for_symbol("BTC"),
            decided_at: Utc::now(),
        };
        let updates = vec![
            StateUpdate::AnalystReport {
                kind: AnalystKind::Market,
                report: "r".to_string(),
            },
            debate(DebateSide::Advocate, 1),
            StateUpdate::ResearchDecision {
                decision: "d".to_string(),
            },
            StateUpdate::TradingPlan {
                plan: "p".to_string(),
            },
            StateUpdate::Risk(RiskEntry {
                perspective: RiskKind::Aggressive,
                round: 1,
                statement: "s".to_string(),
            }),
            StateUpdate::RiskReport {
                kind: RiskKind::Aggressive,
                assessment: "a".to_string(),
            },
            StateUpdate::RiskSummary {
                summary: "s".to_string(),
            },
            StateUpdate::FinalDecision(decision),
        ];

        for update in updates {
            let owner = update.field().owner();
            for phase in Phase::ALL.into_iter().filter(|p| *p != owner) {
                let mut state = test_state();
                let before = state.clone();
                let result = state.apply(phase, update.clone());
                assert!(
                    matches!(result, Err(StateError::NotOwner { .. })),
                    "{phase} wrote {}",
                    update.field()
                );
                assert_eq!(state, before, "rejected write must not mutate state");
            }
            let mut state = test_state();
            assert!(state.apply(owner, update).is_ok());
        }
    }

    #[test]
    fn debate_must_alternate_starting_with_advocate() {
        let mut state = test_state();
        assert!(matches!(
            state.apply(Phase::Research, debate(DebateSide::Skeptic, 1)),
            Err(StateError::OutOfOrder { .. })
        ));

        state.apply(Phase::Research, debate(DebateSide::Advocate, 1)).unwrap();
        assert!(matches!(
            state.apply(Phase::Research, debate(DebateSide::Advocate, 2)),
            Err(StateError::OutOfOrder { .. })
        ));
        state.apply(Phase::Research, debate(DebateSide::Skeptic, 1)).unwrap();
        assert_eq!(state.next_debate_turn(), (DebateSide::Advocate, 2));
        assert!(state.require_debate().is_ok());
    }

    #[test]
    fn debate_closed_after_research_decision() {
        let mut state = test_state();
        state.apply(Phase::Research, debate(DebateSide::Advocate, 1)).unwrap();
        state.apply(Phase::Research, debate(DebateSide::Skeptic, 1)).unwrap();
        state
            .apply(
                Phase::Research,
                StateUpdate::ResearchDecision {
                    decision: "lean long".to_string(),
                },
            )
            .unwrap();
        assert!(state
            .apply(Phase::Research, debate(DebateSide::Advocate, 2))
            .is_err());
    }

    #[test]
    fn debate_stops_at_the_round_limit() {
        let mut state = test_state();
        for round in 1..=MAX_ROUNDS {
            state.apply(Phase::Research, debate(DebateSide::Advocate, round)).unwrap();
            state.apply(Phase::Research, debate(DebateSide::Skeptic, round)).unwrap();
        }
        assert_eq!(state.next_debate_turn(), (DebateSide::Advocate, MAX_ROUNDS + 1));
        let before = state.clone();
        assert!(matches!(
            state.apply(Phase::Research, debate(DebateSide::Advocate, MAX_ROUNDS + 1)),
            Err(StateError::OutOfOrder { .. })
        ));
        assert_eq!(state, before);
    }

    #[test]
    fn incomplete_debate_is_missing() {
        let mut state = test_state();
        assert!(state.require_debate().is_err());
        state.apply(Phase::Research, debate(DebateSide::Advocate, 1)).unwrap();
        assert_eq!(
            state.require_debate(),
            Err(StateError::Missing(StateField::DebateHistory))
        );
    }

    #[test]
    fn risk_entries_advance_one_round_at_a_time() {
        let mut state = test_state();
        let entry = |perspective, round| {
            StateUpdate::Risk(RiskEntry {
                perspective,
                round,
                statement: "s".to_string(),
            })
        };
        assert!(state.apply(Phase::Risk, entry(RiskKind::Aggressive, 2)).is_err());
        state.apply(Phase::Risk, entry(RiskKind::Aggressive, 1)).unwrap();
        assert!(state.apply(Phase::Risk, entry(RiskKind::Aggressive, 1)).is_err());
        state.apply(Phase::Risk, entry(RiskKind::Conservative, 1)).unwrap();
        state.apply(Phase::Risk, entry(RiskKind::Aggressive, 2)).unwrap();
        assert_eq!(state.risk_round(), 2);
        assert!(state.apply(Phase::Risk, entry(RiskKind::Conservative, 1)).is_err());
        assert!(state.apply(Phase::Risk, entry(RiskKind::Neutral, 2)).is_err());
    }

    #[test]
    fn upstream_requirements() {
        let mut state = test_state();
        assert_eq!(
            state.require_trading_plan(),
            Err(StateError::Missing(StateField::TradingPlan))
        );
        state
            .apply(
                Phase::Trading,
                StateUpdate::TradingPlan {
                    plan: "buy 2%".to_string(),
                },
            )
            .unwrap();
        assert_eq!(state.require_trading_plan(), Ok("buy 2%"));
    }

    #[test]
    fn commit_bookkeeping_is_monotonic() {
        let mut state = test_state();
        state.mark_committed(Phase::Analyst, 7);
        state.mark_committed(Phase::Research, 3);
        assert_eq!(state.run_metadata().last_event_sequence, 7);
        assert_eq!(
            state.run_metadata().completed_phases,
            vec![Phase::Analyst, Phase::Research]
        );
    }

    #[test]
    fn state_serializes_reports_by_kind() {
        let mut state = test_state();
        state
            .apply(
                Phase::Analyst,
                StateUpdate::AnalystReport {
                    kind: AnalystKind::News,
                    report: "ETF inflows".to_string(),
                },
            )
            .unwrap();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["analyst_reports"]["news"], "ETF inflows");
        assert_eq!(json["subject"], "BTC");
    }

    #[test]
    fn risk_entries_belong_to_their_perspective() {
        let entry = StateUpdate::Risk(RiskEntry {
            perspective: RiskKind::Neutral,
            round: 1,
            statement: "s".to_string(),
        });
        assert_eq!(entry.field(), StateField::RiskStatement(RiskKind::Neutral));
        assert_ne!(entry.field(), StateField::RiskReport(RiskKind::Neutral));
    }

    #[test]
    fn report_closes_only_its_own_perspective() {
        let mut state = test_state();
        let entry = |perspective| {
            StateUpdate::Risk(RiskEntry {
                perspective,
                round: 1,
                statement: "s".to_string(),
            })
        };
        state
            .apply(
                Phase::Risk,
                StateUpdate::RiskReport {
                    kind: RiskKind::Aggressive,
                    assessment: "go".to_string(),
                },
            )
            .unwrap();

        state.apply(Phase::Risk, entry(RiskKind::Conservative)).unwrap();
        assert_eq!(
            state.apply(Phase::Risk, entry(RiskKind::Aggressive)),
            Err(StateError::AlreadyWritten(StateField::RiskReport(
                RiskKind::Aggressive
            )))
        );
    }
}
