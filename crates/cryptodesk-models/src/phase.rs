use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kinds::{AnalystKind, RiskKind};

/// The five sequential phases of a desk run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Analyst,
    Research,
    Trading,
    Risk,
    Portfolio,
}

impl Phase {
    /// Phases in execution order. Topology is fixed.
    pub const ALL: [Phase; 5] = [
        Phase::Analyst,
        Phase::Research,
        Phase::Trading,
        Phase::Risk,
        Phase::Portfolio,
    ];

    /// The phase that follows this one, or `None` after the portfolio phase.
    pub fn next(self) -> Option<Phase> {
        match self {
            Self::Analyst => Some(Self::Research),
            Self::Research => Some(Self::Trading),
            Self::Trading => Some(Self::Risk),
            Self::Risk => Some(Self::Portfolio),
            Self::Portfolio => None,
        }
    }

    /// Whether this phase fans out over a configurable stage set.
    pub fn fans_out(self) -> bool {
        matches!(self, Self::Analyst | Self::Risk)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analyst => write!(f, "analyst"),
            Self::Research => write!(f, "research"),
            Self::Trading => write!(f, "trading"),
            Self::Risk => write!(f, "risk"),
            Self::Portfolio => write!(f, "portfolio"),
        }
    }
}

/// A writable field (or map key) of the shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "field", content = "key")]
pub enum StateField {
    AnalystReport(AnalystKind),
    DebateHistory,
    ResearchDecision,
    TradingPlan,
    /// One perspective's per-round statements in the risk history.
    RiskStatement(RiskKind),
    RiskReport(RiskKind),
    RiskSummary,
    FinalDecision,
}

impl StateField {
    /// The only phase allowed to write this field.
    pub fn owner(self) -> Phase {
        match self {
            Self::AnalystReport(_) => Phase::Analyst,
            Self::DebateHistory | Self::ResearchDecision => Phase::Research,
            Self::TradingPlan => Phase::Trading,
            Self::RiskStatement(_) | Self::RiskReport(_) | Self::RiskSummary => Phase::Risk,
            Self::FinalDecision => Phase::Portfolio,
        }
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnalystReport(kind) => write!(f, "analyst_reports[{kind}]"),
            Self::DebateHistory => write!(f, "debate_history"),
            Self::ResearchDecision => write!(f, "research_decision"),
            Self::TradingPlan => write!(f, "trading_plan"),
            Self::RiskStatement(kind) => write!(f, "risk_history[{kind}]"),
            Self::RiskReport(kind) => write!(f, "risk_reports[{kind}]"),
            Self::RiskSummary => write!(f, "risk_summary"),
            Self::FinalDecision => write!(f, "final_decision"),
        }
    }
}
