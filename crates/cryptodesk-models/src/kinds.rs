use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::phase::{Phase, StateField};

/// The analyst desks that can run during the analyst phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalystKind {
    Market,
    Social,
    News,
    Fundamentals,
}

impl AnalystKind {
    pub const ALL: [AnalystKind; 4] = [
        AnalystKind::Market,
        AnalystKind::Social,
        AnalystKind::News,
        AnalystKind::Fundamentals,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Social => "social",
            Self::News => "news",
            Self::Fundamentals => "fundamentals",
        }
    }
}

impl fmt::Display for AnalystKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalystKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "market" => Ok(Self::Market),
            "social" => Ok(Self::Social),
            "news" => Ok(Self::News),
            "fundamentals" => Ok(Self::Fundamentals),
            other => Err(format!("unknown analyst kind: {other}")),
        }
    }
}

/// Risk perspectives that deliberate over the trading plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskKind {
    Aggressive,
    Conservative,
    Neutral,
}

impl RiskKind {
    pub const ALL: [RiskKind; 3] = [RiskKind::Aggressive, RiskKind::Conservative, RiskKind::Neutral];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aggressive => "aggressive",
            Self::Conservative => "conservative",
            Self::Neutral => "neutral",
        }
    }
}

impl fmt::Display for RiskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aggressive" => Ok(Self::Aggressive),
            "conservative" => Ok(Self::Conservative),
            "neutral" => Ok(Self::Neutral),
            other => Err(format!("unknown risk perspective: {other}")),
        }
    }
}

/// Side of the research debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateSide {
    Advocate,
    Skeptic,
}

impl DebateSide {
    pub fn opponent(self) -> Self {
        match self {
            Self::Advocate => Self::Skeptic,
            Self::Skeptic => Self::Advocate,
        }
    }
}

impl fmt::Display for DebateSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Advocate => write!(f, "advocate"),
            Self::Skeptic => write!(f, "skeptic"),
        }
    }
}

/// Which model class a stage should be served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Cheap, fast model for high-volume turns.
    Quick,
    /// Slower model for synthesis and decisions.
    Deep,
}

/// The closed set of stage variants the desk knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "stage", content = "kind")]
pub enum StageKind {
    Analyst(AnalystKind),
    Advocate,
    Skeptic,
    ResearchManager,
    Trader,
    RiskDebator(RiskKind),
    RiskManager,
    PortfolioManager,
}

impl StageKind {
    /// Stable identifier used in events, failures and logs.
    pub fn id(self) -> String {
        match self {
            Self::Analyst(kind) => format!("{kind}_analyst"),
            Self::Advocate => "advocate".to_string(),
            Self::Skeptic => "skeptic".to_string(),
            Self::ResearchManager => "research_manager".to_string(),
            Self::Trader => "trader".to_string(),
            Self::RiskDebator(kind) => format!("risk_{kind}"),
            Self::RiskManager => "risk_manager".to_string(),
            Self::PortfolioManager => "portfolio_manager".to_string(),
        }
    }

    pub fn phase(self) -> Phase {
        self.owns().owner()
    }

    /// The single state field this stage variant writes.
    pub fn owns(self) -> StateField {
        match self {
            Self::Analyst(kind) => StateField::AnalystReport(kind),
            Self::Advocate | Self::Skeptic => StateField::DebateHistory,
            Self::ResearchManager => StateField::ResearchDecision,
            Self::Trader => StateField::TradingPlan,
            Self::RiskDebator(kind) => StateField::RiskStatement(kind),
            Self::RiskManager => StateField::RiskSummary,
            Self::PortfolioManager => StateField::FinalDecision,
        }
    }

    pub fn tier(self) -> ModelTier {
        match self {
            Self::Analyst(_) | Self::Advocate | Self::Skeptic | Self::RiskDebator(_) => {
                ModelTier::Quick
            }
            Self::ResearchManager | Self::Trader | Self::RiskManager | Self::PortfolioManager => {
                ModelTier::Deep
            }
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}
