use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kinds::{AnalystKind, RiskKind};
use crate::phase::StateField;

pub const MIN_ROUNDS: u8 = 1;
/// Upper bound for both round limits. `SharedState` also refuses debate
/// entries past this round.
pub const MAX_ROUNDS: u8 = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be between 1 and 5, got {value}")]
    RoundsOutOfRange { name: &'static str, value: u8 },

    #[error("stage {0} is configured more than once")]
    DuplicateStage(String),

    #[error("stages {first} and {second} both write {field}")]
    OverlappingOwnership {
        first: String,
        second: String,
        field: StateField,
    },

    #[error("subject must not be empty")]
    EmptySubject,

    #[error("unsupported subject {0}")]
    UnsupportedSubject(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration for the desk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeskConfig {
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Which stages run and how deep the loops go.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestrationConfig {
    #[serde(default = "default_analysts")]
    pub enabled_analysts: Vec<AnalystKind>,
    #[serde(default = "default_risk_perspectives")]
    pub enabled_risk_perspectives: Vec<RiskKind>,
    #[serde(default = "default_rounds")]
    pub max_debate_rounds: u8,
    #[serde(default = "default_rounds")]
    pub max_risk_rounds: u8,
    /// Overall deadline for each phase. None = no deadline.
    #[serde(default)]
    pub phase_timeout_seconds: Option<u64>,
    /// Subjects the desk accepts. Empty = accept any non-empty symbol.
    #[serde(default = "default_supported_subjects")]
    pub supported_subjects: Vec<String>,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            enabled_analysts: default_analysts(),
            enabled_risk_perspectives: default_risk_perspectives(),
            max_debate_rounds: default_rounds(),
            max_risk_rounds: default_rounds(),
            phase_timeout_seconds: None,
            supported_subjects: default_supported_subjects(),
        }
    }
}

impl OrchestrationConfig {
    /// Check round bounds and that no analyst or risk perspective is listed twice.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_rounds("max_debate_rounds", self.max_debate_rounds)?;
        check_rounds("max_risk_rounds", self.max_risk_rounds)?;

        let mut seen = HashSet::new();
        for kind in &self.enabled_analysts {
            if !seen.insert(*kind) {
                return Err(ConfigError::DuplicateStage(format!("{kind}_analyst")));
            }
        }

        let mut seen = HashSet::new();
        for kind in &self.enabled_risk_perspectives {
            if !seen.insert(*kind) {
                return Err(ConfigError::DuplicateStage(format!("risk_{kind}")));
            }
        }

        if self.phase_timeout_seconds == Some(0) {
            return Err(ConfigError::Invalid(
                "phase_timeout_seconds must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Normalize and check a subject symbol. Returns the upper-cased symbol.
    pub fn validate_subject(&self, subject: &str) -> Result<String, ConfigError> {
        let symbol = subject.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(ConfigError::EmptySubject);
        }
        if !self.supported_subjects.is_empty()
            && !self
                .supported_subjects
                .iter()
                .any(|s| s.eq_ignore_ascii_case(&symbol))
        {
            return Err(ConfigError::UnsupportedSubject(symbol));
        }
        Ok(symbol)
    }

    /// Set both round limits from a depth preset.
    pub fn apply_depth(&mut self, depth: ResearchDepth) {
        self.max_debate_rounds = depth.rounds();
        self.max_risk_rounds = depth.rounds();
    }

    pub fn phase_timeout(&self) -> Option<std::time::Duration> {
        self.phase_timeout_seconds.map(std::time::Duration::from_secs)
    }
}

/// Reject round limits outside `MIN_ROUNDS..=MAX_ROUNDS`.
pub fn check_rounds(name: &'static str, value: u8) -> Result<(), ConfigError> {
    if !(MIN_ROUNDS..=MAX_ROUNDS).contains(&value) {
        return Err(ConfigError::RoundsOutOfRange { name, value });
    }
    Ok(())
}

/// Debate/risk depth presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDepth {
    Shallow,
    Medium,
    Deep,
}

impl ResearchDepth {
    pub fn rounds(self) -> u8 {
        match self {
            Self::Shallow => 1,
            Self::Medium => 3,
            Self::Deep => 5,
        }
    }
}

impl FromStr for ResearchDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shallow" => Ok(Self::Shallow),
            "medium" => Ok(Self::Medium),
            "deep" => Ok(Self::Deep),
            other => Err(format!("unknown research depth: {other}")),
        }
    }
}

/// Models used by the reasoning collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    /// Model for synthesis and decision stages.
    pub deep_think_model: String,
    /// Model for analysts and debate turns.
    pub quick_think_model: String,
    /// Per-invocation timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            deep_think_model: "claude-sonnet-4-5-20250929".to_string(),
            quick_think_model: "claude-3-5-haiku-latest".to_string(),
            timeout_seconds: 90,
        }
    }
}

/// Configuration for the market-data cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Path to the shared SQLite cache file (written by an external loader).
    pub sqlite_path: String,
    pub memory_max_capacity: u64,
    pub memory_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "data/cryptodesk_cache.db".to_string(),
            memory_max_capacity: 10_000,
            memory_ttl_seconds: 60,
        }
    }
}

/// Retry policy applied to every collaborator call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_analysts() -> Vec<AnalystKind> {
    AnalystKind::ALL.to_vec()
}
fn default_risk_perspectives() -> Vec<RiskKind> {
    RiskKind::ALL.to_vec()
}
fn default_rounds() -> u8 {
    1
}
fn default_supported_subjects() -> Vec<String> {
    [
        "BTC", "ETH", "BNB", "XRP", "ADA", "SOL", "DOGE", "DOT", "MATIC", "AVAX", "LINK", "UNI",
        "ATOM", "LTC", "ETC", "XLM", "ALGO", "VET", "FIL", "AAVE",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
