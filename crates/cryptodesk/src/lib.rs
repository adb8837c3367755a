//! cryptodesk - a multi-stage crypto research and trading desk
//!
//! Runs a subject through five phases (analysts, research debate, trader,
//! risk deliberation, portfolio decision) over a shared state, with Claude
//! CLI stages and a shared cache of market data.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use cryptodesk::agents::{Orchestrator, RunOutcome};
//! use cryptodesk::models::{DeskConfig, OrchestrationConfig};
//! use cryptodesk::cache::{CacheReader, SqliteReader};
//! ```

pub use cryptodesk_agents as agents;
pub use cryptodesk_cache as cache;
pub use cryptodesk_models as models;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cryptodesk_agents::{
    CacheDataCollaborator, ClaudeCliReasoner, DataCollaborator, NoData, Orchestrator, RetryPolicy,
};
use cryptodesk_cache::{CacheReader, SqliteReader};
use cryptodesk_models::DeskConfig;
use tracing::{info, warn};

/// Read a TOML configuration file. Missing sections fall back to defaults.
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<DeskConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let config: DeskConfig = toml::from_str(&raw)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    Ok(config)
}

/// Build an Orchestrator from configuration.
///
/// Stages reason through the Claude CLI. Market data comes from the shared
/// SQLite cache; when the cache file does not exist, analysts run without data.
pub fn build_orchestrator(config: &DeskConfig) -> anyhow::Result<Orchestrator> {
    config.retry.validate()?;

    let data: Arc<dyn DataCollaborator> = if Path::new(&config.cache.sqlite_path).exists() {
        let sqlite = SqliteReader::open(&config.cache.sqlite_path)
            .with_context(|| format!("Failed to open cache: {}", config.cache.sqlite_path))?;
        let cache = Arc::new(CacheReader::new(
            sqlite,
            config.cache.memory_max_capacity,
            Duration::from_secs(config.cache.memory_ttl_seconds),
        ));
        info!(path = %config.cache.sqlite_path, "Using market-data cache");
        Arc::new(CacheDataCollaborator::new(cache))
    } else {
        warn!(
            path = %config.cache.sqlite_path,
            "Cache file not found, analysts will run without market data"
        );
        Arc::new(NoData)
    };

    let orchestrator = Orchestrator::builder(config.orchestration.clone())
        .reasoner(Arc::new(ClaudeCliReasoner::from(&config.llm)))
        .data(data)
        .retry(RetryPolicy::from(&config.retry))
        .build()?;
    Ok(orchestrator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptodesk_models::{AnalystKind, ConfigError, RiskKind};
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let file = write_config(
            r#"
[orchestration]
enabled_analysts = ["market", "news"]
max_debate_rounds = 2

[llm]
deep_think_model = "claude-opus-4-1"
quick_think_model = "claude-3-5-haiku-latest"
timeout_seconds = 120
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(
            config.orchestration.enabled_analysts,
            vec![AnalystKind::Market, AnalystKind::News]
        );
        assert_eq!(config.orchestration.max_debate_rounds, 2);
        assert_eq!(config.orchestration.max_risk_rounds, 1);
        assert_eq!(
            config.orchestration.enabled_risk_perspectives,
            RiskKind::ALL.to_vec()
        );
        assert_eq!(config.llm.timeout_seconds, 120);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_config("/nonexistent/cryptodesk.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn builds_without_a_cache_file() {
        let mut config = DeskConfig::default();
        config.cache.sqlite_path = "/nonexistent/cache.db".to_string();
        let orchestrator = build_orchestrator(&config).unwrap();
        assert_eq!(orchestrator.config().max_debate_rounds, 1);
    }

    #[test]
    fn out_of_range_rounds_fail_the_build() {
        let mut config = DeskConfig::default();
        config.cache.sqlite_path = "/nonexistent/cache.db".to_string();
        config.orchestration.max_risk_rounds = 9;
        let err = build_orchestrator(&config).err().unwrap();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::RoundsOutOfRange {
                name: "max_risk_rounds",
                value: 9
            })
        );
    }
}
