use std::time::Duration;

use async_trait::async_trait;
use cryptodesk_models::{CollaboratorErrorKind, LlmConfig, ModelTier};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::collaborator::{PromptContext, ReasoningCollaborator};
use crate::error::CollaboratorError;

/// Configuration for a Claude CLI invocation.
#[derive(Debug, Clone)]
pub struct ClaudeCliConfig {
    pub model: String,
    pub timeout: Duration,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-haiku-latest".to_string(),
            timeout: Duration::from_secs(90),
        }
    }
}

/// Invoke the `claude` CLI with a system prompt and user prompt.
/// Returns the raw stdout text.
pub async fn invoke_claude(
    system_prompt: &str,
    user_prompt: &str,
    config: &ClaudeCliConfig,
) -> Result<String, CollaboratorError> {
    debug!(model = %config.model, "Invoking claude CLI");

    let result = tokio::time::timeout(config.timeout, async {
        Command::new("claude")
            .args([
                "-p",
                user_prompt,
                "--system-prompt",
                system_prompt,
                "--model",
                &config.model,
                "--output-format",
                "text",
            ])
            .kill_on_drop(true)
            .output()
            .await
    })
    .await
    .map_err(|_| {
        CollaboratorError::new(
            CollaboratorErrorKind::Timeout,
            format!("claude timed out after {} seconds", config.timeout.as_secs()),
        )
    })?
    .map_err(|e| {
        CollaboratorError::new(
            CollaboratorErrorKind::Unavailable,
            format!("failed to spawn claude: {e}"),
        )
    })?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        warn!(status = %result.status, stderr = %stderr, "Claude CLI failed");
        return Err(CollaboratorError::new(
            classify_failure(&stderr),
            format!("claude exited {}: {}", result.status, stderr.trim()),
        ));
    }

    let stdout = String::from_utf8_lossy(&result.stdout).to_string();
    if stdout.trim().is_empty() {
        return Err(CollaboratorError::new(
            CollaboratorErrorKind::InvalidResponse,
            "claude returned an empty response",
        ));
    }

    Ok(stdout)
}

/// Map CLI stderr to an error class. Anything unrecognized is treated as an outage.
pub fn classify_failure(stderr: &str) -> CollaboratorErrorKind {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("rate limit") || lower.contains("429") || lower.contains("overloaded") {
        CollaboratorErrorKind::RateLimited
    } else {
        CollaboratorErrorKind::Unavailable
    }
}

/// Check if the `claude` CLI is available on the system.
pub async fn check_cli_available() -> bool {
    match Command::new("claude").arg("--version").output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

/// Reasoning collaborator backed by the Claude CLI, with one model per tier.
pub struct ClaudeCliReasoner {
    quick: ClaudeCliConfig,
    deep: ClaudeCliConfig,
}

impl ClaudeCliReasoner {
    pub fn new(quick: ClaudeCliConfig, deep: ClaudeCliConfig) -> Self {
        Self { quick, deep }
    }

    pub fn config_for(&self, tier: ModelTier) -> &ClaudeCliConfig {
        match tier {
            ModelTier::Quick => &self.quick,
            ModelTier::Deep => &self.deep,
        }
    }
}

impl From<&LlmConfig> for ClaudeCliReasoner {
    fn from(config: &LlmConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_seconds);
        Self::new(
            ClaudeCliConfig {
                model: config.quick_think_model.clone(),
                timeout,
            },
            ClaudeCliConfig {
                model: config.deep_think_model.clone(),
                timeout,
            },
        )
    }
}

#[async_trait]
impl ReasoningCollaborator for ClaudeCliReasoner {
    async fn invoke(&self, prompt: &PromptContext) -> Result<String, CollaboratorError> {
        let config = self.config_for(prompt.tier);
        debug!(stage = %prompt.stage_id, model = %config.model, "Reasoning");
        invoke_claude(&prompt.system, &prompt.user, config).await
    }
}
