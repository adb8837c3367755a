use async_trait::async_trait;
use chrono::NaiveDate;
use cryptodesk_models::ModelTier;

use crate::error::CollaboratorError;

/// A fully rendered prompt for one stage invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptContext {
    pub stage_id: String,
    pub tier: ModelTier,
    pub system: String,
    pub user: String,
}

/// Produces free text from a prompt. Mockable for testing.
#[async_trait]
pub trait ReasoningCollaborator: Send + Sync {
    async fn invoke(&self, prompt: &PromptContext) -> Result<String, CollaboratorError>;
}

/// Supplies market data for a subject as of a date. Mockable for testing.
///
/// `metric` is one of the names in [`crate::stage::analyst_metrics`]. A
/// `NotFound` error means there is no data, not that the source is down.
#[async_trait]
pub trait DataCollaborator: Send + Sync {
    async fn fetch(
        &self,
        subject: &str,
        as_of: NaiveDate,
        metric: &str,
    ) -> Result<serde_json::Value, CollaboratorError>;
}

/// Data collaborator with nothing to offer. Analysts reason from the prompt alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoData;

#[async_trait]
impl DataCollaborator for NoData {
    async fn fetch(
        &self,
        subject: &str,
        _as_of: NaiveDate,
        metric: &str,
    ) -> Result<serde_json::Value, CollaboratorError> {
        Err(CollaboratorError::not_found(format!("{metric}:{subject}")))
    }
}
