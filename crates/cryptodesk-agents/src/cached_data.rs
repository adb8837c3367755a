use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use cryptodesk_cache::CacheReader;
use cryptodesk_models::cache_schema::metric_lookup_keys;
use cryptodesk_models::CollaboratorErrorKind;
use tracing::debug;

use crate::collaborator::DataCollaborator;
use crate::error::CollaboratorError;

/// Data collaborator reading the shared market-data cache.
///
/// Looks up `{metric}:{SUBJECT}:{date}` first and falls back to the undated
/// `{metric}:{SUBJECT}` key.
pub struct CacheDataCollaborator {
    cache: Arc<CacheReader>,
}

impl CacheDataCollaborator {
    pub fn new(cache: Arc<CacheReader>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl DataCollaborator for CacheDataCollaborator {
    async fn fetch(
        &self,
        subject: &str,
        as_of: NaiveDate,
        metric: &str,
    ) -> Result<serde_json::Value, CollaboratorError> {
        let keys = metric_lookup_keys(metric, subject, as_of);
        match self.cache.first_value(&keys).await {
            Ok(Some((key, value))) => {
                debug!(key, hot_entries = self.cache.hot_cache_size(), "Cache hit");
                Ok(value)
            }
            Ok(None) => Err(CollaboratorError::not_found(format!(
                "no cached {metric} for {subject}"
            ))),
            Err(e) => Err(CollaboratorError::new(
                CollaboratorErrorKind::Unavailable,
                e.to_string(),
            )),
        }
    }
}
