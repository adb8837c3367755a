use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

use crate::error::CacheError;
use crate::memory::MemoryCache;
use crate::sqlite::SqliteReader;

/// Read-through cache: moka (hot) → SQLite (shared) → miss.
///
/// SQLite hits are promoted to the hot tier. `rusqlite::Connection` is not
/// `Sync`, so SQLite access goes through a `Mutex`.
pub struct CacheReader {
    memory: MemoryCache,
    sqlite: Mutex<SqliteReader>,
}

impl CacheReader {
    pub fn new(sqlite: SqliteReader, max_capacity: u64, memory_ttl: Duration) -> Self {
        Self {
            memory: MemoryCache::new(max_capacity, memory_ttl),
            sqlite: Mutex::new(sqlite),
        }
    }

    /// Raw JSON text for a key.
    pub async fn get_json(&self, key: &str) -> Result<Option<String>, CacheError> {
        if let Some(json) = self.memory.get(key).await {
            return Ok(Some(json));
        }

        let row = {
            let sqlite = self
                .sqlite
                .lock()
                .map_err(|e| CacheError::Unavailable(format!("SQLite mutex poisoned: {e}")))?;
            sqlite.get(key)?
        };

        match row {
            Some(row) => {
                debug!(key, source = %row.source, "Promoting cache row to memory");
                self.memory
                    .insert(key.to_string(), row.value_json.clone())
                    .await;
                Ok(Some(row.value_json))
            }
            None => Ok(None),
        }
    }

    /// Parsed value of the first key (in order) that is present.
    pub async fn first_value(
        &self,
        keys: &[String],
    ) -> Result<Option<(String, serde_json::Value)>, CacheError> {
        for key in keys {
            if let Some(json) = self.get_json(key).await? {
                let value = serde_json::from_str(&json).map_err(|source| CacheError::Json {
                    key: key.clone(),
                    source,
                })?;
                return Ok(Some((key.clone(), value)));
            }
        }
        Ok(None)
    }

    pub fn hot_cache_size(&self) -> u64 {
        self.memory.entry_count()
    }
}
