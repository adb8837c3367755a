use moka::future::Cache;
use std::time::Duration;

/// In-memory hot tier backed by moka. Entries expire after the TTL.
pub struct MemoryCache {
    inner: Cache<String, String>,
}

impl MemoryCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: String, value: String) {
        self.inner.insert(key, value).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Flush moka's pending maintenance so counts reflect recent writes.
    #[cfg(test)]
    pub async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_get() {
        let cache = MemoryCache::new(100, Duration::from_secs(60));
        cache
            .insert("news:BTC".to_string(), "[]".to_string())
            .await;
        assert_eq!(cache.get("news:BTC").await, Some("[]".to_string()));
        assert_eq!(cache.get("news:ETH").await, None);
    }

    #[tokio::test]
    async fn ttl_expiration() {
        let cache = MemoryCache::new(100, Duration::from_millis(50));
        cache
            .insert("price_window:SOL".to_string(), "{}".to_string())
            .await;
        assert!(cache.get("price_window:SOL").await.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.get("price_window:SOL").await.is_none());
    }
}
