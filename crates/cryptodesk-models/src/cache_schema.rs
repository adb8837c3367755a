use chrono::NaiveDate;

/// Table layout the external loader writes and the desk reads.
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS cache_entries (
///     key         TEXT PRIMARY KEY,
///     category    TEXT NOT NULL,
///     value_json  TEXT NOT NULL,
///     source      TEXT NOT NULL,
///     symbol      TEXT,
///     created_at  TEXT NOT NULL,
///     expires_at  TEXT NOT NULL,
///     updated_at  TEXT NOT NULL
/// );
/// ```
pub const CACHE_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS cache_entries (
    key         TEXT PRIMARY KEY,
    category    TEXT NOT NULL,
    value_json  TEXT NOT NULL,
    source      TEXT NOT NULL,
    symbol      TEXT,
    created_at  TEXT NOT NULL,
    expires_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_symbol ON cache_entries(symbol);
CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_entries(expires_at);
";

/// Key conventions for metric lookups.
///
/// - Point-in-time metric: `{metric}:{symbol}:{as_of}` (e.g. `news:BTC:2024-12-01`)
/// - Latest metric: `{metric}:{symbol}` (e.g. `social_sentiment:ETH`)
///
/// Readers try the dated key first and fall back to the latest one.
pub mod key_patterns {
    use chrono::NaiveDate;

    pub fn metric(metric: &str, symbol: &str) -> String {
        format!("{metric}:{symbol}")
    }

    pub fn dated_metric(metric: &str, symbol: &str, as_of: NaiveDate) -> String {
        format!("{metric}:{symbol}:{}", as_of.format("%Y-%m-%d"))
    }
}

/// Lookup order for a metric as of a date.
pub fn metric_lookup_keys(metric: &str, symbol: &str, as_of: NaiveDate) -> [String; 2] {
    [
        key_patterns::dated_metric(metric, symbol, as_of),
        key_patterns::metric(metric, symbol),
    ]
}

/// A raw cache row as read from SQLite.
#[derive(Debug, Clone)]
pub struct CacheRow {
    pub key: String,
    pub category: String,
    pub value_json: String,
    pub source: String,
    pub symbol: Option<String>,
    pub created_at: String,
    pub expires_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dated_key_first() {
        let as_of = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        assert_eq!(
            metric_lookup_keys("price_window", "BTC", as_of),
            [
                "price_window:BTC:2024-12-01".to_string(),
                "price_window:BTC".to_string()
            ]
        );
    }
}
