use chrono::Utc;
use cryptodesk_models::cache_schema::{CacheRow, CACHE_TABLE_DDL};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row};

use crate::error::CacheError;

const SELECT_COLUMNS: &str =
    "SELECT key, category, value_json, source, symbol, created_at, expires_at, updated_at \
     FROM cache_entries";

/// SQLite accessor for the shared market-data cache.
///
/// The file is populated by an external loader; the desk only reads it.
pub struct SqliteReader {
    conn: Connection,
}

impl SqliteReader {
    /// Open a read-only connection to the shared cache database.
    pub fn open(path: &str) -> Result<Self, CacheError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Writable in-memory database with the schema applied. For tests and demos.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CACHE_TABLE_DDL)?;
        Ok(Self { conn })
    }

    /// Non-expired row for `key`, if any.
    pub fn get(&self, key: &str) -> Result<Option<CacheRow>, CacheError> {
        let now = Utc::now().to_rfc3339();
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{SELECT_COLUMNS} WHERE key = ?1 AND expires_at > ?2"))?;
        let row = stmt
            .query_row(rusqlite::params![key, now], map_row)
            .optional()?;
        Ok(row)
    }

    /// Count of non-expired rows for a symbol.
    #[cfg(test)]
    pub fn live_count(&self, symbol: &str) -> Result<u64, CacheError> {
        let now = Utc::now().to_rfc3339();
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE symbol = ?1 AND expires_at > ?2",
            rusqlite::params![symbol, now],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Insert or replace a row. The loader owns writes in production.
    pub fn insert(&self, row: &CacheRow) -> Result<(), CacheError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO cache_entries \
             (key, category, value_json, source, symbol, created_at, expires_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                row.key,
                row.category,
                row.value_json,
                row.source,
                row.symbol,
                row.created_at,
                row.expires_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<CacheRow> {
    Ok(CacheRow {
        key: row.get(0)?,
        category: row.get(1)?,
        value_json: row.get(2)?,
        source: row.get(3)?,
        symbol: row.get(4)?,
        created_at: row.get(5)?,
        expires_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
