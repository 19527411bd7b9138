//! SQLite storage layer -- connection pool, schema, timestamp encoding.

pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)
        .with_context(|| format!("failed to open database {}", path.display()))?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Open a private in-memory database.
///
/// The pool holds a single connection so every checkout sees the same data.
pub fn open_memory_pool() -> Result<Pool> {
    let pool = R2D2Pool::builder()
        .max_size(1)
        .build(SqliteConnectionManager::memory())?;
    let conn = pool.get()?;
    schema::migrate(&conn)?;
    Ok(pool)
}

/// Encode a timestamp for storage. Millisecond precision with a `Z` suffix
/// keeps stored values lexicographically ordered.
pub fn to_db_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Decode a stored timestamp; `idx` is the column used for error reporting.
pub fn from_db_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_db_time_roundtrip_and_ordering() {
        let early = Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 0).unwrap();
        let late = early + chrono::Duration::milliseconds(1500);

        let a = to_db_time(early);
        let b = to_db_time(late);
        assert_eq!(a, "2024-03-01T09:05:00.000Z");
        assert!(a < b);
        assert_eq!(from_db_time(0, &b).unwrap(), late);
    }

    #[test]
    fn test_bad_db_time_is_conversion_error() {
        assert!(matches!(
            from_db_time(3, "yesterday"),
            Err(rusqlite::Error::FromSqlConversionFailure(3, _, _))
        ));
    }

    #[test]
    fn test_open_pool_creates_parent_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("opsdesk.db");
        let pool = open_pool(&path).unwrap();
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM executions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(path.exists());
    }
}
