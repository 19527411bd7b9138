//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Current schema revision recorded in `schema_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS executions (
            id INTEGER PRIMARY KEY,
            execution_id TEXT NOT NULL UNIQUE,
            job_id TEXT,
            job_name TEXT,
            project_name TEXT,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'unknown',
            permalink TEXT,
            options_json TEXT NOT NULL DEFAULT '{}',
            log_output TEXT,
            result_json TEXT,
            change_ref TEXT NOT NULL DEFAULT '',
            started_at TEXT NOT NULL,
            ended_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_executions_status_created ON executions(status, created_at);
        CREATE INDEX IF NOT EXISTS idx_executions_job ON executions(job_id);
        CREATE INDEX IF NOT EXISTS idx_executions_created ON executions(created_at);

        CREATE TABLE IF NOT EXISTS links (
            id INTEGER PRIMARY KEY,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            link TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (kind, name),
            UNIQUE (kind, link)
        );",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}
