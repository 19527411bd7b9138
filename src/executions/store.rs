//! SQLite-backed store for execution records.

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde_json::Value;
use thiserror::Error;

use super::{ExecutionRecord, ExecutionStatus, NewExecution};
use crate::storage::{from_db_time, to_db_time, Pool};

const SELECT_COLUMNS: &str = "execution_id, job_id, job_name, project_name, description, status, \
     permalink, options_json, log_output, result_json, change_ref, started_at, ended_at, \
     created_at, updated_at";

/// Fields an administrator may never edit.
const PROTECTED_FIELDS: [&str; 5] = ["id", "_id", "executionId", "createdAt", "updatedAt"];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("execution {0} already exists")]
    Duplicate(String),

    #[error("execution {0} not found")]
    NotFound(String),

    #[error("field '{0}' is protected and cannot be modified")]
    ProtectedField(String),

    #[error("field '{0}' does not exist")]
    UnknownField(String),

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Query filter for listing records.
#[derive(Debug, Clone)]
pub struct ExecutionFilter {
    pub job_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub limit: usize,
}

impl Default for ExecutionFilter {
    fn default() -> Self {
        Self {
            job_id: None,
            status: None,
            limit: 100,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Text { nullable: bool },
    Status,
    Json { nullable: bool },
    Time { nullable: bool },
}

/// Map an API field name to its column. `cambiochg` is accepted as an alias
/// for `changeRef`.
fn editable_field(field: &str) -> Option<(&'static str, FieldKind)> {
    let entry = match field {
        "jobId" => ("job_id", FieldKind::Text { nullable: true }),
        "jobName" => ("job_name", FieldKind::Text { nullable: true }),
        "projectName" => ("project_name", FieldKind::Text { nullable: true }),
        "description" => ("description", FieldKind::Text { nullable: true }),
        "permalink" => ("permalink", FieldKind::Text { nullable: true }),
        "logOutput" => ("log_output", FieldKind::Text { nullable: true }),
        "changeRef" | "cambiochg" => ("change_ref", FieldKind::Text { nullable: false }),
        "status" => ("status", FieldKind::Status),
        "options" => ("options_json", FieldKind::Json { nullable: false }),
        "result" => ("result_json", FieldKind::Json { nullable: true }),
        "startedAt" => ("started_at", FieldKind::Time { nullable: false }),
        "endedAt" => ("ended_at", FieldKind::Time { nullable: true }),
        _ => return None,
    };
    Some(entry)
}

fn to_sql_value(field: &str, kind: FieldKind, value: &Value) -> Result<SqlValue, StoreError> {
    let invalid = |reason: &str| StoreError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    };

    match (kind, value) {
        (FieldKind::Text { nullable: true }, Value::Null)
        | (FieldKind::Json { nullable: true }, Value::Null)
        | (FieldKind::Time { nullable: true }, Value::Null) => Ok(SqlValue::Null),
        (FieldKind::Text { nullable: false }, Value::Null) => Ok(SqlValue::Text(String::new())),
        (FieldKind::Json { nullable: false }, Value::Null) => Err(invalid("must not be null")),
        (FieldKind::Text { .. }, Value::String(s)) => Ok(SqlValue::Text(s.clone())),
        (FieldKind::Text { .. }, Value::Number(n)) => Ok(SqlValue::Text(n.to_string())),
        (FieldKind::Text { .. }, _) => Err(invalid("expected a string")),
        (FieldKind::Status, Value::String(s)) => s
            .parse::<ExecutionStatus>()
            .map(|st| SqlValue::Text(st.as_str().to_string()))
            .map_err(|e| invalid(&e.to_string())),
        (FieldKind::Status, _) => Err(invalid("expected a status string")),
        (FieldKind::Json { .. }, v) => Ok(SqlValue::Text(serde_json::to_string(v)?)),
        (FieldKind::Time { .. }, Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| SqlValue::Text(to_db_time(dt.with_timezone(&Utc))))
            .map_err(|e| invalid(&e.to_string())),
        (FieldKind::Time { .. }, _) => Err(invalid("expected an RFC 3339 timestamp")),
    }
}

fn parse_json_column(idx: usize, raw: &str) -> rusqlite::Result<Value> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let status_raw: String = row.get(5)?;
    let options_raw: String = row.get(7)?;
    let result_raw: Option<String> = row.get(9)?;
    let ended_raw: Option<String> = row.get(12)?;

    Ok(ExecutionRecord {
        execution_id: row.get(0)?,
        job_id: row.get(1)?,
        job_name: row.get(2)?,
        project_name: row.get(3)?,
        description: row.get(4)?,
        status: status_raw.parse::<ExecutionStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?,
        permalink: row.get(6)?,
        options: parse_json_column(7, &options_raw)?,
        log_output: row.get(8)?,
        result: result_raw.map(|r| parse_json_column(9, &r)).transpose()?,
        change_ref: row.get(10)?,
        started_at: from_db_time(11, &row.get::<_, String>(11)?)?,
        ended_at: ended_raw.map(|e| from_db_time(12, &e)).transpose()?,
        created_at: from_db_time(13, &row.get::<_, String>(13)?)?,
        updated_at: from_db_time(14, &row.get::<_, String>(14)?)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Record store over the `executions` table.
#[derive(Clone)]
pub struct ExecutionStore {
    pool: Pool,
}

impl ExecutionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Record a newly submitted execution with status `running`.
    pub fn insert(&self, new: NewExecution) -> Result<ExecutionRecord, StoreError> {
        self.insert_at(new, Utc::now())
    }

    /// Same as [`insert`](Self::insert) with an explicit creation time.
    pub fn insert_at(&self, new: NewExecution, now: DateTime<Utc>) -> Result<ExecutionRecord, StoreError> {
        let conn = self.pool.get()?;
        let ts = to_db_time(now);
        let options = if new.options.is_null() {
            Value::Object(Default::default())
        } else {
            new.options
        };
        let options_json = serde_json::to_string(&options)?;

        let inserted = conn.execute(
            "INSERT INTO executions (
                execution_id, job_id, job_name, project_name, description, status,
                permalink, options_json, started_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?9)",
            params![
                new.execution_id,
                new.job_id,
                new.job_name,
                new.project_name,
                new.description,
                ExecutionStatus::Running.as_str(),
                new.permalink,
                options_json,
                ts,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(StoreError::Duplicate(new.execution_id)),
            Err(e) => return Err(e.into()),
        }

        Ok(ExecutionRecord {
            execution_id: new.execution_id,
            job_id: new.job_id,
            job_name: new.job_name,
            project_name: new.project_name,
            description: new.description,
            status: ExecutionStatus::Running,
            permalink: new.permalink,
            options,
            log_output: None,
            result: None,
            change_ref: String::new(),
            started_at: now,
            ended_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Look up one record by execution id.
    pub fn find(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {SELECT_COLUMNS} FROM executions WHERE execution_id = ?1");
        let record = conn
            .query_row(&sql, params![execution_id], row_to_record)
            .optional()?;
        Ok(record)
    }

    /// List records, newest first.
    pub fn list(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionRecord>, StoreError> {
        let conn = self.pool.get()?;

        let mut clauses = Vec::new();
        let mut args: Vec<SqlValue> = Vec::new();
        if let Some(job_id) = &filter.job_id {
            args.push(SqlValue::Text(job_id.clone()));
            clauses.push(format!("job_id = ?{}", args.len()));
        }
        if let Some(status) = filter.status {
            args.push(SqlValue::Text(status.as_str().to_string()));
            clauses.push(format!("status = ?{}", args.len()));
        }
        args.push(SqlValue::Integer(filter.limit as i64));
        let limit_idx = args.len();

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM executions {where_sql} \
             ORDER BY created_at DESC, id DESC LIMIT ?{limit_idx}"
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), row_to_record)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Records still in flight (`running` or `unknown`) created at or after `since`.
    pub fn list_pending_reconciliation(&self, since: DateTime<Utc>) -> Result<Vec<ExecutionRecord>, StoreError> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM executions \
             WHERE status IN (?1, ?2) AND created_at >= ?3 \
             ORDER BY created_at ASC"
        );
        let [a, b] = ExecutionStatus::RECONCILABLE;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![a.as_str(), b.as_str(), to_db_time(since)], row_to_record)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Persist the reconciled fields of `record`.
    ///
    /// The write only lands while the stored row is non-terminal, and an
    /// already-set `ended_at` is kept. Returns `false` when nothing changed
    /// (row missing or already terminal).
    pub fn save_reconciled(&self, record: &ExecutionRecord) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let result_json = record.result.as_ref().map(serde_json::to_string).transpose()?;
        let [t1, t2, t3] = ExecutionStatus::TERMINAL;

        let changed = conn.execute(
            "UPDATE executions SET
                status = ?1,
                ended_at = COALESCE(ended_at, ?2),
                log_output = ?3,
                result_json = ?4,
                updated_at = ?5
             WHERE execution_id = ?6 AND status NOT IN (?7, ?8, ?9)",
            params![
                record.status.as_str(),
                record.ended_at.map(to_db_time),
                record.log_output,
                result_json,
                to_db_time(record.updated_at),
                record.execution_id,
                t1.as_str(),
                t2.as_str(),
                t3.as_str(),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Administrative edit of a single field. Always bumps `updated_at`.
    pub fn patch_field(&self, execution_id: &str, field: &str, value: &Value) -> Result<ExecutionRecord, StoreError> {
        if PROTECTED_FIELDS.contains(&field) {
            return Err(StoreError::ProtectedField(field.to_string()));
        }
        let (column, kind) =
            editable_field(field).ok_or_else(|| StoreError::UnknownField(field.to_string()))?;
        let sql_value = to_sql_value(field, kind, value)?;

        {
            let conn = self.pool.get()?;
            // `column` comes from the static whitelist above.
            let sql = format!("UPDATE executions SET {column} = ?1, updated_at = ?2 WHERE execution_id = ?3");
            let changed = conn.execute(&sql, params![sql_value, to_db_time(Utc::now()), execution_id])?;
            if changed == 0 {
                return Err(StoreError::NotFound(execution_id.to_string()));
            }
        }

        self.find(execution_id)?
            .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))
    }

    /// Attach a change-management reference to a record.
    pub fn set_change_ref(&self, execution_id: &str, value: &str) -> Result<ExecutionRecord, StoreError> {
        self.patch_field(execution_id, "changeRef", &Value::String(value.to_string()))
    }
}
