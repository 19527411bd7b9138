//! Execution records -- the local copy of every job run submitted to Rundeck.
//!
//! A record is created when a job is submitted and afterwards only changes
//! through reconciliation or an administrative field edit. Terminal statuses
//! (`succeeded`, `failed`, `aborted`) are absorbing: reconciliation never moves
//! a record out of them and sets `ended_at` exactly once.

pub mod store;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::store::{ExecutionFilter, ExecutionStore, StoreError};

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
    Unknown,
}

impl ExecutionStatus {
    /// Statuses the reconciliation loop still polls.
    pub const RECONCILABLE: [ExecutionStatus; 2] = [ExecutionStatus::Running, ExecutionStatus::Unknown];

    pub const TERMINAL: [ExecutionStatus; 3] = [
        ExecutionStatus::Succeeded,
        ExecutionStatus::Failed,
        ExecutionStatus::Aborted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Aborted => "aborted",
            ExecutionStatus::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    /// Map Rundeck's status vocabulary onto the local enumeration.
    ///
    /// A missing status and anything not listed here become `Unknown`, which
    /// is never terminal.
    pub fn from_runner(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("running") => ExecutionStatus::Running,
            Some("succeeded") => ExecutionStatus::Succeeded,
            Some("failed") | Some("failed-with-retry") | Some("timedout") => ExecutionStatus::Failed,
            Some("aborted") => ExecutionStatus::Aborted,
            _ => ExecutionStatus::Unknown,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized execution status '{0}'")]
pub struct ParseStatusError(pub String);

impl FromStr for ExecutionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "succeeded" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            "aborted" => Ok(ExecutionStatus::Aborted),
            "unknown" => Ok(ExecutionStatus::Unknown),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// A stored execution record, serialized in the shape the dashboard reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub job_id: Option<String>,
    pub job_name: Option<String>,
    pub project_name: Option<String>,
    pub description: Option<String>,
    pub status: ExecutionStatus,
    pub permalink: Option<String>,
    /// Parameters the job was submitted with.
    pub options: serde_json::Value,
    pub log_output: Option<String>,
    pub result: Option<serde_json::Value>,
    /// Change-management ticket reference attached by an operator.
    pub change_ref: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when a freshly submitted execution is recorded.
#[derive(Debug, Clone, Default)]
pub struct NewExecution {
    pub execution_id: String,
    pub job_id: Option<String>,
    pub job_name: Option<String>,
    pub project_name: Option<String>,
    pub description: Option<String>,
    pub permalink: Option<String>,
    pub options: serde_json::Value,
}

/// What the runner currently reports for one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusObservation {
    pub status: ExecutionStatus,
    pub output: Option<String>,
    pub result: Option<serde_json::Value>,
}

/// Effect of applying an observation to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The record already holds everything the runner reported.
    Unchanged,
    Updated {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
    /// The record is terminal; the observation was ignored.
    AlreadyTerminal,
}

impl ExecutionRecord {
    /// Fold a runner observation into this record.
    pub fn apply_observation(&mut self, obs: &StatusObservation, now: DateTime<Utc>) -> Transition {
        if self.status.is_terminal() {
            return Transition::AlreadyTerminal;
        }

        let from = self.status;
        let mut changed = false;

        if obs.status != self.status {
            self.status = obs.status;
            changed = true;
        }

        if self.status.is_terminal() && self.ended_at.is_none() {
            self.ended_at = Some(now);
            changed = true;
        }

        if let Some(output) = &obs.output {
            if self.log_output.as_ref() != Some(output) {
                self.log_output = Some(output.clone());
                changed = true;
            }
        }

        if let Some(result) = &obs.result {
            if self.result.as_ref() != Some(result) {
                self.result = Some(result.clone());
                changed = true;
            }
        }

        if changed {
            self.updated_at = now;
            Transition::Updated { from, to: self.status }
        } else {
            Transition::Unchanged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(status: ExecutionStatus) -> ExecutionRecord {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        ExecutionRecord {
            execution_id: "E1".to_string(),
            job_id: Some("job-1".to_string()),
            job_name: None,
            project_name: None,
            description: None,
            status,
            permalink: None,
            options: serde_json::json!({}),
            log_output: None,
            result: None,
            change_ref: String::new(),
            started_at: t,
            ended_at: None,
            created_at: t,
            updated_at: t,
        }
    }

    fn observed(status: ExecutionStatus) -> StatusObservation {
        StatusObservation {
            status,
            output: None,
            result: None,
        }
    }

    #[test]
    fn test_runner_vocabulary_mapping() {
        assert_eq!(ExecutionStatus::from_runner(Some("running")), ExecutionStatus::Running);
        assert_eq!(ExecutionStatus::from_runner(Some("succeeded")), ExecutionStatus::Succeeded);
        assert_eq!(ExecutionStatus::from_runner(Some("SUCCEEDED")), ExecutionStatus::Succeeded);
        assert_eq!(ExecutionStatus::from_runner(Some("failed")), ExecutionStatus::Failed);
        assert_eq!(ExecutionStatus::from_runner(Some("timedout")), ExecutionStatus::Failed);
        assert_eq!(ExecutionStatus::from_runner(Some("aborted")), ExecutionStatus::Aborted);
        assert_eq!(ExecutionStatus::from_runner(Some("scheduled")), ExecutionStatus::Unknown);
        assert_eq!(ExecutionStatus::from_runner(Some("other")), ExecutionStatus::Unknown);
        assert_eq!(ExecutionStatus::from_runner(None), ExecutionStatus::Unknown);
    }

    #[test]
    fn test_unrecognized_values_never_terminal() {
        for raw in ["", "queued", "missed", "weird", "succeeded!"] {
            let status = ExecutionStatus::from_runner(Some(raw));
            assert!(!status.is_terminal(), "{raw} mapped to terminal {status}");
        }
    }

    #[test]
    fn test_status_string_roundtrip() {
        for s in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Succeeded,
            ExecutionStatus::Failed,
            ExecutionStatus::Aborted,
            ExecutionStatus::Unknown,
        ] {
            assert_eq!(s.as_str().parse::<ExecutionStatus>(), Ok(s));
        }
        assert!("done".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_running_to_succeeded_sets_end_and_output() {
        let now = Utc::now();
        let mut rec = record(ExecutionStatus::Running);
        let obs = StatusObservation {
            status: ExecutionStatus::Succeeded,
            output: Some("ok".to_string()),
            result: None,
        };

        let t = rec.apply_observation(&obs, now);

        assert_eq!(
            t,
            Transition::Updated {
                from: ExecutionStatus::Running,
                to: ExecutionStatus::Succeeded
            }
        );
        assert_eq!(rec.status, ExecutionStatus::Succeeded);
        assert_eq!(rec.ended_at, Some(now));
        assert_eq!(rec.log_output.as_deref(), Some("ok"));
        assert_eq!(rec.updated_at, now);
    }

    #[test]
    fn test_terminal_records_are_absorbing() {
        let mut rec = record(ExecutionStatus::Succeeded);
        let t0 = rec.created_at;
        rec.ended_at = Some(t0);
        let before = rec.clone();

        let t = rec.apply_observation(&observed(ExecutionStatus::Running), Utc::now());

        assert_eq!(t, Transition::AlreadyTerminal);
        assert_eq!(rec, before);
    }

    #[test]
    fn test_running_to_unknown_then_failed() {
        let mut rec = record(ExecutionStatus::Running);

        let t = rec.apply_observation(&observed(ExecutionStatus::Unknown), Utc::now());
        assert!(matches!(t, Transition::Updated { to: ExecutionStatus::Unknown, .. }));
        assert!(rec.ended_at.is_none());

        let later = Utc::now();
        rec.apply_observation(&observed(ExecutionStatus::Failed), later);
        assert_eq!(rec.status, ExecutionStatus::Failed);
        assert_eq!(rec.ended_at, Some(later));
    }

    #[test]
    fn test_same_status_is_unchanged() {
        let mut rec = record(ExecutionStatus::Running);
        let before = rec.clone();
        assert_eq!(
            rec.apply_observation(&observed(ExecutionStatus::Running), Utc::now()),
            Transition::Unchanged
        );
        assert_eq!(rec, before);
    }

    #[test]
    fn test_result_stored_while_running() {
        let mut rec = record(ExecutionStatus::Running);
        let obs = StatusObservation {
            status: ExecutionStatus::Running,
            output: None,
            result: Some(serde_json::json!({"progress": 40})),
        };
        assert!(matches!(rec.apply_observation(&obs, Utc::now()), Transition::Updated { .. }));
        assert_eq!(rec.result, Some(serde_json::json!({"progress": 40})));
        assert!(rec.ended_at.is_none());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let rec = record(ExecutionStatus::Running);
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["executionId"], "E1");
        assert_eq!(json["status"], "running");
        assert!(json["endedAt"].is_null());
        assert_eq!(json["changeRef"], "");
    }
}
