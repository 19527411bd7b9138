//! Job runner integration -- the Rundeck API as seen by opsdesk.
//!
//! [`JobRunner`] is the seam between the reconciler / HTTP handlers and the
//! external system; [`client::RundeckClient`] is the production implementation.

pub mod client;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::executions::{ExecutionStatus, StatusObservation};

pub use self::client::RundeckClient;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("runner request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The runner answered with a non-2xx status.
    #[error("runner API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("could not decode runner response: {0}")]
    Decode(String),

    #[error("runner response carried no execution id")]
    MissingExecutionId,

    #[error("API token contains characters not allowed in a header")]
    InvalidToken,

    #[error("invalid runner base URL: {0}")]
    InvalidBaseUrl(String),

    /// An id that cannot be used as a single URL path segment.
    #[error("invalid identifier '{0}'")]
    InvalidPathSegment(String),
}

/// Body of a job run request.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arg_string: Option<String>,
}

/// Job reference embedded in an execution payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
}

/// Execution payload returned by run and status calls.
///
/// Only the fields opsdesk acts on are typed; the rest is kept in `extra` so
/// handlers can pass the full payload through to the dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionInfo {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub job: Option<JobRef>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExecutionInfo {
    /// Translate this payload into the local status vocabulary.
    pub fn observation(&self) -> StatusObservation {
        let output = match &self.output {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };
        let result = self.result.clone().filter(|r| !r.is_null());

        StatusObservation {
            status: ExecutionStatus::from_runner(self.status.as_deref()),
            output,
            result,
        }
    }

    pub fn job_name(&self) -> Option<&str> {
        self.job.as_ref().and_then(|j| j.name.as_deref())
    }
}

/// One job definition in a project listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Rundeck reports execution ids as integers; opsdesk keys records by string.
fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Text(String),
        Number(i64),
    }

    Ok(Option::<IdRepr>::deserialize(deserializer)?.map(|id| match id {
        IdRepr::Text(s) => s,
        IdRepr::Number(n) => n.to_string(),
    }))
}

/// Trait for anything that can run jobs and report on their executions.
#[async_trait::async_trait]
pub trait JobRunner: Send + Sync {
    /// Start a run of `job_id`.
    async fn run_job(&self, job_id: &str, request: &JobRunRequest) -> Result<ExecutionInfo, RunnerError>;

    /// Current state of one execution.
    async fn execution(&self, execution_id: &str) -> Result<ExecutionInfo, RunnerError>;

    /// Jobs defined in `project`.
    async fn project_jobs(&self, project: &str) -> Result<Vec<JobSummary>, RunnerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_and_string_ids() {
        let info: ExecutionInfo = serde_json::from_value(json!({"id": 4411, "status": "running"})).unwrap();
        assert_eq!(info.id.as_deref(), Some("4411"));

        let info: ExecutionInfo = serde_json::from_value(json!({"id": "abc-1"})).unwrap();
        assert_eq!(info.id.as_deref(), Some("abc-1"));

        let info: ExecutionInfo = serde_json::from_value(json!({})).unwrap();
        assert!(info.id.is_none());
    }

    #[test]
    fn test_observation_from_payload() {
        let info: ExecutionInfo = serde_json::from_value(json!({
            "id": 12,
            "status": "succeeded",
            "output": "ok",
            "result": {"rc": 0},
            "date-started": {"date": "2024-05-01T08:00:00Z"}
        }))
        .unwrap();

        let obs = info.observation();
        assert_eq!(obs.status, ExecutionStatus::Succeeded);
        assert_eq!(obs.output.as_deref(), Some("ok"));
        assert_eq!(obs.result, Some(json!({"rc": 0})));
        assert!(info.extra.contains_key("date-started"));
    }

    #[test]
    fn test_missing_status_maps_to_unknown() {
        let info: ExecutionInfo = serde_json::from_value(json!({"id": 3, "output": null})).unwrap();
        let obs = info.observation();
        assert_eq!(obs.status, ExecutionStatus::Unknown);
        assert!(obs.output.is_none());
        assert!(obs.result.is_none());
    }

    #[test]
    fn test_structured_output_is_stringified() {
        let info: ExecutionInfo =
            serde_json::from_value(json!({"status": "running", "output": {"lines": ["a"]}})).unwrap();
        assert_eq!(info.observation().output.as_deref(), Some(r#"{"lines":["a"]}"#));
    }

    #[test]
    fn test_run_request_serialization() {
        let req = JobRunRequest {
            options: None,
            arg_string: Some("-machines \"a\"".to_string()),
        };
        assert_eq!(serde_json::to_value(&req).unwrap(), json!({"argString": "-machines \"a\""}));

        let mut opts = Map::new();
        opts.insert("env".to_string(), json!("prod"));
        let req = JobRunRequest {
            options: Some(opts),
            arg_string: None,
        };
        assert_eq!(serde_json::to_value(&req).unwrap(), json!({"options": {"env": "prod"}}));
    }
}
