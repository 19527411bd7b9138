//! REST client for the Rundeck HTTP API, built on [`reqwest`].

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{ExecutionInfo, JobRunRequest, JobRunner, JobSummary, RunnerError};
use crate::config::RunnerConfig;

const AUTH_HEADER: &str = "X-Rundeck-Auth-Token";

/// HTTP client for one Rundeck instance.
pub struct RundeckClient {
    client: reqwest::Client,
    base_url: Url,
}

impl RundeckClient {
    /// Build a client from the runner configuration.
    ///
    /// The auth token and `Accept: application/json` are sent on every request.
    pub fn new(config: &RunnerConfig) -> Result<Self, RunnerError> {
        let mut headers = HeaderMap::new();
        let mut token = HeaderValue::from_str(&config.api_token).map_err(|_| RunnerError::InvalidToken)?;
        token.set_sensitive(true);
        headers.insert(AUTH_HEADER, token);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let base_url = Url::parse(config.base_url.trim())
            .map_err(|e| RunnerError::InvalidBaseUrl(format!("{}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(RunnerError::InvalidBaseUrl(config.base_url.clone()));
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client, base_url })
    }

    /// API URL for `segments`, each one percent-encoded as a single path
    /// segment so ids can never escape their endpoint.
    fn url(&self, segments: &[&str]) -> Result<Url, RunnerError> {
        if let Some(bad) = segments.iter().find(|s| matches!(**s, "" | "." | "..")) {
            return Err(RunnerError::InvalidPathSegment(bad.to_string()));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RunnerError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Check the status code and decode the JSON body.
    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RunnerError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RunnerError::Api {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| RunnerError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl JobRunner for RundeckClient {
    async fn run_job(&self, job_id: &str, request: &JobRunRequest) -> Result<ExecutionInfo, RunnerError> {
        debug!(%job_id, "submitting job run");
        let response = self
            .client
            .post(self.url(&["job", job_id, "run"])?)
            .json(request)
            .send()
            .await?;

        let info: ExecutionInfo = Self::parse_response(response).await?;
        if info.id.is_none() {
            return Err(RunnerError::MissingExecutionId);
        }
        Ok(info)
    }

    async fn execution(&self, execution_id: &str) -> Result<ExecutionInfo, RunnerError> {
        let response = self
            .client
            .get(self.url(&["execution", execution_id])?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn project_jobs(&self, project: &str) -> Result<Vec<JobSummary>, RunnerError> {
        let response = self
            .client
            .get(self.url(&["project", project, "jobs"])?)
            .send()
            .await?;

        Self::parse_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> RunnerConfig {
        RunnerConfig {
            base_url: base_url.to_string(),
            api_token: "tok".to_string(),
            request_timeout_secs: 5,
        }
    }

    #[test]
    fn test_url_joining() {
        let client = RundeckClient::new(&config("http://rd:4440/api/41/")).unwrap();
        assert_eq!(client.url(&["execution", "7"]).unwrap().as_str(), "http://rd:4440/api/41/execution/7");

        let client = RundeckClient::new(&config("http://rd:4440/api/41")).unwrap();
        assert_eq!(client.url(&["job", "x", "run"]).unwrap().as_str(), "http://rd:4440/api/41/job/x/run");
    }

    #[test]
    fn test_ids_stay_inside_their_segment() {
        let client = RundeckClient::new(&config("http://rd:4440/api/41")).unwrap();
        let url = client.url(&["job", "../system/executions/disable?", "run"]).unwrap();
        assert_eq!(url.path(), "/api/41/job/..%2Fsystem%2Fexecutions%2Fdisable%3F/run");
        assert_eq!(url.query(), None);

        let url = client.url(&["project", "ops#frag", "jobs"]).unwrap();
        assert_eq!(url.path(), "/api/41/project/ops%23frag/jobs");
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_dot_segments_rejected() {
        let client = RundeckClient::new(&config("http://rd:4440/api/41")).unwrap();
        for bad in ["..", ".", ""] {
            assert!(matches!(
                client.url(&["execution", bad]),
                Err(RunnerError::InvalidPathSegment(_))
            ));
        }
    }

    #[test]
    fn test_bad_base_url_rejected() {
        assert!(matches!(
            RundeckClient::new(&config("not a url")),
            Err(RunnerError::InvalidBaseUrl(_))
        ));
        assert!(matches!(
            RundeckClient::new(&config("mailto:ops@example.com")),
            Err(RunnerError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn test_token_with_newline_is_rejected() {
        let mut cfg = config("http://rd");
        cfg.api_token = "bad\ntoken".to_string();
        assert!(matches!(RundeckClient::new(&cfg), Err(RunnerError::InvalidToken)));
    }
}
