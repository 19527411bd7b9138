//! API route definitions.

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::executions::{ExecutionFilter, ExecutionStatus, NewExecution};
use crate::forms::{self, ChangeRequestForm};
use crate::links::LinkKind;
use crate::reconcile::RecordOutcome;
use crate::runner::{JobRunRequest, RunnerError};

/// Hard cap on `limit` for saved-execution listings.
const MAX_LIST_LIMIT: usize = 500;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/rundeck", get(rundeck_links))
        .route("/dynatrace", get(dynatrace_links))
        .route("/rundeck/jobs/execute", post(run_job))
        .route("/rundeck/executions/{execution_id}", get(execution_status))
        .route("/rundeck/executions/{execution_id}/field", patch(patch_field))
        .route("/rundeck/executions/{execution_id}/change-ref", patch(set_change_ref))
        .route("/rundeck/projects/{project}/jobs", get(project_jobs))
        .route("/rundeck/saved-executions", get(saved_executions))
        .route("/rundeck/reconcile", post(reconcile_now))
        .route("/rundeck/form-submit", post(submit_form))
        .route("/rundeck/form-options", get(form_options))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339()
        }
    }))
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

async fn rundeck_links(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    list_links(&state, LinkKind::Rundeck)
}

async fn dynatrace_links(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    list_links(&state, LinkKind::Dynatrace)
}

fn list_links(state: &AppState, kind: LinkKind) -> ApiResult<Json<Value>> {
    let links = state.links.list(kind)?;
    Ok(Json(json!({ "data": links, "meta": { "total": links.len() } })))
}

// ---------------------------------------------------------------------------
// Jobs and executions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunJobBody {
    job_id: Option<String>,
    #[serde(default)]
    options: Option<Map<String, Value>>,
    job_name: Option<String>,
}

async fn run_job(State(state): State<AppState>, Json(body): Json<RunJobBody>) -> ApiResult<Json<Value>> {
    let job_id = body
        .job_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("jobId is required".to_string()))?
        .to_string();
    let options = body.options.unwrap_or_default();

    let request = JobRunRequest {
        options: Some(options.clone()),
        arg_string: None,
    };
    let execution = state.runner.run_job(&job_id, &request).await?;
    let execution_id = execution.id.clone().ok_or(RunnerError::MissingExecutionId)?;

    let job_name = body
        .job_name
        .filter(|n| !n.trim().is_empty())
        .or_else(|| execution.job_name().map(str::to_string))
        .unwrap_or_else(|| format!("Job {job_id}"));
    let description = execution
        .job_name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("Execution of job {job_id}"));
    let project_name = execution
        .project
        .clone()
        .or_else(|| execution.job.as_ref().and_then(|j| j.project.clone()));

    let record = state.store.insert(NewExecution {
        execution_id,
        job_id: Some(job_id),
        job_name: Some(job_name),
        project_name,
        description: Some(description),
        permalink: execution.permalink.clone(),
        options: Value::Object(options),
    })?;
    info!(execution_id = %record.execution_id, job_id = ?record.job_id, "Job submitted");

    Ok(Json(json!({
        "data": { "execution": execution, "record": record },
        "meta": { "message": "job submitted", "savedToDb": true }
    })))
}

async fn execution_status(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let execution = state.runner.execution(&execution_id).await?;
    let outcome = state.reconciler.apply_info(&execution_id, &execution)?;
    let record = state.store.find(&execution_id)?;

    Ok(Json(json!({
        "data": { "execution": execution, "record": record },
        "meta": {
            "savedToDb": outcome != RecordOutcome::NotTracked,
            "reconcile": outcome
        }
    })))
}

async fn project_jobs(State(state): State<AppState>, Path(project): Path<String>) -> ApiResult<Json<Value>> {
    let jobs = state.runner.project_jobs(&project).await?;
    Ok(Json(json!({ "data": jobs, "meta": { "total": jobs.len(), "project": project } })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedExecutionsQuery {
    job_id: Option<String>,
    status: Option<String>,
    limit: Option<usize>,
}

async fn saved_executions(
    State(state): State<AppState>,
    Query(query): Query<SavedExecutionsQuery>,
) -> ApiResult<Json<Value>> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<ExecutionStatus>())
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let filter = ExecutionFilter {
        job_id: query.job_id.filter(|j| !j.is_empty()),
        status,
        limit: query.limit.unwrap_or(100).clamp(1, MAX_LIST_LIMIT),
    };
    let executions = state.store.list(&filter)?;

    Ok(Json(json!({ "data": executions, "meta": { "total": executions.len() } })))
}

#[derive(Debug, Deserialize)]
struct PatchFieldBody {
    field: Option<String>,
    #[serde(default)]
    value: Value,
}

async fn patch_field(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    Json(body): Json<PatchFieldBody>,
) -> ApiResult<Json<Value>> {
    let field = body
        .field
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ApiError::BadRequest("field is required".to_string()))?;

    let record = state.store.patch_field(&execution_id, &field, &body.value)?;
    info!(%execution_id, %field, "Execution field updated");

    Ok(Json(json!({
        "data": record,
        "meta": { "message": format!("field {field} updated") }
    })))
}

#[derive(Debug, Deserialize)]
struct ChangeRefBody {
    value: Option<Value>,
}

async fn set_change_ref(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    Json(body): Json<ChangeRefBody>,
) -> ApiResult<Json<Value>> {
    let value = match body.value {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => return Err(ApiError::BadRequest("value must be a string".to_string())),
        None => return Err(ApiError::BadRequest("value is required".to_string())),
    };

    let record = state.store.set_change_ref(&execution_id, &value)?;
    info!(%execution_id, change_ref = %value, "Change reference updated");

    Ok(Json(json!({ "data": record })))
}

async fn reconcile_now(State(state): State<AppState>) -> Json<Value> {
    let report = state.reconciler.reconcile_once().await;
    Json(json!({ "data": report }))
}

// ---------------------------------------------------------------------------
// Change-request form
// ---------------------------------------------------------------------------

async fn submit_form(
    State(state): State<AppState>,
    Json(form): Json<ChangeRequestForm>,
) -> ApiResult<Json<Value>> {
    let request = form.validate()?;
    let job_id = request.job_id(&state.config.jobs).to_string();
    let arg_string = request.arg_string();
    info!(change_type = %request.change_type, machines = request.machines.len(), %job_id, "Change request validated");

    let execution = state
        .runner
        .run_job(
            &job_id,
            &JobRunRequest {
                options: None,
                arg_string: Some(arg_string.clone()),
            },
        )
        .await?;
    let execution_id = execution.id.clone().ok_or(RunnerError::MissingExecutionId)?;

    let record = state.store.insert(NewExecution {
        execution_id: execution_id.clone(),
        job_id: Some(job_id),
        job_name: Some(
            execution
                .job_name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} change", request.change_type)),
        ),
        project_name: execution.project.clone(),
        description: Some(format!(
            "{} change on {} machine(s)",
            request.change_type,
            request.machines.len()
        )),
        permalink: execution.permalink.clone(),
        options: request.record_options(),
    })?;

    Ok(Json(json!({
        "data": {
            "executionId": execution_id,
            "executionUrl": execution.permalink,
            "argString": arg_string,
            "record": record
        },
        "meta": { "message": "change request submitted" }
    })))
}

async fn form_options(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "data": forms::form_options(&state.config.form) }))
}
