//! Per-job endpoints: detail, runs, manual trigger, log tailing.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::ApiError;
use crate::database::{LogLine, LATEST_RUN};
use crate::domain::JobRun;
use crate::runner;
use crate::schedule::{Job, JobSpec};
use crate::AppState;

/// Runs returned by the job detail endpoint.
const RECENT_RUNS: usize = 25;

/// Create the jobs router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs/{name}", get(get_job))
        .route("/jobs/{name}/trigger", post(trigger_job))
        .route("/jobs/{name}/runs/{id}", get(get_run))
        .route("/jobs/{name}/runs/{id}/logs", get(get_run_logs))
}

fn lookup_job(state: &AppState, name: &str) -> Result<Arc<Job>, ApiError> {
    state
        .schedule
        .get(name)
        .cloned()
        .ok_or_else(|| ApiError::not_found(format!("Job '{name}' not found")))
}

/// `latest` maps to the store's latest-run sentinel.
fn parse_run_id(raw: &str) -> Result<i64, ApiError> {
    if raw == "latest" {
        return Ok(LATEST_RUN);
    }
    raw.parse::<i64>()
        .map_err(|_| ApiError::bad_request(format!("Invalid run id '{raw}'")))
}

/// Job detail response.
#[derive(Debug, Serialize)]
struct JobResponse {
    #[serde(flatten)]
    spec: JobSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_tick: Option<chrono::DateTime<chrono::Utc>>,
    /// The job as configured, rendered back to YAML for the UI.
    yaml: String,
    runs: Vec<JobRun>,
}

/// Get one job with its most recent runs.
///
/// # Endpoint
///
/// `GET /jobs/{name}`
async fn get_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = lookup_job(&state, &name)?;
    let runs = state
        .store
        .load_runs(&name, RECENT_RUNS, false)
        .await
        .map_err(ApiError::internal)?;
    let yaml = job.spec.to_yaml().map_err(ApiError::internal)?;

    Ok(Json(JobResponse {
        spec: job.spec.clone(),
        next_tick: job.next_tick(),
        yaml,
        runs,
    }))
}

/// Synchronously execute a job and return the completed run.
///
/// The run honors the job's serialization lock and the full retry and
/// fan-out pipeline; the response arrives only after downstream triggers
/// and webhooks have settled.
///
/// # Endpoint
///
/// `POST /jobs/{name}/trigger`
async fn trigger_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<JobRun>, ApiError> {
    let job = lookup_job(&state, &name)?;
    let run = runner::trigger_job(&state.runner, &job, "manual").await;
    Ok(Json(run))
}

/// Get one run; `id` is a row id or `latest`.
///
/// # Endpoint
///
/// `GET /jobs/{name}/runs/{id}`
async fn get_run(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Json<JobRun>, ApiError> {
    lookup_job(&state, &name)?;
    let id = parse_run_id(&id)?;
    let run = load_named_run(&state, &name, id).await?;
    Ok(Json(run))
}

/// Query for the log tail endpoint.
#[derive(Debug, Deserialize)]
struct LogsQuery {
    /// Return lines with `line_number` strictly greater than this cursor.
    #[serde(default)]
    after: i64,
}

/// Log lines response, shaped for polling tails.
#[derive(Debug, Serialize)]
struct LogLinesResponse {
    run_id: i64,
    lines: Vec<LogLine>,
}

/// Tail a run's captured output.
///
/// # Endpoint
///
/// `GET /jobs/{name}/runs/{id}/logs?after={n}`
async fn get_run_logs(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogLinesResponse>, ApiError> {
    lookup_job(&state, &name)?;
    let id = parse_run_id(&id)?;
    let run = load_named_run(&state, &name, id).await?;

    let run_id = run
        .log_entry_id
        .ok_or_else(|| ApiError::internal("Run has no database id"))?;
    let lines = state
        .store
        .get_log_lines(run_id, query.after)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(LogLinesResponse { run_id, lines }))
}

/// Load a run and make sure it belongs to the named job.
async fn load_named_run(state: &AppState, name: &str, id: i64) -> Result<JobRun, ApiError> {
    let run = state
        .store
        .load_run(name, id)
        .await
        .map_err(|_| ApiError::not_found(format!("No run {id} for job '{name}'")))?;
    if run.name != name {
        return Err(ApiError::not_found(format!("No run {id} for job '{name}'")));
    }
    Ok(run)
}
