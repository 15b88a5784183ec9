//! Whole-schedule endpoint.

use std::collections::BTreeMap;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::api::ApiError;
use crate::domain::JobRun;
use crate::schedule::{JobSpec, OnEvent};
use crate::AppState;

/// Runs attached per job in the schedule listing.
const RUNS_PER_JOB: usize = 10;

/// Create the schedule router.
pub fn router() -> Router<AppState> {
    Router::new().route("/schedule", get(get_schedule))
}

/// One job with its recent runs.
#[derive(Debug, Serialize)]
struct ScheduleJob {
    #[serde(flatten)]
    spec: JobSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_tick: Option<chrono::DateTime<chrono::Utc>>,
    runs: Vec<JobRun>,
}

/// The full schedule. Secrets in job environments serialize as `***`.
#[derive(Debug, Serialize)]
struct ScheduleResponse {
    jobs: BTreeMap<String, ScheduleJob>,
    #[serde(skip_serializing_if = "OnEvent::is_empty")]
    on_success: OnEvent,
    #[serde(skip_serializing_if = "OnEvent::is_empty")]
    on_error: OnEvent,
}

/// Get the full schedule with recent runs per job.
///
/// # Endpoint
///
/// `GET /schedule`
async fn get_schedule(State(state): State<AppState>) -> Result<Json<ScheduleResponse>, ApiError> {
    let mut jobs = BTreeMap::new();
    for (name, job) in &state.schedule.jobs {
        let runs = state
            .store
            .load_runs(name, RUNS_PER_JOB, false)
            .await
            .map_err(ApiError::internal)?;
        jobs.insert(
            name.clone(),
            ScheduleJob {
                spec: job.spec.clone(),
                next_tick: job.next_tick(),
                runs,
            },
        );
    }

    Ok(Json(ScheduleResponse {
        jobs,
        on_success: state.schedule.on_success.clone(),
        on_error: state.schedule.on_error.clone(),
    }))
}
