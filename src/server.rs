//! HTTP server setup and middleware.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::api;
use crate::config::AppConfig;
use crate::database::RunStore;
use crate::runner::JobRunner;
use crate::schedule::Schedule;
use crate::scheduler::{Scheduler, SystemClock};
use crate::AppState;

/// Create the application: load the schedule, open the store, wire the
/// runner and tick loop, and build the router with middleware.
///
/// The returned [`Scheduler`] is not yet running; the caller spawns its
/// `run()` loop and cancels `cancel` on shutdown.
pub async fn create_app(
    config: AppConfig,
    cancel: CancellationToken,
) -> Result<(Router, Scheduler)> {
    let schedule = Arc::new(
        Schedule::load(&config.schedule_path).with_context(|| {
            format!(
                "Failed to load schedule from {}",
                config.schedule_path.display()
            )
        })?,
    );
    tracing::info!(
        path = %config.schedule_path.display(),
        jobs = schedule.jobs.len(),
        "Schedule loaded"
    );

    let store = RunStore::open(&config.db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;
    tracing::info!(path = %config.db_path.display(), "Database ready");

    let clock = Arc::new(SystemClock);
    let runner = Arc::new(
        JobRunner::new(
            store.clone(),
            Arc::clone(&schedule),
            clock.clone(),
            cancel.clone(),
        )
        .with_suppressed_logs(config.suppress_logs),
    );
    let scheduler = Scheduler::new(
        Arc::clone(&schedule),
        Arc::clone(&runner),
        clock,
        cancel,
    );

    let state = AppState {
        config: Arc::new(config),
        schedule,
        store,
        runner,
    };

    let app = api::create_router()
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok((app, scheduler))
}
