//! tickd - a standalone cron-style job scheduler.
//!
//! One YAML document declares the full job set; a long-lived process
//! supervises child commands, records every run and captured output line
//! in SQLite, fans out downstream triggers and webhooks on completion,
//! and exposes the live fleet over HTTP with a bundled browser UI.
//!
//! # Architecture
//!
//! - [`schedule`]: the job set — specs, hooks, document loading
//! - [`scheduler`]: cron evaluation, the clock seam, and the tick loop
//! - [`runner`]: the per-run pipeline (spawn, capture, retry, fan-out)
//! - [`database`]: run and log-line persistence
//! - [`webhook`]: outgoing notification formats
//! - [`api`] / [`server`]: the HTTP surface and bundled UI
//!
//! # Example
//!
//! ```rust,ignore
//! use tickd::{config::AppConfig, server::create_app};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cancel = CancellationToken::new();
//!     let (app, scheduler) = create_app(AppConfig::default(), cancel).await?;
//!     tokio::spawn(async move { scheduler.run().await });
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8081").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod config;
pub mod database;
pub mod domain;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod server;
pub mod webhook;

use std::sync::Arc;

use config::AppConfig;
use database::RunStore;
use runner::JobRunner;
use schedule::Schedule;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// The immutable job set.
    pub schedule: Arc<Schedule>,
    /// Run and log-line store.
    pub store: RunStore,
    /// Execution pipeline used by manual triggers.
    pub runner: Arc<JobRunner>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("jobs", &self.schedule.jobs.len())
            .field("db_path", &self.config.db_path)
            .finish()
    }
}
