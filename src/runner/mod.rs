//! The per-job run pipeline: setup → spawn → capture → retry → finalize →
//! fan-out.
//!
//! [`JobRunner`] carries everything an execution needs: the store, the
//! schedule handle (for downstream trigger resolution), the clock, the
//! shared HTTP client for webhooks, and the root cancellation token.
//! Every trigger path (tick loop, manual HTTP trigger, downstream fan-out,
//! one-off CLI invocation) goes through [`JobRunner::exec_with_retry`].

pub mod exec;
pub mod fanout;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::database::RunStore;
use crate::domain::JobRun;
use crate::schedule::{Job, Schedule};
use crate::scheduler::SharedClock;

/// Pause between attempts of a failing job.
const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Shared execution context for all run pipelines.
pub struct JobRunner {
    store: RunStore,
    schedule: Arc<Schedule>,
    clock: SharedClock,
    http: reqwest::Client,
    cancel: CancellationToken,
    suppress_logs: bool,
    retry_backoff: Duration,
}

impl JobRunner {
    /// Create a runner bound to the given store, schedule, and root
    /// cancellation token.
    #[must_use]
    pub fn new(
        store: RunStore,
        schedule: Arc<Schedule>,
        clock: SharedClock,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            schedule,
            clock,
            http: reqwest::Client::new(),
            cancel,
            suppress_logs: false,
            retry_backoff: RETRY_BACKOFF,
        }
    }

    /// Stop mirroring child output to the scheduler's own stdout.
    /// Persistence is unaffected.
    #[must_use]
    pub fn with_suppressed_logs(mut self, suppress: bool) -> Self {
        self.suppress_logs = suppress;
        self
    }

    /// Override the retry back-off; tests compress it.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// The schedule this runner executes against.
    #[must_use]
    pub fn schedule(&self) -> &Arc<Schedule> {
        &self.schedule
    }

    /// The root cancellation token supervising every run.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn store(&self) -> &RunStore {
        &self.store
    }

    pub(crate) fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn suppress_logs(&self) -> bool {
        self.suppress_logs
    }

    pub(crate) fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }

    /// Create the in-flight run record and persist it immediately so the
    /// job shows up as started.
    pub(crate) async fn setup(&self, job: &Job, trigger: &str) -> JobRun {
        let mut run = JobRun::new(job.name(), self.clock.now(), trigger);
        self.persist(&mut run).await;
        run
    }

    /// Best-effort upsert. A run that cannot be persisted still executes;
    /// the failure is logged and the HTTP API simply will not list it.
    pub(crate) async fn persist(&self, run: &mut JobRun) {
        match self.store.upsert_run(run).await {
            Ok(id) => run.log_entry_id = Some(id),
            Err(e) => {
                tracing::warn!(job = run.name.as_str(), error = %e, "Couldn't save run to db");
            }
        }
    }
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("jobs", &self.schedule.jobs.len())
            .field("suppress_logs", &self.suppress_logs)
            .finish()
    }
}

/// Convenience used by the manual-trigger API handler and the one-off CLI
/// path: honor the job's serialization lock, then run the full pipeline.
pub async fn trigger_job(runner: &Arc<JobRunner>, job: &Arc<Job>, trigger: &str) -> JobRun {
    let _guard = job.serialize_execution().await;
    Arc::clone(runner)
        .exec_with_retry(Arc::clone(job), trigger.to_string())
        .await
}
