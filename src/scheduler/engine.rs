//! The tick loop.
//!
//! One task owns scheduling: it sleeps until the earliest next tick,
//! fires every due job on a supervised task, recomputes next ticks, and
//! repeats. Shutdown cancels the root token (which kills children and
//! wakes retry back-offs) and then drains outstanding firings.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::runner::JobRunner;
use crate::schedule::Schedule;
use crate::scheduler::SharedClock;

/// Sleep cap when no job has a next tick; keeps the loop responsive to
/// cancellation without busy-waiting.
const IDLE_SLEEP: Duration = Duration::from_secs(3600);

/// The scheduling engine.
pub struct Scheduler {
    schedule: Arc<Schedule>,
    runner: Arc<JobRunner>,
    clock: SharedClock,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Scheduler {
    /// Create a scheduler over the given schedule and runner. Every job's
    /// next tick is seeded from the current clock reading.
    #[must_use]
    pub fn new(
        schedule: Arc<Schedule>,
        runner: Arc<JobRunner>,
        clock: SharedClock,
        cancel: CancellationToken,
    ) -> Self {
        schedule.initialize_ticks(clock.now());
        Self {
            schedule,
            runner,
            clock,
            cancel,
            tracker: TaskTracker::new(),
        }
    }

    /// Fire every job whose next tick has arrived; returns how many fired.
    ///
    /// A due job with `disable_concurrent_execution` whose lock is held is
    /// skipped: the running instance satisfies the tick. Skipped or fired,
    /// the next tick is recomputed from `now` with the reference excluded
    /// so the same instant never re-fires.
    pub fn tick(&self, now: DateTime<Utc>) -> usize {
        let mut fired = 0;

        for job in self.schedule.jobs.values() {
            let Some(tick) = job.next_tick() else { continue };
            if tick > now {
                continue;
            }

            match job.try_serialize_execution() {
                None => {
                    tracing::debug!(
                        job = job.name(),
                        "Skipping firing; previous run still executing"
                    );
                }
                Some(guard) => {
                    fired += 1;
                    let runner = Arc::clone(&self.runner);
                    let target = Arc::clone(job);
                    self.tracker.spawn(async move {
                        let _guard = guard;
                        runner.exec_with_retry(target, "cron".to_string()).await;
                    });
                }
            }

            job.set_next_tick(now, false);
        }

        fired
    }

    /// Run the tick loop until cancellation, then drain.
    pub async fn run(&self) {
        let cron_jobs = self
            .schedule
            .jobs
            .values()
            .filter(|j| j.has_cron())
            .count();
        tracing::info!(
            jobs = self.schedule.jobs.len(),
            cron_jobs,
            "Scheduler started"
        );

        loop {
            let sleep_for = self.time_to_next_tick();
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(sleep_for) => {}
            }
            self.tick(self.clock.now());
        }

        tracing::info!("Scheduler stopping; draining in-flight runs");
        self.drain().await;
        tracing::info!("Scheduler drained");
    }

    /// Wait for every supervised firing spawned so far to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    fn time_to_next_tick(&self) -> Duration {
        let next = self
            .schedule
            .jobs
            .values()
            .filter_map(|job| job.next_tick())
            .min();
        match next {
            Some(tick) => (tick - self.clock.now()).to_std().unwrap_or(Duration::ZERO),
            None => IDLE_SLEEP,
        }
    }
}
