//! The schedule: the full set of jobs plus schedule-global hooks.
//!
//! The document is parsed once at startup; the job map is immutable for
//! the process lifetime. Each [`JobSpec`] is wrapped in a runtime [`Job`]
//! carrying the parsed cron expression, the next-tick cell, and the
//! per-job execution lock.

pub mod job;

pub use job::{JobSpec, OnEvent, Secret};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::scheduler::cron::CronExpression;

/// Errors raised while loading or validating a schedule document.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("cannot read schedule file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("schedule document is not valid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("cron string for job '{job}' not valid: {reason}")]
    InvalidCron { job: String, reason: String },
    #[error("job '{job}' has no command")]
    EmptyCommand { job: String },
}

/// Raw document shape, before validation.
#[derive(Debug, Deserialize)]
struct ScheduleDoc {
    #[serde(default)]
    jobs: BTreeMap<String, JobSpec>,
    #[serde(default)]
    on_success: OnEvent,
    #[serde(default)]
    on_error: OnEvent,
}

/// A job plus its runtime state.
#[derive(Debug)]
pub struct Job {
    /// The declared specification.
    pub spec: JobSpec,
    /// Parsed cron expression, when one is configured.
    cron: Option<CronExpression>,
    /// Next scheduled firing, maintained by the tick loop.
    next_tick: RwLock<Option<DateTime<Utc>>>,
    /// Exclusive execution lock, honored when
    /// `disable_concurrent_execution` is set.
    exec_lock: Arc<Mutex<()>>,
}

impl Job {
    /// Validate a spec and wrap it with runtime state.
    fn new(name: &str, mut spec: JobSpec) -> Result<Self, ScheduleError> {
        spec.name = name.to_string();
        if spec.command.is_empty() {
            return Err(ScheduleError::EmptyCommand {
                job: name.to_string(),
            });
        }
        let cron = spec.parsed_cron()?;
        Ok(Self {
            spec,
            cron,
            next_tick: RwLock::new(None),
            exec_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Whether the job has a schedule at all.
    #[must_use]
    pub fn has_cron(&self) -> bool {
        self.cron.is_some()
    }

    /// Compute and store the next firing time from the given reference.
    ///
    /// A job without a cron expression is left unscheduled. A cron that
    /// matches no instant within the scan horizon clears the next tick.
    pub fn set_next_tick(&self, ref_time: DateTime<Utc>, include_ref_time: bool) {
        if let Some(cron) = &self.cron {
            *self.next_tick.write() = cron.next_after(&ref_time, include_ref_time);
        }
    }

    /// Next scheduled firing, if any.
    #[must_use]
    pub fn next_tick(&self) -> Option<DateTime<Utc>> {
        *self.next_tick.read()
    }

    /// Acquire the execution lock if the job requires serialization.
    ///
    /// Jobs without `disable_concurrent_execution` return `None`
    /// immediately; overlapping runs are allowed for them.
    pub async fn serialize_execution(&self) -> Option<OwnedMutexGuard<()>> {
        if self.spec.disable_concurrent_execution {
            Some(Arc::clone(&self.exec_lock).lock_owned().await)
        } else {
            None
        }
    }

    /// Try to take the execution lock without waiting; used by the tick
    /// loop to skip firings while a serialized run is in flight.
    pub fn try_serialize_execution(&self) -> Option<Option<OwnedMutexGuard<()>>> {
        if self.spec.disable_concurrent_execution {
            match Arc::clone(&self.exec_lock).try_lock_owned() {
                Ok(guard) => Some(Some(guard)),
                Err(_) => None,
            }
        } else {
            Some(None)
        }
    }
}

/// The full job set with schedule-global hooks.
#[derive(Debug)]
pub struct Schedule {
    /// Jobs by name.
    pub jobs: BTreeMap<String, Arc<Job>>,
    /// Hooks applied to every job's success, in addition to its own.
    pub on_success: OnEvent,
    /// Hooks applied to every job's error, in addition to its own.
    pub on_error: OnEvent,
}

impl Schedule {
    /// Parse and validate a schedule document.
    ///
    /// Invalid cron strings and empty commands are fatal here; unresolved
    /// downstream job names are only warned about (they are dropped again
    /// at dispatch time).
    pub fn from_yaml(text: &str) -> Result<Self, ScheduleError> {
        let doc: ScheduleDoc = serde_yaml::from_str(text)?;

        let mut jobs = BTreeMap::new();
        for (name, spec) in doc.jobs {
            let job = Job::new(&name, spec)?;
            jobs.insert(name, Arc::new(job));
        }

        let schedule = Self {
            jobs,
            on_success: doc.on_success,
            on_error: doc.on_error,
        };
        schedule.warn_unresolved_triggers();
        Ok(schedule)
    }

    /// Load a schedule document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScheduleError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ScheduleError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Look up a job by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<Job>> {
        self.jobs.get(name)
    }

    /// Seed every job's next tick from the given instant.
    pub fn initialize_ticks(&self, now: DateTime<Utc>) {
        for job in self.jobs.values() {
            job.set_next_tick(now, false);
            if let Some(tick) = job.next_tick() {
                tracing::debug!(job = job.name(), next_tick = %tick, "Next tick computed");
            }
        }
    }

    fn warn_unresolved_triggers(&self) {
        let hook_sets = self
            .jobs
            .values()
            .flat_map(|job| [(&job.spec.on_success, job.name()), (&job.spec.on_error, job.name())])
            .chain([(&self.on_success, "<global>"), (&self.on_error, "<global>")]);
        for (hooks, owner) in hook_sets {
            for target in &hooks.trigger_job {
                if !self.jobs.contains_key(target) {
                    tracing::warn!(
                        job = owner,
                        target = target.as_str(),
                        "Downstream trigger refers to an unknown job; it will be skipped"
                    );
                }
            }
        }
    }
}
