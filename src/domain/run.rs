//! Run records and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exit status recorded when a run succeeds.
pub const STATUS_OK: i32 = 0;
/// Exit status recorded on start failure or cancellation.
pub const STATUS_ERROR: i32 = -1;

/// One execution attempt of a job.
///
/// A run is created when the attempt starts, persisted immediately with a
/// null status (in flight), and persisted once more on completion. Retries
/// are distinct runs: they share `triggered_at` with the first attempt but
/// carry a `[retry=n]` suffix on `triggered_by`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    /// Database row id, filled in by the store on first insert.
    #[serde(rename = "id", skip_serializing_if = "Option::is_none")]
    pub log_entry_id: Option<i64>,
    /// Job name.
    pub name: String,
    /// Wall-clock instant the run was triggered (scheduler's notion of now).
    pub triggered_at: DateTime<Utc>,
    /// Provenance: `cron`, `manual`, `job[<parent>]`, or a `[retry=n]` form.
    pub triggered_by: String,
    /// Exit status. `None` while the run is in flight; `0` on success; the
    /// OS exit code otherwise; `-1` on start failure or cancellation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
    /// Accumulated captured output (stdout and stderr merged).
    #[serde(default)]
    pub log: String,
    /// Milliseconds from `triggered_at` to completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

impl JobRun {
    /// Create a fresh in-flight run.
    pub fn new(
        name: impl Into<String>,
        triggered_at: DateTime<Utc>,
        triggered_by: impl Into<String>,
    ) -> Self {
        Self {
            log_entry_id: None,
            name: name.into(),
            triggered_at,
            triggered_by: triggered_by.into(),
            status: None,
            log: String::new(),
            duration: None,
        }
    }

    /// Whether the run is still executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status.is_none()
    }

    /// Whether the run finished with exit status 0.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == Some(STATUS_OK)
    }

    /// Append a line to the captured log, keeping it newline-terminated.
    pub fn append_log(&mut self, text: &str) {
        if !self.log.is_empty() && !self.log.ends_with('\n') {
            self.log.push('\n');
        }
        self.log.push_str(text);
    }

    /// One-line summary used by chat webhooks.
    #[must_use]
    pub fn summary(&self) -> String {
        let outcome = match self.status {
            Some(STATUS_OK) => "succeeded",
            Some(_) => "failed",
            None => "running",
        };
        match (self.status, self.duration) {
            (Some(code), Some(ms)) => format!(
                "Job '{}' {} (status {}) in {} ms",
                self.name, outcome, code, ms
            ),
            (Some(code), None) => {
                format!("Job '{}' {} (status {})", self.name, outcome, code)
            }
            _ => format!("Job '{}' {}", self.name, outcome),
        }
    }
}
