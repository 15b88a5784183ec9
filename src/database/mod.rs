//! Run and log-line persistence.
//!
//! Two tables back the whole system: `runs` holds one row per execution
//! attempt (unique on `(job, triggered_at, triggered_by)`), and
//! `log_lines` holds the captured output line by line for live tailing.
//!
//! # Thread safety
//!
//! All operations run on the blocking thread pool via
//! `tokio::task::spawn_blocking` with a per-call connection, so the store
//! is safe for concurrent async access. Storage failures bubble to the
//! caller; the run pipeline logs them and keeps executing.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tokio::task;

use crate::domain::JobRun;

/// Sentinel run id meaning "the latest run of the job".
pub const LATEST_RUN: i64 = -1;

/// A single captured output line of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    /// Row id.
    pub id: i64,
    /// Owning run row id.
    pub job_run_id: i64,
    /// 1-based position within the run; dense and strictly increasing.
    pub line_number: i64,
    /// RFC3339 capture timestamp.
    pub timestamp: String,
    /// Line content without the trailing newline.
    pub content: String,
    /// `stdout` or `stderr`.
    pub stream: String,
}

/// SQLite-backed store for runs and their log lines.
#[derive(Debug, Clone)]
pub struct RunStore {
    db_path: PathBuf,
}

impl RunStore {
    /// Open (or create) the store and migrate its schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be created.
    pub async fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let store = Self {
            db_path: path.into(),
        };
        store.migrate().await?;
        Ok(store)
    }

    fn connect(path: &PathBuf) -> Result<Connection> {
        let conn = Connection::open(path).context("Failed to open database")?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Ok(conn)
    }

    /// Create tables and indices, and purge legacy duplicate runs.
    async fn migrate(&self) -> Result<()> {
        let db_path = self.db_path.clone();

        task::spawn_blocking(move || -> Result<()> {
            let conn = Self::connect(&db_path)?;

            conn.execute(
                r"
                CREATE TABLE IF NOT EXISTS runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job TEXT,
                    triggered_at TEXT,
                    triggered_by TEXT,
                    duration INTEGER,
                    status INTEGER,
                    message TEXT,
                    is_running INTEGER DEFAULT 0,
                    UNIQUE(job, triggered_at, triggered_by)
                )
                ",
                [],
            )
            .context("Failed to create runs table")?;

            // Older databases predate the is_running column; adding it again
            // fails harmlessly.
            let _ = conn.execute("ALTER TABLE runs ADD COLUMN is_running INTEGER DEFAULT 0", []);

            conn.execute(
                r"
                CREATE TABLE IF NOT EXISTS log_lines (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_run_id INTEGER NOT NULL,
                    line_number INTEGER NOT NULL,
                    timestamp TEXT NOT NULL,
                    content TEXT NOT NULL,
                    stream TEXT NOT NULL,
                    FOREIGN KEY (job_run_id) REFERENCES runs(id),
                    UNIQUE(job_run_id, line_number)
                )
                ",
                [],
            )
            .context("Failed to create log_lines table")?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_log_lines_job_run_id ON log_lines(job_run_id)",
                [],
            )
            .context("Failed to create log_lines index")?;

            // One-shot cleanup of rows written before the unique constraint
            // existed: keep the lowest id per key.
            conn.execute(
                r"
                DELETE FROM runs
                WHERE id NOT IN (
                    SELECT MIN(id)
                    FROM runs
                    GROUP BY job, triggered_at, triggered_by
                )
                ",
                [],
            )
            .context("Failed to purge duplicate runs")?;

            Ok(())
        })
        .await
        .context("Failed to spawn blocking task")??;

        Ok(())
    }

    /// Insert or update a run by its `(job, triggered_at, triggered_by)`
    /// key and return the row id.
    ///
    /// `is_running` is derived from the status: a run with no status yet is
    /// still executing.
    pub async fn upsert_run(&self, run: &JobRun) -> Result<i64> {
        let db_path = self.db_path.clone();
        let known_id = run.log_entry_id;
        let job = run.name.clone();
        let triggered_at = format_ts(run.triggered_at);
        let triggered_by = run.triggered_by.clone();
        let duration = run.duration;
        let status = run.status;
        let message = run.log.clone();
        let is_running = i32::from(run.is_running());

        task::spawn_blocking(move || -> Result<i64> {
            let conn = Self::connect(&db_path)?;

            conn.execute(
                r"
                INSERT INTO runs (job, triggered_at, triggered_by, duration, status, message, is_running)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(job, triggered_at, triggered_by) DO UPDATE SET
                    duration = excluded.duration,
                    status = excluded.status,
                    message = excluded.message,
                    is_running = excluded.is_running
                ",
                params![job, triggered_at, triggered_by, duration, status, message, is_running],
            )
            .context("Failed to upsert run")?;

            if let Some(id) = known_id {
                return Ok(id);
            }

            // A fresh connection per call means last_insert_rowid is only
            // set when this statement actually inserted.
            let last = conn.last_insert_rowid();
            if last > 0 {
                return Ok(last);
            }

            conn.query_row(
                "SELECT id FROM runs WHERE job = ?1 AND triggered_at = ?2 AND triggered_by = ?3",
                params![job, triggered_at, triggered_by],
                |row| row.get(0),
            )
            .context("Failed to resolve run id")
        })
        .await
        .context("Failed to spawn blocking task")?
    }

    /// Append one captured output line.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate `(job_run_id, line_number)`; the executor is
    /// the only writer and assigns line numbers monotonically, so a
    /// violation reveals caller misuse.
    pub async fn insert_log_line(
        &self,
        job_run_id: i64,
        line_number: i64,
        timestamp: DateTime<Utc>,
        content: String,
        stream: &'static str,
    ) -> Result<()> {
        let db_path = self.db_path.clone();
        let timestamp = timestamp.to_rfc3339();

        task::spawn_blocking(move || -> Result<()> {
            let conn = Self::connect(&db_path)?;
            conn.execute(
                r"
                INSERT INTO log_lines (job_run_id, line_number, timestamp, content, stream)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
                params![job_run_id, line_number, timestamp, content, stream],
            )
            .context("Failed to insert log line")?;
            Ok(())
        })
        .await
        .context("Failed to spawn blocking task")?
    }

    /// Fetch log lines with `line_number` strictly greater than the cursor,
    /// in order. Unknown run ids yield an empty list.
    pub async fn get_log_lines(&self, job_run_id: i64, after_line_number: i64) -> Result<Vec<LogLine>> {
        let db_path = self.db_path.clone();

        task::spawn_blocking(move || -> Result<Vec<LogLine>> {
            let conn = Self::connect(&db_path)?;
            let mut stmt = conn.prepare(
                r"
                SELECT id, job_run_id, line_number, timestamp, content, stream
                FROM log_lines
                WHERE job_run_id = ?1 AND line_number > ?2
                ORDER BY line_number ASC
                ",
            )?;

            let lines = stmt
                .query_map(params![job_run_id, after_line_number], |row| {
                    Ok(LogLine {
                        id: row.get(0)?,
                        job_run_id: row.get(1)?,
                        line_number: row.get(2)?,
                        timestamp: row.get(3)?,
                        content: row.get(4)?,
                        stream: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(lines)
        })
        .await
        .context("Failed to spawn blocking task")?
    }

    /// Load a single run by row id, or the latest run for the job when
    /// `id` is [`LATEST_RUN`].
    ///
    /// # Errors
    ///
    /// Fails when no matching run exists.
    pub async fn load_run(&self, job_name: &str, id: i64) -> Result<JobRun> {
        let db_path = self.db_path.clone();
        let job_name = job_name.to_string();

        task::spawn_blocking(move || -> Result<JobRun> {
            let conn = Self::connect(&db_path)?;

            let run = if id == LATEST_RUN {
                conn.query_row(
                    r"
                    SELECT id, job, triggered_at, triggered_by, duration, status, message
                    FROM runs
                    WHERE job = ?1
                    ORDER BY triggered_at DESC, id DESC
                    LIMIT 1
                    ",
                    params![job_name],
                    row_to_run,
                )
                .optional()?
            } else {
                conn.query_row(
                    r"
                    SELECT id, job, triggered_at, triggered_by, duration, status, message
                    FROM runs
                    WHERE id = ?1
                    ",
                    params![id],
                    row_to_run,
                )
                .optional()?
            };

            run.with_context(|| format!("No run found for job '{job_name}' (id {id})"))
        })
        .await
        .context("Failed to spawn blocking task")?
    }

    /// Load the most recent runs for a job, newest first.
    ///
    /// With `include_logs` false the message column is left out of the
    /// projection so index listings stay cheap.
    pub async fn load_runs(
        &self,
        job_name: &str,
        limit: usize,
        include_logs: bool,
    ) -> Result<Vec<JobRun>> {
        let db_path = self.db_path.clone();
        let job_name = job_name.to_string();

        task::spawn_blocking(move || -> Result<Vec<JobRun>> {
            let conn = Self::connect(&db_path)?;

            let query = if include_logs {
                r"
                SELECT id, job, triggered_at, triggered_by, duration, status, message
                FROM runs
                WHERE job = ?1
                ORDER BY triggered_at DESC, id DESC
                LIMIT ?2
                "
            } else {
                r"
                SELECT id, job, triggered_at, triggered_by, duration, status, ''
                FROM runs
                WHERE job = ?1
                ORDER BY triggered_at DESC, id DESC
                LIMIT ?2
                "
            };

            let mut stmt = conn.prepare(query)?;
            let runs = stmt
                .query_map(params![job_name, limit as i64], row_to_run)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(runs)
        })
        .await
        .context("Failed to spawn blocking task")?
    }
}

/// RFC3339 with millisecond precision; equal instants format identically,
/// which the `(job, triggered_at, triggered_by)` key relies on.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<JobRun> {
    let triggered_at_raw: String = row.get(2)?;
    let triggered_at = DateTime::parse_from_rfc3339(&triggered_at_raw)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?
        .with_timezone(&Utc);

    Ok(JobRun {
        log_entry_id: Some(row.get(0)?),
        name: row.get(1)?,
        triggered_at,
        triggered_by: row.get(3)?,
        duration: row.get(4)?,
        status: row.get(5)?,
        log: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    async fn create_test_store() -> (RunStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RunStore::open(dir.path().join("tickd.db")).await.unwrap();
        (store, dir)
    }

    fn sample_run(triggered_by: &str) -> JobRun {
        JobRun::new(
            "backup",
            Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap(),
            triggered_by,
        )
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tickd.db");
        RunStore::open(&path).await.unwrap();
        RunStore::open(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let (store, _dir) = create_test_store().await;

        let mut run = sample_run("manual");
        let id = store.upsert_run(&run).await.unwrap();
        assert!(id > 0);
        run.log_entry_id = Some(id);

        let loaded = store.load_run("backup", id).await.unwrap();
        assert!(loaded.is_running());

        run.status = Some(0);
        run.duration = Some(42);
        run.log = "done\n".to_string();
        let same_id = store.upsert_run(&run).await.unwrap();
        assert_eq!(same_id, id);

        let loaded = store.load_run("backup", id).await.unwrap();
        assert_eq!(loaded.status, Some(0));
        assert_eq!(loaded.duration, Some(42));
        assert_eq!(loaded.log, "done\n");
    }

    #[tokio::test]
    async fn test_retry_rows_are_distinct() {
        let (store, _dir) = create_test_store().await;

        let first = store.upsert_run(&sample_run("manual")).await.unwrap();
        let retry = store
            .upsert_run(&sample_run("manual[retry=1]"))
            .await
            .unwrap();
        assert_ne!(first, retry);
    }

    #[tokio::test]
    async fn test_upsert_resolves_id_without_insert() {
        let (store, _dir) = create_test_store().await;

        let run = sample_run("cron");
        let id = store.upsert_run(&run).await.unwrap();
        // Same key, id not carried over: upsert takes the conflict path and
        // must look the id up.
        let resolved = store.upsert_run(&run).await.unwrap();
        assert_eq!(resolved, id);
    }

    #[tokio::test]
    async fn test_log_lines_cursor() {
        let (store, _dir) = create_test_store().await;
        let id = store.upsert_run(&sample_run("manual")).await.unwrap();

        for n in 1..=5i64 {
            store
                .insert_log_line(id, n, Utc::now(), format!("line {n}"), "stdout")
                .await
                .unwrap();
        }

        let all = store.get_log_lines(id, 0).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(
            all.iter().map(|l| l.line_number).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );

        let tail = store.get_log_lines(id, 3).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "line 4");

        assert!(store.get_log_lines(id, 5).await.unwrap().is_empty());
        assert!(store.get_log_lines(9999, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_line_number_rejected() {
        let (store, _dir) = create_test_store().await;
        let id = store.upsert_run(&sample_run("manual")).await.unwrap();

        store
            .insert_log_line(id, 1, Utc::now(), "once".into(), "stdout")
            .await
            .unwrap();
        assert!(store
            .insert_log_line(id, 1, Utc::now(), "twice".into(), "stderr")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_load_latest_run_sentinel() {
        let (store, _dir) = create_test_store().await;

        let mut early = sample_run("cron");
        early.status = Some(0);
        store.upsert_run(&early).await.unwrap();

        let mut late = sample_run("manual");
        late.triggered_at = early.triggered_at + chrono::Duration::minutes(5);
        late.status = Some(2);
        store.upsert_run(&late).await.unwrap();

        let latest = store.load_run("backup", LATEST_RUN).await.unwrap();
        assert_eq!(latest.triggered_by, "manual");
        assert_eq!(latest.status, Some(2));

        assert!(store.load_run("unknown", LATEST_RUN).await.is_err());
    }

    #[tokio::test]
    async fn test_load_runs_projection() {
        let (store, _dir) = create_test_store().await;

        for i in 0..3 {
            let mut run = sample_run("cron");
            run.triggered_at += chrono::Duration::minutes(i);
            run.status = Some(0);
            run.log = "output\n".to_string();
            store.upsert_run(&run).await.unwrap();
        }

        let with_logs = store.load_runs("backup", 10, true).await.unwrap();
        assert_eq!(with_logs.len(), 3);
        assert!(with_logs.iter().all(|r| r.log == "output\n"));
        // Newest first.
        assert!(with_logs[0].triggered_at > with_logs[2].triggered_at);

        let without_logs = store.load_runs("backup", 2, false).await.unwrap();
        assert_eq!(without_logs.len(), 2);
        assert!(without_logs.iter().all(|r| r.log.is_empty()));
    }

    #[tokio::test]
    async fn test_legacy_duplicates_purged_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tickd.db");

        // Seed a pre-constraint table with duplicate keys.
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                r"
                CREATE TABLE runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job TEXT,
                    triggered_at TEXT,
                    triggered_by TEXT,
                    duration INTEGER,
                    status INTEGER,
                    message TEXT,
                    is_running INTEGER DEFAULT 0
                )
                ",
                [],
            )
            .unwrap();
            for _ in 0..3 {
                conn.execute(
                    "INSERT INTO runs (job, triggered_at, triggered_by)
                     VALUES ('a', '2026-01-01T00:00:00.000Z', 'cron')",
                    [],
                )
                .unwrap();
            }
        }

        let store = RunStore::open(&path).await.unwrap();
        let runs = store.load_runs("a", 10, false).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].log_entry_id, Some(1));
    }
}
