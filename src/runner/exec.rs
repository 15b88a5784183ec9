//! Child-process execution and output capture.
//!
//! One call to [`JobRunner::exec`] spawns the job's command, tees its
//! merged stdout/stderr into the run's log buffer, the scheduler's own
//! stdout (unless suppressed), and the log-line table, then waits for
//! exit. The run always comes back with a terminal status; this function
//! never errors.

use std::process::Stdio;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinSet;

use crate::database::RunStore;
use crate::domain::{JobRun, STATUS_ERROR, STATUS_OK};
use crate::schedule::Job;
use crate::scheduler::SharedClock;

use super::JobRunner;

/// Collects captured output: an in-memory buffer feeding `run.log` plus a
/// line-by-line feed into the store.
struct LineSink {
    run_id: Option<i64>,
    store: RunStore,
    clock: SharedClock,
    suppress_logs: bool,
    state: Mutex<SinkState>,
}

struct SinkState {
    buffer: String,
    next_line: i64,
}

impl LineSink {
    fn new(run: &JobRun, runner: &JobRunner) -> Arc<Self> {
        Arc::new(Self {
            run_id: run.log_entry_id,
            store: runner.store().clone(),
            clock: Arc::clone(runner.clock()),
            suppress_logs: runner.suppress_logs(),
            state: Mutex::new(SinkState {
                buffer: String::new(),
                next_line: 1,
            }),
        })
    }

    /// Record one complete line from the child. Line numbers are assigned
    /// under the buffer lock, so they are dense and follow write order
    /// even with stdout and stderr racing.
    async fn line(&self, content: String, stream: &'static str) {
        let line_number = {
            let mut state = self.state.lock();
            state.buffer.push_str(&content);
            state.buffer.push('\n');
            let n = state.next_line;
            state.next_line += 1;
            n
        };

        if !self.suppress_logs {
            println!("{content}");
        }

        if let Some(run_id) = self.run_id {
            if let Err(e) = self
                .store
                .insert_log_line(run_id, line_number, self.clock.now(), content, stream)
                .await
            {
                tracing::warn!(run_id, error = %e, "Couldn't persist log line");
            }
        }
    }

    /// Append text directly to the buffer, bypassing line numbering; used
    /// for executor notices like the exit-code trailer.
    fn append_notice(&self, text: &str) {
        self.state.lock().buffer.push_str(text);
    }

    fn take_buffer(&self) -> String {
        std::mem::take(&mut self.state.lock().buffer)
    }
}

/// Spawn a reader task that splits one child pipe into lines.
fn spawn_reader<R>(tasks: &mut JoinSet<()>, sink: Arc<LineSink>, pipe: R, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tasks.spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            sink.line(line, stream).await;
        }
    });
}

impl JobRunner {
    /// Execute one attempt of a job.
    ///
    /// Preconditions: `run.name` and `run.triggered_at` are set and
    /// `run.status` is `None`. On return the status is terminal and
    /// `run.log` holds all captured output.
    pub(crate) async fn exec(&self, mut run: JobRun, job: &Job) -> JobRun {
        let spec = &job.spec;
        tracing::info!(
            job = spec.name.as_str(),
            trigger = run.triggered_by.as_str(),
            "Job triggered"
        );

        if spec.command.is_empty() {
            run.append_log("Job unable to start: no command specified");
            run.status = Some(STATUS_ERROR);
            tracing::warn!(job = spec.name.as_str(), "Job has no command");
            return run;
        }

        let mut cmd = Command::new(&spec.command[0]);
        cmd.args(&spec.command[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            cmd.env(key, value.expose());
        }
        if let Some(dir) = &spec.working_directory {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("Job unable to start: {e}");
                tracing::warn!(
                    job = spec.name.as_str(),
                    trigger = run.triggered_by.as_str(),
                    error = %e,
                    "Job unable to start"
                );
                run.append_log(&message);
                run.status = Some(STATUS_ERROR);
                return run;
            }
        };

        let sink = LineSink::new(&run, self);
        let mut readers = JoinSet::new();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(&mut readers, Arc::clone(&sink), stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(&mut readers, Arc::clone(&sink), stderr, "stderr");
        }

        let wait_result = tokio::select! {
            _ = self.cancel_token().cancelled() => {
                let _ = child.kill().await;
                None
            }
            result = child.wait() => Some(result),
        };

        // The pipes close when the child exits (or is killed); let the
        // readers capture every remaining line before finalizing the log.
        while readers.join_next().await.is_some() {}

        match wait_result {
            None => {
                sink.append_notice("\nJob killed due to scheduler shutdown\n");
                run.status = Some(STATUS_ERROR);
                tracing::info!(job = spec.name.as_str(), "Job killed due to shutdown");
            }
            Some(Ok(exit)) => {
                if exit.success() {
                    run.status = Some(STATUS_OK);
                } else if let Some(code) = exit.code() {
                    sink.append_notice(&format!("Exit code: {code}\n"));
                    run.status = Some(code);
                    tracing::warn!(job = spec.name.as_str(), exitcode = code, "Exit code");
                } else {
                    sink.append_notice("Job terminated by signal\n");
                    run.status = Some(STATUS_ERROR);
                    tracing::warn!(job = spec.name.as_str(), "Job terminated by signal");
                }
            }
            Some(Err(e)) => {
                run.status = Some(STATUS_ERROR);
                tracing::error!(
                    job = spec.name.as_str(),
                    error = %e,
                    "Unexpected error while waiting for job"
                );
            }
        }

        run.log.push_str(&sink.take_buffer());
        run.duration = Some(
            (self.clock().now() - run.triggered_at)
                .num_milliseconds()
                .max(0),
        );

        tracing::debug!(
            job = spec.name.as_str(),
            exitcode = ?run.status,
            "Job exited"
        );
        run
    }
}
