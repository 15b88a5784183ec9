//! Retry policy and post-run fan-out.
//!
//! [`JobRunner::exec_with_retry`] wraps the executor with the retry loop
//! and, after every finalized attempt, dispatches the on-event hooks:
//! downstream job triggers and webhook notifications. The caller gets the
//! run back only after all fan-out tasks have finished, which keeps
//! one-off invocations deterministic.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::domain::{JobRun, STATUS_ERROR};
use crate::schedule::{Job, OnEvent};
use crate::webhook::Webhook;

use super::JobRunner;

impl JobRunner {
    /// Run a job through the full pipeline: setup, up to `retries + 1`
    /// executor attempts with a fixed back-off, finalize and fan-out per
    /// attempt.
    ///
    /// Attempt 0 keeps the caller's trigger string; attempt n is persisted
    /// as a distinct run with `<trigger>[retry=n]`. Cancellation wins over
    /// both the attempt and the back-off and yields status −1.
    ///
    /// Boxed because downstream triggers re-enter this function.
    pub fn exec_with_retry(
        self: Arc<Self>,
        job: Arc<Job>,
        trigger: String,
    ) -> Pin<Box<dyn Future<Output = JobRun> + Send>> {
        Box::pin(async move {
            let mut run = self.setup(&job, &trigger).await;

            for attempt in 0..=job.spec.retries {
                if self.cancel_token().is_cancelled() {
                    run.append_log("Job cancelled due to scheduler shutdown");
                    run.status = Some(STATUS_ERROR);
                    self.finalize(&mut run, &job).await;
                    return run;
                }

                if attempt > 0 {
                    run = JobRun::new(
                        job.name(),
                        run.triggered_at,
                        format!("{trigger}[retry={attempt}]"),
                    );
                    self.persist(&mut run).await;
                }

                run = self.exec(run, &job).await;
                self.finalize(&mut run, &job).await;

                if run.succeeded() {
                    break;
                }

                if attempt < job.spec.retries {
                    tracing::debug!(
                        job = job.name(),
                        exitcode = ?run.status,
                        backoff_secs = self.retry_backoff().as_secs_f64(),
                        "Job exited unsuccessfully, retrying after back-off"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(self.retry_backoff()) => {}
                        () = self.cancel_token().cancelled() => {
                            run.append_log("Job cancelled during retry back-off");
                            run.status = Some(STATUS_ERROR);
                            self.persist(&mut run).await;
                            return run;
                        }
                    }
                }
            }

            run
        })
    }

    /// Persist the finished attempt and dispatch its fan-out.
    pub(crate) async fn finalize(self: &Arc<Self>, run: &mut JobRun, job: &Arc<Job>) {
        self.persist(run).await;
        self.on_event(run, job).await;
    }

    /// Dispatch downstream triggers and webhooks for a finalized run and
    /// wait for all of them.
    async fn on_event(self: &Arc<Self>, run: &JobRun, job: &Arc<Job>) {
        let schedule = self.schedule();
        let events: [&OnEvent; 2] = if run.succeeded() {
            [&job.spec.on_success, &schedule.on_success]
        } else {
            [&job.spec.on_error, &schedule.on_error]
        };

        let mut downstream: Vec<Arc<Job>> = Vec::new();
        let mut webhooks: Vec<Webhook> = Vec::new();
        for event in events {
            for target in &event.trigger_job {
                match schedule.get(target) {
                    Some(target_job) => downstream.push(Arc::clone(target_job)),
                    None => tracing::warn!(
                        job = run.name.as_str(),
                        target = target.as_str(),
                        "Downstream job not found; skipping trigger"
                    ),
                }
            }
            for url in &event.notify_webhook {
                webhooks.push(Webhook::Default { url: url.clone() });
            }
            for url in &event.notify_slack_webhook {
                webhooks.push(Webhook::Slack { url: url.clone() });
            }
            for url in &event.notify_discord_webhook {
                webhooks.push(Webhook::Discord { url: url.clone() });
            }
        }

        if downstream.is_empty() && webhooks.is_empty() {
            return;
        }

        let mut tasks = JoinSet::new();

        for target in downstream {
            let runner = Arc::clone(self);
            let trigger = format!("job[{}]", run.name);
            tracing::debug!(
                job = run.name.as_str(),
                target = target.name(),
                "Triggering downstream job"
            );
            tasks.spawn(async move {
                // Downstream runs are supervised by the root token, not by
                // the parent's caller: they survive the parent completing
                // but still stop at shutdown.
                let _guard = target.serialize_execution().await;
                runner.exec_with_retry(target, trigger).await;
            });
        }

        for webhook in webhooks {
            let client = self.http().clone();
            let run = run.clone();
            tasks.spawn(async move {
                match webhook.call(&client, &run).await {
                    Ok(response) => tracing::debug!(
                        job = run.name.as_str(),
                        webhook = webhook.name(),
                        url = webhook.url(),
                        response = response.as_str(),
                        "Webhook delivered"
                    ),
                    Err(e) => tracing::warn!(
                        job = run.name.as_str(),
                        webhook = webhook.name(),
                        url = webhook.url(),
                        error = %e,
                        "Webhook notify failed"
                    ),
                }
            });
        }

        while tasks.join_next().await.is_some() {}
    }
}
