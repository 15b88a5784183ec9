//! Outgoing webhook notifications.
//!
//! Three wire formats share one call surface: the generic webhook posts
//! the JSON-serialized run, Slack gets `{"text": …}`, Discord gets
//! `{"content": …}`. All calls are best-effort; a failure is logged by the
//! caller and never affects the run's status.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;

use crate::domain::JobRun;

/// Timeout applied to every webhook POST.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// A configured webhook endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Webhook {
    /// Generic endpoint; receives the full run as JSON.
    Default { url: String },
    /// Slack incoming webhook; receives a text summary.
    Slack { url: String },
    /// Discord webhook; receives a content summary.
    Discord { url: String },
}

impl Webhook {
    /// Provider name used in log fields.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Default { .. } => "default",
            Self::Slack { .. } => "slack",
            Self::Discord { .. } => "discord",
        }
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Default { url } | Self::Slack { url } | Self::Discord { url } => url,
        }
    }

    /// Provider-specific JSON body for a completed run.
    #[must_use]
    pub fn body(&self, run: &JobRun) -> serde_json::Value {
        match self {
            Self::Default { .. } => json!(run),
            Self::Slack { .. } => json!({ "text": run.summary() }),
            Self::Discord { .. } => json!({ "content": run.summary() }),
        }
    }

    /// POST the notification and return the response body.
    pub async fn call(&self, client: &reqwest::Client, run: &JobRun) -> Result<String> {
        let response = client
            .post(self.url())
            .json(&self.body(run))
            .timeout(WEBHOOK_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("{} webhook request failed", self.name()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("{} webhook returned {}: {}", self.name(), status, text);
        }
        Ok(text)
    }
}
