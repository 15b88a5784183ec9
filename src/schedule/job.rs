//! Job specifications as declared in the schedule document.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::schedule::ScheduleError;
use crate::scheduler::cron::CronExpression;

/// Actions to take after a job event (success or error).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OnEvent {
    /// Names of jobs in the same schedule to trigger.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trigger_job: Vec<String>,
    /// Generic webhook URLs; the body is the JSON-serialized run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify_webhook: Vec<String>,
    /// Slack incoming-webhook URLs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify_slack_webhook: Vec<String>,
    /// Discord webhook URLs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify_discord_webhook: Vec<String>,
}

impl OnEvent {
    /// Whether the bundle carries no actions at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trigger_job.is_empty()
            && self.notify_webhook.is_empty()
            && self.notify_slack_webhook.is_empty()
            && self.notify_discord_webhook.is_empty()
    }
}

/// An environment value that is masked in any serialized output.
///
/// The raw value is still exported to the child process; the tag only
/// affects display.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// The raw value, for child-process environment export.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret)
    }
}

/// Immutable specification of one job.
///
/// Built once from the schedule document and alive for the process
/// lifetime. Runtime state (next tick, execution lock) lives on the
/// wrapping [`crate::schedule::Job`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Job name; unique within the schedule. Filled from the map key.
    #[serde(default)]
    pub name: String,
    /// Cron expression; absent or empty means the job never auto-fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    /// Argv tokens of the command to run. A YAML scalar is accepted as a
    /// single-token command.
    #[serde(deserialize_with = "string_or_seq", default)]
    pub command: Vec<String>,
    /// Working directory for the child process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    /// Extra environment for the child, merged over the scheduler's own.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, Secret>,
    /// Number of retries after a failed attempt; total attempts = retries + 1.
    #[serde(default)]
    pub retries: u32,
    /// When set, overlapping runs of this job are serialized behind an
    /// exclusive lock and due tick firings are skipped while it is held.
    #[serde(default)]
    pub disable_concurrent_execution: bool,
    /// Hooks dispatched after a successful run.
    #[serde(default, skip_serializing_if = "OnEvent::is_empty")]
    pub on_success: OnEvent,
    /// Hooks dispatched after a failed run.
    #[serde(default, skip_serializing_if = "OnEvent::is_empty")]
    pub on_error: OnEvent,
}

impl JobSpec {
    /// The cron expression, if one is configured and non-empty.
    #[must_use]
    pub fn cron_str(&self) -> Option<&str> {
        self.cron.as_deref().filter(|c| !c.trim().is_empty())
    }

    /// Parse the configured cron expression, if any.
    pub fn parsed_cron(&self) -> Result<Option<CronExpression>, ScheduleError> {
        match self.cron_str() {
            Some(expr) => CronExpression::parse(expr)
                .map(Some)
                .map_err(|e| ScheduleError::InvalidCron {
                    job: self.name.clone(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Validate the configured cron expression; an absent or empty cron is
    /// valid (the job simply never auto-fires).
    pub fn validate_cron(&self) -> Result<(), ScheduleError> {
        self.parsed_cron().map(|_| ())
    }

    /// Render the spec as YAML for display.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Accept `command: echo` as well as `command: [echo, hello]`.
fn string_or_seq<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Command {
        Scalar(String),
        Sequence(Vec<String>),
    }

    Ok(match Command::deserialize(deserializer)? {
        Command::Scalar(token) => vec![token],
        Command::Sequence(tokens) => tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_scalar_and_sequence() {
        let spec: JobSpec = serde_yaml::from_str("command: date").unwrap();
        assert_eq!(spec.command, vec!["date"]);

        let spec: JobSpec = serde_yaml::from_str("command: [echo, hello]").unwrap();
        assert_eq!(spec.command, vec!["echo", "hello"]);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let spec: JobSpec =
            serde_yaml::from_str("command: [\"true\"]\nfancy_new_option: 42").unwrap();
        assert_eq!(spec.command, vec!["true"]);
    }

    #[test]
    fn test_secret_masked_in_output() {
        let yaml = "command: [env]\nenv:\n  API_TOKEN: hunter2\n";
        let spec: JobSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.env["API_TOKEN"].expose(), "hunter2");

        let rendered = spec.to_yaml().unwrap();
        assert!(rendered.contains("'***'") || rendered.contains("***"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_validate_cron() {
        let mut spec: JobSpec =
            serde_yaml::from_str("command: [\"true\"]\ncron: \"*/5 * * * *\"").unwrap();
        assert!(spec.validate_cron().is_ok());

        spec.cron = Some("every tuesday".into());
        assert!(spec.validate_cron().is_err());
    }

    #[test]
    fn test_empty_cron_is_none() {
        let spec: JobSpec = serde_yaml::from_str("command: [\"true\"]\ncron: \"\"").unwrap();
        assert!(spec.cron_str().is_none());
    }
}
