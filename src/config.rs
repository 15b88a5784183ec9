//! Application configuration.
//!
//! Settings arrive through the CLI (with environment-variable fallbacks);
//! the schedule document itself is a separate YAML file parsed by
//! [`crate::schedule`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the schedule document.
    #[serde(default = "default_schedule_path")]
    pub schedule_path: PathBuf,
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Don't mirror child output to the scheduler's own stdout.
    #[serde(default)]
    pub suppress_logs: bool,
}

fn default_schedule_path() -> PathBuf {
    PathBuf::from("schedule.yaml")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("tickd.db")
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schedule_path: default_schedule_path(),
            db_path: default_db_path(),
            host: default_host(),
            port: default_port(),
            suppress_logs: false,
        }
    }
}

impl AppConfig {
    /// The socket address string to bind the HTTP listener on.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
