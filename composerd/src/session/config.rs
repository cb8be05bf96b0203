//! Session configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Session tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SessionConfig {
    /// Give up on engine bootstrap after this many milliseconds
    #[serde(default = "default_bootstrap_timeout_ms")]
    pub bootstrap_timeout_ms: u64,

    /// Stop waiting for engine teardown after this many milliseconds
    #[serde(default = "default_teardown_timeout_ms")]
    pub teardown_timeout_ms: u64,

    /// Pending events buffered per subscriber before the oldest is dropped
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,

    /// Name of the engine worker thread
    #[serde(default = "default_worker_thread_name")]
    pub worker_thread_name: String,
}

fn default_bootstrap_timeout_ms() -> u64 {
    debug!("default_bootstrap_timeout_ms: called");
    30_000
}

fn default_teardown_timeout_ms() -> u64 {
    debug!("default_teardown_timeout_ms: called");
    5_000
}

fn default_subscriber_capacity() -> usize {
    debug!("default_subscriber_capacity: called");
    15
}

fn default_worker_thread_name() -> String {
    debug!("default_worker_thread_name: called");
    "composer-engine".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        debug!("SessionConfig::default: called");
        Self {
            bootstrap_timeout_ms: default_bootstrap_timeout_ms(),
            teardown_timeout_ms: default_teardown_timeout_ms(),
            subscriber_capacity: default_subscriber_capacity(),
            worker_thread_name: default_worker_thread_name(),
        }
    }
}

impl SessionConfig {
    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}
