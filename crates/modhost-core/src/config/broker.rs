//! Event relay and request-correlation settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Broker configuration shared by every registered module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Maximum time a single listener invocation may run before it is
    /// abandoned and the listener moves on to its next event.
    #[serde(default = "default_listener_timeout_ms")]
    pub listener_timeout_ms: u64,
    /// Queue depth at which a lagging listener is reported.
    #[serde(default = "default_listener_backlog_warn")]
    pub listener_backlog_warn: usize,
    /// Deadline used by the client proxy when waiting for a correlated result.
    #[serde(default = "default_request_timeout_ms")]
    pub default_request_timeout_ms: u64,
    /// Completed results kept per module for callers that have not awaited yet.
    #[serde(default = "default_completed_retention")]
    pub completed_retention: usize,
}

impl BrokerConfig {
    pub fn listener_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.default_request_timeout_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listener_timeout_ms: default_listener_timeout_ms(),
            listener_backlog_warn: default_listener_backlog_warn(),
            default_request_timeout_ms: default_request_timeout_ms(),
            completed_retention: default_completed_retention(),
        }
    }
}

fn default_listener_timeout_ms() -> u64 {
    30_000
}

fn default_listener_backlog_warn() -> usize {
    1024
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_completed_retention() -> usize {
    1024
}
