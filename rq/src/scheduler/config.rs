//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long a request may wait in the queue before failing
    #[serde(rename = "queue-item-timeout-ms")]
    pub queue_item_timeout_ms: u64,

    /// Call budget assumed before any response has been observed
    #[serde(rename = "default-limit")]
    pub default_limit: u32,

    /// Window length assumed before any response has been observed
    #[serde(rename = "default-window-ms")]
    pub default_window_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_item_timeout_ms: 180_000,
            default_limit: 100,
            default_window_ms: 10_000,
        }
    }
}

impl SchedulerConfig {
    /// Get the queue item timeout as a Duration
    pub fn queue_item_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_item_timeout_ms)
    }

    /// Get the default window as a Duration
    pub fn default_window(&self) -> Duration {
        Duration::from_millis(self.default_window_ms)
    }
}
