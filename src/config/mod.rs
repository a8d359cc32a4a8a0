//! Configuration management for fanout
//!
//! Layered loading lives in [`FanoutConfig`]; this module also holds the typed sections
//! extracted from the merged configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

mod core;
pub mod smart_load;

#[cfg(test)]
mod tests;

pub use self::core::FanoutConfig;

/// `[executor]` section: defaults for every batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Wall-clock limit for a whole batch, in seconds
    pub timeout_secs: f64,

    /// Maximum concurrently running tasks (0 = size of the batch)
    pub max_workers: usize,

    /// Largest pool created when `max_workers` is 0
    pub worker_ceiling: usize,

    /// Progress is reported every N completions
    pub progress_every: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 10.0,
            max_workers: 0,
            worker_ceiling: 256,
            progress_every: 1,
        }
    }
}

impl ExecutorSettings {
    /// Configured timeout; negative or non-finite values collapse to zero and are rejected later
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(Duration::ZERO)
    }
}
