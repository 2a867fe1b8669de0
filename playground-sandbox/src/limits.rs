//! Execution limits applied to every run

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits for a single interpreter run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Wall-clock budget before the timeout guard kills the process
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Largest single `input` payload accepted for a running process
    pub max_input_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            max_input_bytes: 64 * 1024,
        }
    }
}

impl ExecutionLimits {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Text reported to the client when the timeout guard fires
    pub fn timeout_message(&self) -> String {
        let budget = if self.timeout.subsec_millis() == 0 {
            match self.timeout.as_secs() {
                1 => "1 second".to_string(),
                secs => format!("{} seconds", secs),
            }
        } else {
            format!("{} ms", self.timeout.as_millis())
        };
        format!(
            "Execution timed out after {}. If your program needs user input, make sure to provide it before the time limit.",
            budget
        )
    }
}
