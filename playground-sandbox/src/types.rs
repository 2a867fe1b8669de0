//! Streaming handles returned by a spawned process

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

/// Output of a single spawned process.
///
/// Each stream yields chunks in the order the process wrote them; chunk
/// boundaries carry no meaning. `exit` resolves only after both streams have
/// been drained, so it is always the last thing a consumer observes.
#[derive(Debug)]
pub struct ExecutionStream {
    pub stdout: mpsc::Receiver<String>,
    pub stderr: mpsc::Receiver<String>,
    pub exit: oneshot::Receiver<ExitReport>,
}

/// How a process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitReport {
    /// Process exit code; `-1` when it was killed by a signal
    pub exit_code: i32,

    /// Wall-clock run time in milliseconds
    pub duration_ms: u64,

    /// Set when the exit status could not be observed
    pub error: Option<String>,
}

impl ExitReport {
    /// Report for a process whose handle disappeared without an exit status
    pub fn vanished(reason: impl Into<String>) -> Self {
        Self {
            exit_code: -1,
            duration_ms: 0,
            error: Some(reason.into()),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }

    /// Human-readable summary sent with the `exit` event
    pub fn summary(&self) -> String {
        match (&self.error, self.exit_code) {
            (Some(error), _) => format!("Program ended unexpectedly: {}", error),
            (None, 0) => "Program completed successfully".to_string(),
            (None, code) => format!("Program exited with code {}", code),
        }
    }
}
