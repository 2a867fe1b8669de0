//! Error types for sandbox execution

use std::path::PathBuf;

use crate::execution::SessionId;

/// Failures surfaced by the process runner and the session registry.
///
/// A non-zero interpreter exit is not an error here; it travels as data in
/// [`crate::ExitReport`].
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Source text could not be written to its transient location
    #[error("could not stage source at {}: {source}", .path.display())]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Interpreter binary could not be launched
    #[error("could not launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process no longer accepts input (exited, killed, or stdin closed)
    #[error("process is no longer accepting input")]
    InputClosed,

    /// Too much input is queued for a program that is not reading it
    #[error("input queue is full; the program is not reading its input")]
    InputBacklog,

    /// Input larger than the configured limit
    #[error("input of {size} bytes exceeds the {limit} byte limit")]
    InputTooLarge { size: usize, limit: usize },

    /// No registry entry for the id
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// Entry exists but the session has reached a terminal state
    #[error("session {0} is not running")]
    SessionInactive(SessionId),
}
