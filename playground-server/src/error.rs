//! Protocol-level failures reported back to the client as `error` events

/// Malformed or out-of-sequence client messages. None of these close the
/// connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid message: {0}")]
    Malformed(String),

    #[error("Binary frames are not supported")]
    BinaryFrame,

    #[error("A program is already running; stop it before starting another")]
    AlreadyRunning,

    #[error("No active Python process to receive input")]
    NoProcessForInput,

    #[error("No active Python process to stop")]
    NoProcessToStop,

    #[error("Session {0} is not active on this connection")]
    StaleSession(String),
}
