//! Session protocol frames exchanged over the `/ws-execute` websocket.
//!
//! Every frame is a JSON object tagged by its `type` field.

use serde::{Deserialize, Serialize};

/// Client -> server control messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Launch the interpreter against `code`
    Start { code: String },

    /// Feed one line of standard input to a running program
    Input {
        input: String,
        /// Target session; the connection's own session when omitted
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Kill a running program
    Stop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl ClientMessage {
    pub fn start(code: impl Into<String>) -> Self {
        Self::Start { code: code.into() }
    }

    pub fn input(input: impl Into<String>) -> Self {
        Self::Input {
            input: input.into(),
            id: None,
        }
    }

    pub fn stop() -> Self {
        Self::Stop { id: None }
    }

    /// Address this message to an explicit session id.
    pub fn with_id(self, session_id: impl Into<String>) -> Self {
        match self {
            Self::Input { input, .. } => Self::Input {
                input,
                id: Some(session_id.into()),
            },
            Self::Stop { .. } => Self::Stop {
                id: Some(session_id.into()),
            },
            other => other,
        }
    }
}

/// Server -> client events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Started {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Output {
        output: String,
    },
    /// Interpreter diagnostics or a protocol/spawn failure
    Error {
        error: String,
    },
    Exit {
        code: i32,
        message: String,
        #[serde(
            rename = "timedOut",
            default,
            skip_serializing_if = "std::ops::Not::not"
        )]
        timed_out: bool,
    },
    Stopped,
}

impl ServerMessage {
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    /// Whether this event ends a session
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exit { .. } | Self::Stopped)
    }
}
