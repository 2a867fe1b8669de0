//! Playground sandbox - interactive interpreter sessions
//!
//! Launches an interpreter per session against a staged source file, streams its
//! standard output and error as they are produced, and enforces a wall-clock
//! limit per run. Sessions are tracked in an injectable [`SessionRegistry`].

mod error;
mod execution;
mod limits;
mod registry;
mod runtime;
mod service;
mod timeout;
mod types;

pub use error::SandboxError;
pub use execution::{SessionId, SessionInfo, SessionState};
pub use limits::ExecutionLimits;
pub use registry::{InMemoryRegistry, SessionRegistry};
pub use runtime::{InterpreterConfig, InterpreterRuntime, ProcessHandle, Runtime, SpawnedProcess};
pub use service::{SandboxService, StartedSession};
pub use timeout::TimeoutGuard;
pub use types::{ExecutionStream, ExitReport};

/// Result alias for sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;
