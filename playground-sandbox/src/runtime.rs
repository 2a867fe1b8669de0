//! Runtime trait and implementations

mod process;

use crate::execution::SessionId;
use crate::types::ExecutionStream;
use crate::Result;
use async_trait::async_trait;

pub use process::{InterpreterConfig, InterpreterRuntime, ProcessHandle};

/// A freshly launched process: the control handle plus its output streams
#[derive(Debug)]
pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    pub stream: ExecutionStream,
}

/// Launches one interpreter process per session
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Stage `source` and start the interpreter against it
    async fn spawn(&self, id: &SessionId, source: &str) -> Result<SpawnedProcess>;

    /// Get runtime name
    fn name(&self) -> &str;
}
