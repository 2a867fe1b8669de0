//! Sandbox service - main entry point

use crate::error::SandboxError;
use crate::execution::{SessionId, SessionState};
use crate::limits::ExecutionLimits;
use crate::registry::SessionRegistry;
use crate::runtime::Runtime;
use crate::timeout::TimeoutGuard;
use crate::types::{ExecutionStream, ExitReport};
use crate::Result;
use playground_common::{ExecuteRequest, ExecuteResponse};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A session that spawned successfully and is registered as `Running`
pub struct StartedSession {
    pub id: SessionId,
    pub stream: ExecutionStream,
    pub guard: TimeoutGuard,
}

/// Glue between the runtime, the session registry and the timeout guard
#[derive(Clone)]
pub struct SandboxService {
    runtime: Arc<dyn Runtime>,
    registry: Arc<dyn SessionRegistry>,
    limits: ExecutionLimits,
}

impl SandboxService {
    pub fn new(
        runtime: impl Runtime + 'static,
        registry: Arc<dyn SessionRegistry>,
        limits: ExecutionLimits,
    ) -> Self {
        Self {
            runtime: Arc::new(runtime),
            registry,
            limits,
        }
    }

    pub fn registry(&self) -> Arc<dyn SessionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Get the runtime name
    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }

    /// Spawn `code` under a fresh session id and arm its timeout guard.
    ///
    /// A failed spawn leaves no registry entry behind.
    pub async fn start(&self, code: &str) -> Result<StartedSession> {
        let id = self.registry.create().await;
        info!(
            session_id = %id,
            runtime = self.runtime.name(),
            code_len = code.len(),
            "Starting session"
        );

        let spawned = match self.runtime.spawn(&id, code).await {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!(session_id = %id, "Spawn failed: {}", e);
                self.registry.fail(&id, e.to_string()).await;
                self.registry.remove(&id).await;
                return Err(e);
            }
        };

        let handle = Arc::new(spawned.handle);
        if let Err(e) = self.registry.attach(&id, handle.clone()).await {
            handle.terminate();
            self.registry.remove(&id).await;
            return Err(e);
        }

        let guard = TimeoutGuard::arm(id.clone(), self.limits.timeout, self.registry());
        Ok(StartedSession {
            id,
            stream: spawned.stream,
            guard,
        })
    }

    /// Route one line of input to a running session
    pub async fn write_input(&self, id: &SessionId, text: &str) -> Result<()> {
        self.check_input_size(text)?;
        match self.registry.state(id).await {
            None => return Err(SandboxError::SessionNotFound(id.clone())),
            Some(state) if !state.is_running() => {
                return Err(SandboxError::SessionInactive(id.clone()))
            }
            Some(_) => {}
        }
        let handle = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| SandboxError::SessionNotFound(id.clone()))?;
        handle.write_input(text).await
    }

    fn check_input_size(&self, text: &str) -> Result<()> {
        if text.len() > self.limits.max_input_bytes {
            return Err(SandboxError::InputTooLarge {
                size: text.len(),
                limit: self.limits.max_input_bytes,
            });
        }
        Ok(())
    }

    /// Mark a session `Stopped` and kill its process.
    ///
    /// Returns `false` when the session had already reached a terminal state
    /// (exit or timeout got there first).
    pub async fn stop(&self, id: &SessionId) -> Result<bool> {
        let handle = self.registry.get(id).await;
        if !self.registry.mark_inactive(id, SessionState::Stopped).await {
            return match self.registry.state(id).await {
                Some(_) => Ok(false),
                None => Err(SandboxError::SessionNotFound(id.clone())),
            };
        }
        if let Some(handle) = handle {
            handle.terminate();
        }
        info!(session_id = %id, "Session stopped");
        Ok(true)
    }

    /// Record a process exit and return the session's final state, which is
    /// `TimedOut` or `Stopped` if either won the race against the exit.
    pub async fn finish(&self, id: &SessionId, report: &ExitReport) -> SessionState {
        let exited = SessionState::Terminated(report.exit_code);
        self.registry.mark_inactive(id, exited.clone()).await;
        self.registry.state(id).await.unwrap_or(exited)
    }

    /// Deregister once the process has actually exited. Output still in
    /// flight is discarded.
    pub fn reap(&self, id: SessionId, stream: ExecutionStream) {
        let registry = self.registry();
        tokio::spawn(async move {
            let ExecutionStream { exit, .. } = stream;
            let _ = exit.await;
            registry.remove(&id).await;
            debug!(session_id = %id, "Session reaped");
        });
    }

    /// Run `code` to completion with all input supplied before execution.
    pub async fn execute(&self, request: ExecuteRequest) -> ExecuteResponse {
        let input = request.input.as_deref().unwrap_or_default();
        if let Err(e) = self.check_input_size(input) {
            return ExecuteResponse {
                output: String::new(),
                error: Some(format!("Failed to execute Python: {}", e)),
            };
        }

        let StartedSession {
            id,
            stream,
            mut guard,
        } = match self.start(&request.code).await {
            Ok(session) => session,
            Err(e) => {
                return ExecuteResponse {
                    output: String::new(),
                    error: Some(format!("Failed to execute Python: {}", e)),
                }
            }
        };

        // queued for the stdin task, so output is collected while it is written
        if !input.is_empty() {
            if let Err(e) = self.write_input(&id, input).await {
                debug!(session_id = %id, "Pre-supplied input rejected: {}", e);
            }
        }
        if let Some(handle) = self.registry.get(&id).await {
            handle.close_input().await;
        }

        let ExecutionStream {
            stdout,
            stderr,
            exit,
        } = stream;
        let (output, errors) = tokio::join!(collect(stdout), collect(stderr));
        let report = exit
            .await
            .unwrap_or_else(|_| ExitReport::vanished("process handle disappeared"));
        guard.disarm();

        let state = self.finish(&id, &report).await;
        self.registry.remove(&id).await;
        info!(session_id = %id, exit_code = report.exit_code, ?state, "One-shot execution finished");

        let error = match state {
            SessionState::TimedOut => Some(self.limits.timeout_message()),
            _ if report.error.is_some() => report.error.clone(),
            _ if report.exit_code != 0 => Some(if errors.is_empty() {
                format!("Process exited with code {}", report.exit_code)
            } else {
                errors
            }),
            _ => None,
        };
        ExecuteResponse { output, error }
    }
}

async fn collect(mut rx: mpsc::Receiver<String>) -> String {
    let mut out = String::new();
    while let Some(chunk) = rx.recv().await {
        out.push_str(&chunk);
    }
    out
}
