//! Per-run watchdog

use crate::execution::{SessionId, SessionState};
use crate::registry::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Kills a session's process once its wall-clock budget is spent.
///
/// Firing goes through [`SessionRegistry::mark_inactive`], so it races safely
/// with a normal exit or an explicit stop: whichever lands first wins. The
/// timer is aborted on [`TimeoutGuard::disarm`] and when the guard is dropped.
pub struct TimeoutGuard {
    id: SessionId,
    task: Option<JoinHandle<()>>,
}

impl TimeoutGuard {
    pub fn arm(id: SessionId, timeout: Duration, registry: Arc<dyn SessionRegistry>) -> Self {
        let session_id = id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let handle = registry.get(&session_id).await;
            if registry
                .mark_inactive(&session_id, SessionState::TimedOut)
                .await
            {
                warn!(
                    session_id = %session_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Execution timed out, terminating"
                );
                if let Some(handle) = handle {
                    handle.terminate();
                }
            }
        });
        Self {
            id,
            task: Some(task),
        }
    }

    /// Whether the timer is still pending
    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn disarm(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                debug!(session_id = %self.id, "timeout guard disarmed");
            }
            task.abort();
        }
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.disarm();
    }
}
