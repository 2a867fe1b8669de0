//! Session registry: session id -> live process handle and lifecycle state

use crate::error::SandboxError;
use crate::execution::{SessionId, SessionInfo, SessionState};
use crate::runtime::ProcessHandle;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Concurrency-safe store of live sessions.
///
/// Output drains, the connection's control path and the timeout guard all
/// mutate sessions through this trait; each call is atomic with respect to
/// the others.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Mint a fresh id and record it as `Starting`
    async fn create(&self) -> SessionId;

    /// Bind the spawned process to a `Starting` session and mark it `Running`.
    /// A handle is never replaced once attached.
    async fn attach(&self, id: &SessionId, handle: Arc<ProcessHandle>) -> Result<()>;

    async fn get(&self, id: &SessionId) -> Option<Arc<ProcessHandle>>;

    async fn state(&self, id: &SessionId) -> Option<SessionState>;

    /// Move a live session into `terminal`. Returns `true` only for the call
    /// that performed the transition; later calls are no-ops.
    async fn mark_inactive(&self, id: &SessionId, terminal: SessionState) -> bool;

    /// Record a spawn failure for a `Starting` session
    async fn fail(&self, id: &SessionId, reason: String);

    async fn remove(&self, id: &SessionId) -> Option<SessionInfo>;

    async fn list(&self) -> Vec<SessionInfo>;

    async fn len(&self) -> usize;
}

struct SessionEntry {
    state: SessionState,
    handle: Option<Arc<ProcessHandle>>,
    created_at: DateTime<Utc>,
}

impl SessionEntry {
    fn info(&self, id: &SessionId) -> SessionInfo {
        SessionInfo {
            id: id.clone(),
            state: self.state.clone(),
            created_at: self.created_at,
        }
    }
}

/// Registry backed by a `RwLock<HashMap>`
#[derive(Clone, Default)]
pub struct InMemoryRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, SessionEntry>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRegistry for InMemoryRegistry {
    async fn create(&self) -> SessionId {
        let mut sessions = self.sessions.write().await;
        let mut id = SessionId::new();
        while sessions.contains_key(&id) {
            id = SessionId::new();
        }
        sessions.insert(
            id.clone(),
            SessionEntry {
                state: SessionState::Starting,
                handle: None,
                created_at: Utc::now(),
            },
        );
        debug!(session_id = %id, "session created");
        id
    }

    async fn attach(&self, id: &SessionId, handle: Arc<ProcessHandle>) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| SandboxError::SessionNotFound(id.clone()))?;
        if entry.state != SessionState::Starting || entry.handle.is_some() {
            return Err(SandboxError::SessionInactive(id.clone()));
        }
        entry.handle = Some(handle);
        entry.state = SessionState::Running;
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Option<Arc<ProcessHandle>> {
        self.sessions
            .read()
            .await
            .get(id)
            .and_then(|entry| entry.handle.clone())
    }

    async fn state(&self, id: &SessionId) -> Option<SessionState> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|entry| entry.state.clone())
    }

    async fn mark_inactive(&self, id: &SessionId, terminal: SessionState) -> bool {
        if !terminal.is_terminal() {
            return false;
        }
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(entry) if !entry.state.is_terminal() => {
                debug!(session_id = %id, from = ?entry.state, to = ?terminal, "session inactive");
                entry.state = terminal;
                true
            }
            _ => false,
        }
    }

    async fn fail(&self, id: &SessionId, reason: String) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(id) {
            if entry.state == SessionState::Starting {
                entry.state = SessionState::StartFailed(reason);
            }
        }
    }

    async fn remove(&self, id: &SessionId) -> Option<SessionInfo> {
        let removed = self.sessions.write().await.remove(id);
        removed.map(|entry| {
            debug!(session_id = %id, "session removed");
            entry.info(id)
        })
    }

    async fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, entry)| entry.info(id))
            .collect()
    }

    async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
