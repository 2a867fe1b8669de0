//! Per-connection session protocol handler
//!
//! Decodes `start`/`input`/`stop` frames, drives the sandbox, and turns process
//! output into `started`/`output`/`error`/`exit`/`stopped` events. One session
//! may be active per connection at a time.

use futures::{Stream, StreamExt};
use playground_common::{ClientMessage, ServerMessage};
use playground_sandbox::{
    ExecutionStream, ExitReport, SandboxError, SandboxService, SessionId, SessionState,
    TimeoutGuard,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::ProtocolError;

/// Transport frames after websocket decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary,
    Close,
}

/// Observable handler state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerState {
    Idle,
    Running(SessionId),
}

/// The outbound channel is gone; the client disconnected
#[derive(Debug)]
struct Disconnected;

enum SessionEvent {
    Stdout(String),
    Stderr(String),
    Exited(ExitReport),
}

struct ActiveSession {
    id: SessionId,
    stdout: Option<mpsc::Receiver<String>>,
    stderr: Option<mpsc::Receiver<String>>,
    exit: oneshot::Receiver<ExitReport>,
    guard: TimeoutGuard,
}

impl ActiveSession {
    fn into_stream(mut self) -> (SessionId, ExecutionStream) {
        self.guard.disarm();
        let (_, stdout_rx) = mpsc::channel(1);
        let (_, stderr_rx) = mpsc::channel(1);
        let stream = ExecutionStream {
            stdout: self.stdout.unwrap_or(stdout_rx),
            stderr: self.stderr.unwrap_or(stderr_rx),
            exit: self.exit,
        };
        (self.id, stream)
    }
}

pub struct SessionHandler {
    service: SandboxService,
    outbound: mpsc::Sender<ServerMessage>,
    active: Option<ActiveSession>,
}

impl SessionHandler {
    pub fn new(service: SandboxService, outbound: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            service,
            outbound,
            active: None,
        }
    }

    pub fn state(&self) -> HandlerState {
        match &self.active {
            Some(session) => HandlerState::Running(session.id.clone()),
            None => HandlerState::Idle,
        }
    }

    /// Serve one connection until the client closes it or stops listening.
    ///
    /// Process output is forwarded while waiting for the next client frame,
    /// so neither direction blocks the other.
    pub async fn run<S>(mut self, mut inbound: S)
    where
        S: Stream<Item = InboundFrame> + Unpin,
    {
        loop {
            let outcome = tokio::select! {
                frame = inbound.next() => match frame {
                    Some(InboundFrame::Text(text)) => self.handle_text(&text).await,
                    Some(InboundFrame::Binary) => {
                        self.send(ServerMessage::error(ProtocolError::BinaryFrame.to_string())).await
                    }
                    Some(InboundFrame::Close) | None => break,
                },
                event = next_event(&mut self.active), if self.active.is_some() => {
                    self.handle_event(event).await
                }
            };
            if outcome.is_err() {
                debug!("client stopped listening");
                break;
            }
        }
        self.close().await;
    }

    async fn handle_text(&mut self, text: &str) -> Result<(), Disconnected> {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                debug!("rejecting malformed frame: {}", e);
                self.reject(ProtocolError::Malformed(e.to_string())).await
            }
        }
    }

    async fn handle_message(&mut self, message: ClientMessage) -> Result<(), Disconnected> {
        match message {
            ClientMessage::Start { code } => self.handle_start(code).await,
            ClientMessage::Input { input, id } => {
                let target = match self.resolve(id, ProtocolError::NoProcessForInput) {
                    Ok(target) => target,
                    Err(e) => return self.reject(e).await,
                };
                match self.service.write_input(&target, &input).await {
                    Ok(()) => Ok(()),
                    Err(SandboxError::InputClosed) => {
                        self.send(ServerMessage::error(
                            "Python process is no longer accepting input",
                        ))
                        .await
                    }
                    Err(e) => {
                        self.send(ServerMessage::error(format!("Failed to send input: {}", e)))
                            .await
                    }
                }
            }
            ClientMessage::Stop { id } => {
                let target = match self.resolve(id, ProtocolError::NoProcessToStop) {
                    Ok(target) => target,
                    Err(e) => return self.reject(e).await,
                };
                self.handle_stop(target).await
            }
        }
    }

    async fn handle_start(&mut self, code: String) -> Result<(), Disconnected> {
        if self.active.is_some() {
            return self.reject(ProtocolError::AlreadyRunning).await;
        }

        match self.service.start(&code).await {
            Ok(session) => {
                let id = session.id.clone();
                self.active = Some(ActiveSession {
                    id: session.id,
                    stdout: Some(session.stream.stdout),
                    stderr: Some(session.stream.stderr),
                    exit: session.stream.exit,
                    guard: session.guard,
                });
                self.send(ServerMessage::Started {
                    session_id: id.to_string(),
                })
                .await
            }
            Err(e) => {
                self.send(ServerMessage::error(format!(
                    "Failed to start Python process: {}",
                    e
                )))
                .await
            }
        }
    }

    async fn handle_stop(&mut self, id: SessionId) -> Result<(), Disconnected> {
        match self.service.stop(&id).await {
            Ok(true) => {
                if let Some(active) = self.active.take() {
                    let (id, stream) = active.into_stream();
                    self.service.reap(id, stream);
                }
                self.send(ServerMessage::Stopped).await
            }
            // exit or timeout got there first; its own event follows
            Ok(false) => Ok(()),
            Err(e) => {
                warn!(session_id = %id, "stop on unknown session: {}", e);
                self.active = None;
                self.reject(ProtocolError::NoProcessToStop).await
            }
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) -> Result<(), Disconnected> {
        match event {
            SessionEvent::Stdout(output) => self.send(ServerMessage::Output { output }).await,
            SessionEvent::Stderr(error) => self.send(ServerMessage::Error { error }).await,
            SessionEvent::Exited(report) => {
                let Some(mut active) = self.active.take() else {
                    return Ok(());
                };
                active.guard.disarm();

                let state = self.service.finish(&active.id, &report).await;
                self.service.registry().remove(&active.id).await;
                info!(
                    session_id = %active.id,
                    exit_code = report.exit_code,
                    success = report.success(),
                    duration_ms = report.duration_ms,
                    ?state,
                    "Session finished"
                );

                let message = match state {
                    SessionState::TimedOut => ServerMessage::Exit {
                        code: -1,
                        message: self.service.limits().timeout_message(),
                        timed_out: true,
                    },
                    SessionState::Stopped => ServerMessage::Stopped,
                    _ => ServerMessage::Exit {
                        code: report.exit_code,
                        message: report.summary(),
                        timed_out: false,
                    },
                };
                self.send(message).await
            }
        }
    }

    /// Resolve the session an `input`/`stop` addresses. Only this
    /// connection's running session is a valid target.
    fn resolve(
        &self,
        requested: Option<String>,
        when_idle: ProtocolError,
    ) -> Result<SessionId, ProtocolError> {
        let Some(active) = &self.active else {
            return Err(match requested {
                Some(id) => ProtocolError::StaleSession(id),
                None => when_idle,
            });
        };
        match requested {
            Some(id) if id != active.id.as_str() => Err(ProtocolError::StaleSession(id)),
            _ => Ok(active.id.clone()),
        }
    }

    async fn reject(&self, error: ProtocolError) -> Result<(), Disconnected> {
        self.send(ServerMessage::error(error.to_string())).await
    }

    async fn send(&self, message: ServerMessage) -> Result<(), Disconnected> {
        self.outbound.send(message).await.map_err(|_| Disconnected)
    }

    /// Connection gone: kill whatever is still running and let the reaper
    /// deregister it once the process has exited.
    async fn close(&mut self) {
        if let Some(active) = self.active.take() {
            info!(session_id = %active.id, "Connection closed with a running session");
            let (id, stream) = active.into_stream();
            if let Err(e) = self.service.stop(&id).await {
                debug!(session_id = %id, "cleanup stop: {}", e);
            }
            self.service.reap(id, stream);
        }
    }
}

/// Next event of the active session. Both output streams are drained before
/// the exit is reported, so the terminal event always comes last.
async fn next_event(active: &mut Option<ActiveSession>) -> SessionEvent {
    let Some(session) = active.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        tokio::select! {
            biased;
            chunk = recv_chunk(&mut session.stdout) => match chunk {
                Some(chunk) => return SessionEvent::Stdout(chunk),
                None => session.stdout = None,
            },
            chunk = recv_chunk(&mut session.stderr) => match chunk {
                Some(chunk) => return SessionEvent::Stderr(chunk),
                None => session.stderr = None,
            },
            report = &mut session.exit, if session.stdout.is_none() && session.stderr.is_none() => {
                return SessionEvent::Exited(report.unwrap_or_else(|_| {
                    ExitReport::vanished("Python process disappeared without an exit status")
                }));
            }
        }
    }
}

async fn recv_chunk(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
