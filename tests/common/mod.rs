//! Common test utilities shared across integration tests

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use playground_common::{ClientMessage, ServerMessage};
use playground_sandbox::SandboxService;
use playground_server::{build_service, start_server, AppState, ServerConfig};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// How long a test waits for any single server event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Config running programs through `sh`, staged in `temp_dir`
pub fn shell_config(temp_dir: &Path, timeout: Duration) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.bind_address = "127.0.0.1:0".to_string();
    config.execution.timeout = timeout;
    config.interpreter.program = "sh".to_string();
    config.interpreter.source_extension = "sh".to_string();
    config.interpreter.temp_dir = temp_dir.to_path_buf();
    config
}

/// Config running real Python, staged in `temp_dir`
pub fn python_config(temp_dir: &Path, timeout: Duration) -> ServerConfig {
    let mut config = shell_config(temp_dir, timeout);
    config.interpreter.program = "python3".to_string();
    config.interpreter.source_extension = "py".to_string();
    config
}

/// Whether a `python3` interpreter is installed
pub fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// A server listening on an ephemeral port
pub struct TestServer {
    pub addr: SocketAddr,
    pub service: SandboxService,
}

impl TestServer {
    pub async fn spawn(config: &ServerConfig) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
        let addr = listener.local_addr()?;
        let service = build_service(config);
        let state = AppState::new(service.clone(), config.event_buffer);
        tokio::spawn(async move {
            if let Err(e) = start_server(listener, state).await {
                eprintln!("test server stopped: {}", e);
            }
        });
        Ok(Self { addr, service })
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn connect(&self) -> Result<WsClient> {
        let url = format!("ws://{}/ws-execute", self.addr);
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .context("websocket connect failed")?;
        Ok(WsClient { socket })
    }

    /// Poll until the registry drains or `wait` elapses
    pub async fn wait_for_no_sessions(&self, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if self.service.registry().len().await == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Websocket client speaking the session protocol
pub struct WsClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        self.send_raw(&serde_json::to_string(message)?).await
    }

    pub async fn send_raw(&mut self, text: &str) -> Result<()> {
        self.socket.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    pub async fn send_binary(&mut self, data: Vec<u8>) -> Result<()> {
        self.socket.send(Message::Binary(data)).await?;
        Ok(())
    }

    /// Next server event, failing after [`EVENT_TIMEOUT`]
    pub async fn recv(&mut self) -> Result<ServerMessage> {
        loop {
            let frame = tokio::time::timeout(EVENT_TIMEOUT, self.socket.next())
                .await
                .context("timed out waiting for a server event")?
                .context("server closed the connection")??;
            match frame {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Close(_) => anyhow::bail!("server closed the connection"),
                _ => continue,
            }
        }
    }

    /// Next event, or `None` if nothing arrives within `wait`
    pub async fn try_recv(&mut self, wait: Duration) -> Result<Option<ServerMessage>> {
        match tokio::time::timeout(wait, self.recv()).await {
            Ok(event) => event.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Start `code` and return the announced session id
    pub async fn start(&mut self, code: &str) -> Result<String> {
        self.send(&ClientMessage::start(code)).await?;
        match self.recv().await? {
            ServerMessage::Started { session_id } => Ok(session_id),
            other => anyhow::bail!("expected started, got {:?}", other),
        }
    }

    /// Collect events up to and including the terminal one
    pub async fn collect_until_terminal(&mut self) -> Result<Vec<ServerMessage>> {
        let mut events = Vec::new();
        loop {
            let event = self.recv().await?;
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                return Ok(events);
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.socket.close(None).await?;
        Ok(())
    }
}

/// Concatenated `output` payloads
pub fn stdout_of(events: &[ServerMessage]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            ServerMessage::Output { output } => Some(output.as_str()),
            _ => None,
        })
        .collect()
}

/// Concatenated `error` payloads
pub fn stderr_of(events: &[ServerMessage]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            ServerMessage::Error { error } => Some(error.as_str()),
            _ => None,
        })
        .collect()
}
