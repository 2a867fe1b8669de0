use anyhow::{Context, Result};
use playground_sandbox::{InMemoryRegistry, InterpreterRuntime, SandboxService};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

pub mod config;
mod error;
pub mod handler;
pub mod ws_server;

pub use config::ServerConfig;
pub use error::ProtocolError;
pub use handler::{HandlerState, InboundFrame, SessionHandler};
pub use ws_server::{create_router, start_server, AppState};

/// Install the global tracing subscriber: stderr always, plus a log file when
/// `log_file` is given. Keep the returned guard alive to flush the file.
pub fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "playground_server={},playground_sandbox={},playground_cli={},tower_http={}",
            log_level, log_level, log_level, log_level
        ))
    });

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let name = path.file_name().unwrap_or_else(|| "playground.log".as_ref());
            let appender = tracing_appender::rolling::never(dir.unwrap_or(Path::new(".")), name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(filter)
        .try_init();

    guard
}

/// Build the sandbox described by `config`
pub fn build_service(config: &ServerConfig) -> SandboxService {
    SandboxService::new(
        InterpreterRuntime::new(config.interpreter.clone()),
        Arc::new(InMemoryRegistry::new()),
        config.execution.clone(),
    )
}

/// Bind `config.bind_address` and serve until the listener fails
pub async fn run_server(config: ServerConfig) -> Result<()> {
    info!(
        interpreter = %config.interpreter.program,
        timeout_ms = config.execution.timeout.as_millis() as u64,
        temp_dir = %config.interpreter.temp_dir.display(),
        "Starting Python playground"
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    let state = AppState::new(build_service(&config), config.event_buffer);
    start_server(listener, state).await
}
