//! CLI command implementations

use anyhow::{Context, Result};
use playground_common::{ExecuteRequest, ExecuteResponse};
use playground_server::{build_service, init_tracing, run_server, ServerConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Command-line values that win over the config file and environment
#[derive(Debug, Default)]
pub struct Overrides {
    pub bind: Option<String>,
    pub timeout_ms: Option<u64>,
    pub interpreter: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(ms) = self.timeout_ms {
            config.execution.timeout = Duration::from_millis(ms);
        }
        if let Some(program) = self.interpreter {
            config.interpreter.program = program;
        }
    }
}

fn load_config(path: Option<PathBuf>, overrides: Overrides) -> Result<ServerConfig> {
    let mut config = ServerConfig::load(path.as_deref())?;
    overrides.apply(&mut config);
    Ok(config)
}

/// Run the playground server until it fails
pub async fn serve(
    config: Option<PathBuf>,
    overrides: Overrides,
    log_file: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    let _guard = init_tracing(verbose, log_file.as_deref());
    let config = load_config(config, overrides)?;
    run_server(config).await
}

/// Execute a local file once through the sandbox
pub async fn run_file(
    file: PathBuf,
    input: Option<String>,
    config: Option<PathBuf>,
    overrides: Overrides,
    verbose: bool,
) -> Result<ExecuteResponse> {
    let _guard = init_tracing(verbose, None);
    let config = load_config(config, overrides)?;
    let code = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    info!(file = %file.display(), "Running file");
    let mut request = ExecuteRequest::new(code);
    request.input = input;
    Ok(build_service(&config).execute(request).await)
}
