//! Server configuration: TOML file plus environment overrides

use anyhow::{Context, Result};
use playground_sandbox::{ExecutionLimits, InterpreterConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP/websocket listener binds to
    pub bind_address: String,

    /// Capacity of each connection's outbound event queue
    pub event_buffer: usize,

    pub execution: ExecutionLimits,

    pub interpreter: InterpreterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5000".to_string(),
            event_buffer: 256,
            execution: ExecutionLimits::default(),
            interpreter: InterpreterConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from `path` if given (a missing file means defaults), then apply
    /// `PLAYGROUND_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                Self::from_toml_str(&content)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?
            }
            Some(path) => {
                tracing::warn!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("PLAYGROUND_BIND_ADDR") {
            self.bind_address = addr;
        }
        if let Some(ms) = lookup("PLAYGROUND_TIMEOUT_MS") {
            let ms: u64 = ms
                .trim()
                .parse()
                .with_context(|| format!("PLAYGROUND_TIMEOUT_MS is not a number: {}", ms))?;
            self.execution.timeout = Duration::from_millis(ms);
        }
        if let Some(program) = lookup("PLAYGROUND_INTERPRETER") {
            self.interpreter.program = program;
        }
        if let Some(dir) = lookup("PLAYGROUND_TEMP_DIR") {
            self.interpreter.temp_dir = PathBuf::from(dir);
        }
        Ok(())
    }
}
