mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "playground")]
#[command(about = "Interactive Python execution server")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the websocket session protocol and the one-shot API (default)
    Serve {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Bind address, overrides the config file
        #[arg(short, long)]
        bind: Option<String>,

        /// Execution timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Interpreter binary
        #[arg(short, long)]
        interpreter: Option<String>,

        /// Also write logs to this file
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Run a source file once and print its output
    Run {
        /// Source file to execute
        file: PathBuf,

        /// Standard input supplied before the program starts
        #[arg(long)]
        input: Option<String>,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Execution timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Interpreter binary
        #[arg(short, long)]
        interpreter: Option<String>,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve {
            config,
            bind,
            timeout_ms,
            interpreter,
            log_file,
            verbose,
        }) => {
            let overrides = commands::Overrides {
                bind,
                timeout_ms,
                interpreter,
            };
            commands::serve(config, overrides, log_file, verbose).await
        }
        Some(Commands::Run {
            file,
            input,
            config,
            timeout_ms,
            interpreter,
            verbose,
        }) => {
            let overrides = commands::Overrides {
                bind: None,
                timeout_ms,
                interpreter,
            };
            let response = commands::run_file(file, input, config, overrides, verbose).await?;
            print!("{}", response.output);
            std::io::stdout().flush()?;
            if let Some(error) = &response.error {
                eprintln!("{}", error);
                std::process::exit(1);
            }
            Ok(())
        }
        None => commands::serve(None, commands::Overrides::default(), None, false).await,
    }
}
