//! # nxo
//!
//! Entry point for the nxo CLI.
//!
//! ## Startup
//!
//! 1. **Tracing** - `RUST_LOG` style filter, `info` by default
//! 2. **Configuration** - `--config` file if given, then `NXO_*` overrides
//! 3. **Command** - `validate`, `plan` or `run`
//!
//! ## Shutdown
//!
//! `run` stops every reconcile loop on Ctrl+C and waits for in-flight passes,
//! which observe the signal and abort their remote calls.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;
mod commands;
mod manifest;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use nxo_core::OperatorConfig;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;
use crate::commands::execute_command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing();

    let config = load_config(cli.config.as_deref())?;
    debug!(?config, "Configuration loaded");

    execute_command(cli.command, config).await
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load the operator configuration: file (or defaults), then environment.
fn load_config(path: Option<&Path>) -> Result<OperatorConfig> {
    let config = match path {
        Some(path) => OperatorConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => OperatorConfig::default(),
    }
    .with_env_overrides();

    config
        .validate()
        .context("Invalid configuration after environment overrides")?;
    Ok(config)
}
