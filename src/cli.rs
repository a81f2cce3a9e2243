//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// nxo - desired-state reconciliation for repository managers
#[derive(Parser, Debug)]
#[command(name = "nxo")]
#[command(version)]
#[command(about = "Converge repository-manager entities to declared manifests")]
#[command(
    long_about = "nxo reads multi-document YAML manifests of repositories, blob stores, users, roles, cleanup policies and scripts, checks them against the admission rules, and drives a remote repository manager towards them."
)]
pub struct Cli {
    /// Operator configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check every declaration against the admission rules
    Validate {
        /// Manifest to check
        manifest: PathBuf,

        /// Previously applied manifest; matching declarations are checked as updates
        #[arg(short, long)]
        previous: Option<PathBuf>,
    },

    /// Show the remote calls one pass over the manifest would make
    Plan {
        /// Manifest to plan
        manifest: PathBuf,

        /// JSON snapshot of the remote's current entities
        #[arg(short, long)]
        remote: Option<PathBuf>,

        /// Print the plan as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Reconcile the manifest continuously until Ctrl+C
    Run {
        /// Manifest to reconcile
        manifest: PathBuf,

        /// JSON snapshot of the remote's current entities
        #[arg(short, long)]
        remote: Option<PathBuf>,
    },
}
