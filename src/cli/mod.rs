// src/cli/mod.rs
//! CLI definitions for the build farm
//!
//! This module contains the command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.
//!
//! - `init` / `serve` - Set up the farm, run the status sync timer
//! - `build` / `reconcile` / `status` - Drive and inspect the scheduler
//! - `staging` - Staging branch management
//! - `get-depends` - Refresh packages and dependencies of a branch
//! - `reset` - Maintenance status resets
//! - `callback` - Deliver job results (used by local jobs)

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

mod reset;
mod staging;

pub use reset::ResetCommands;
pub use staging::StagingCommands;

#[derive(Parser)]
#[command(name = "buildfarm")]
#[command(author = "Buildfarm Contributors")]
#[command(version)]
#[command(about = "Build scheduler and repository publisher for a distribution build farm", long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database, repository roots and job service state
    Init,

    /// Run the status sync timer until a fatal error occurs
    Serve,

    /// Run one build pass
    Build {
        /// Republish this branch even if nothing new was built
        #[arg(long, value_name = "BRANCH")]
        force_repo_update: Option<String>,

        /// Never update the symlink and final repositories
        #[arg(long, conflicts_with = "force_repo_update")]
        no_repo_update: bool,
    },

    /// Sync the status of building jobs with the job service
    Reconcile,

    /// Show package, image and repo bootstrap counts
    Status,

    /// Staging branch management
    #[command(subcommand)]
    Staging(StagingCommands),

    /// Start a job that refreshes packages and dependencies of a branch
    GetDepends {
        /// Branch name
        branch: String,
    },

    /// Maintenance status resets
    #[command(subcommand)]
    Reset(ResetCommands),

    /// Deliver the results of a job to a callback endpoint
    Callback {
        /// Endpoint (build-package, build-image, repo-bootstrap, sign-index,
        /// get-depends, update-job-status)
        endpoint: String,

        /// Identity header as Key=Value (repeatable)
        #[arg(short = 'H', long = "header", value_name = "KEY=VALUE")]
        headers: Vec<String>,

        /// Files to upload
        files: Vec<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
