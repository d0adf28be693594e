// src/cli/staging.rs
//! Staging branch commands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum StagingCommands {
    /// Create a staging branch (<origin>_staging_<name>)
    Init {
        /// Staging branch name
        branch: String,
    },

    /// Delete a staging branch with its repositories and packages
    Remove {
        /// Staging branch name
        branch: String,
    },

    /// List configured and staging branches
    List,
}
