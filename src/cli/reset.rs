// src/cli/reset.rs
//! Maintenance resets

use clap::Subcommand;

#[derive(Subcommand)]
pub enum ResetCommands {
    /// Mark every building package, image and repo bootstrap as failed
    BuildingToFailed {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Queue every failed package, image and repo bootstrap again
    FailedToQueued {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}
