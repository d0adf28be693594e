// src/main.rs

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Commands, ResetCommands, StagingCommands};

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Init => commands::cmd_init(config),
        Commands::Serve => commands::cmd_serve(config),
        Commands::Build {
            force_repo_update,
            no_repo_update,
        } => commands::cmd_build(config, force_repo_update, no_repo_update),
        Commands::Reconcile => commands::cmd_reconcile(config),
        Commands::Status => commands::cmd_status(config),
        Commands::Staging(cmd) => match cmd {
            StagingCommands::Init { branch } => commands::cmd_staging_init(config, &branch),
            StagingCommands::Remove { branch } => commands::cmd_staging_remove(config, &branch),
            StagingCommands::List => commands::cmd_staging_list(config),
        },
        Commands::GetDepends { branch } => commands::cmd_get_depends(config, &branch),
        Commands::Reset(cmd) => match cmd {
            ResetCommands::BuildingToFailed { yes } => {
                commands::cmd_reset_building_to_failed(config, yes)
            }
            ResetCommands::FailedToQueued { yes } => {
                commands::cmd_reset_failed_to_queued(config, yes)
            }
        },
        Commands::Callback {
            endpoint,
            headers,
            files,
        } => commands::cmd_callback(config, &endpoint, &headers, &files),
        Commands::Completions { shell } => commands::cmd_completions(shell),
    }
}
