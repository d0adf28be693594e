// src/commands/system.rs
//! Farm setup and the long-running server

use super::open_farm;
use crate::cli::Cli;
use anyhow::{Result, anyhow};
use buildfarm::timer;
use clap::CommandFactory;
use clap_complete::Shell;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::info;

/// Create the database, repository roots and job service state
pub fn cmd_init(config_path: Option<&Path>) -> Result<()> {
    let farm = open_farm(config_path)?;
    farm.init()?;
    println!(
        "Build farm initialized at {}",
        farm.config().paths.db.display()
    );
    Ok(())
}

/// Run a first pass, then the status sync timer until it fails
pub fn cmd_serve(config_path: Option<&Path>) -> Result<()> {
    let farm = Arc::new(open_farm(config_path)?);
    farm.init()?;

    let summary = farm.build()?;
    info!("Initial build pass started {} job(s)", summary.jobs_started());

    let stop = Arc::new(AtomicBool::new(false));
    let handle = timer::spawn(Arc::clone(&farm), stop)?;
    handle
        .join()
        .map_err(|_| anyhow!("status sync timer panicked"))??;
    Ok(())
}

/// Print shell completions to stdout
pub fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "buildfarm", &mut io::stdout());
    Ok(())
}
