// src/commands/build.rs
//! Scheduler commands

use super::open_farm;
use anyhow::{Result, bail};
use buildfarm::jobs;
use buildfarm::report::StatusReport;
use buildfarm::repo::staging;
use buildfarm::scheduler::PassOptions;
use std::path::Path;

/// Run one build pass and print what it did
pub fn cmd_build(
    config_path: Option<&Path>,
    force_repo_update: Option<String>,
    no_repo_update: bool,
) -> Result<()> {
    let farm = open_farm(config_path)?;
    let options = PassOptions {
        force_repo_update_branch: force_repo_update,
        no_repo_update,
    };
    let summary = farm.build_with(&options)?;

    println!("Jobs started: {}", summary.jobs_started());
    for name in summary
        .started
        .iter()
        .chain(&summary.bootstraps_started)
        .chain(&summary.images_started)
    {
        println!("  {}", name);
    }
    for repo in &summary.published {
        println!("Publishing: {}", repo);
    }
    for repo in &summary.stuck {
        println!("Stuck: {}", repo);
    }
    Ok(())
}

pub fn cmd_reconcile(config_path: Option<&Path>) -> Result<()> {
    let farm = open_farm(config_path)?;
    let changed = jobs::reconcile(&farm)?;
    println!("{} status change(s)", changed);
    Ok(())
}

pub fn cmd_status(config_path: Option<&Path>) -> Result<()> {
    let farm = open_farm(config_path)?;
    let conn = farm.open_db()?;
    let report = StatusReport::collect(&farm, &conn)?;
    println!("{}", report);
    Ok(())
}

/// Start a get_depends job for a configured or staging branch
pub fn cmd_get_depends(config_path: Option<&Path>, branch: &str) -> Result<()> {
    let farm = open_farm(config_path)?;
    if !staging::discover(&farm)?.iter().any(|b| b.name == branch) {
        bail!("unknown branch: {}", branch);
    }

    let conn = farm.open_db()?;
    let job_id = jobs::get_depends::run(&farm, &conn, branch)?;
    println!("Started get_depends job {}: {}", job_id, farm.backend().link(job_id));
    Ok(())
}
