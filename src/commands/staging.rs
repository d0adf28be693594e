// src/commands/staging.rs
//! Staging branch commands

use super::open_farm;
use anyhow::Result;
use buildfarm::jobs;
use buildfarm::repo::staging;
use std::path::Path;

/// Create a staging branch and fetch its packages
pub fn cmd_staging_init(config_path: Option<&Path>, branch: &str) -> Result<()> {
    let farm = open_farm(config_path)?;
    let conn = farm.open_db()?;

    if !staging::init(&farm, &conn, branch)? {
        println!("Staging branch {} exists already", branch);
        return Ok(());
    }
    let job_id = jobs::get_depends::run(&farm, &conn, branch)?;
    println!("Created staging branch {} (get_depends job {})", branch, job_id);
    Ok(())
}

pub fn cmd_staging_remove(config_path: Option<&Path>, branch: &str) -> Result<()> {
    let farm = open_farm(config_path)?;
    let conn = farm.open_db()?;

    if staging::remove(&farm, &conn, branch)? {
        println!("Removed staging branch {}", branch);
    } else {
        println!("Staging branch {} does not exist", branch);
    }
    Ok(())
}

pub fn cmd_staging_list(config_path: Option<&Path>) -> Result<()> {
    let farm = open_farm(config_path)?;
    for branch in staging::discover(&farm)? {
        let kind = if staging::branch_split(&farm.config().branches, &branch.name).is_some() {
            "staging"
        } else {
            "branch"
        };
        println!("{:<8} {} ({})", kind, branch.name, branch.arches.join(", "));
    }
    Ok(())
}
