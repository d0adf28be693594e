// src/commands/reset.rs
//! Maintenance resets

use super::open_farm;
use anyhow::Result;
use buildfarm::db::models::{Image, LogEntry, Package, RepoBootstrap};
use std::io::{self, BufRead, Write};
use std::path::Path;

/// Ask on stdin; anything but "y" or "yes" declines
fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

pub fn cmd_reset_building_to_failed(config_path: Option<&Path>, yes: bool) -> Result<()> {
    if !yes && !confirm("Mark all building packages, images and repo bootstraps as failed?")? {
        println!("Aborted");
        return Ok(());
    }

    let farm = open_farm(config_path)?;
    let conn = farm.open_db()?;
    let packages = Package::building_to_failed(&conn)?;
    let images = Image::building_to_failed(&conn)?;
    let bootstraps = RepoBootstrap::building_to_failed(&conn)?;
    LogEntry {
        count: Some((packages + images + bootstraps) as i64),
        ..LogEntry::new("reset_building_to_failed")
    }
    .record(&conn)?;

    println!(
        "Marked as failed: {} package(s), {} image(s), {} repo bootstrap(s)",
        packages, images, bootstraps
    );
    Ok(())
}

pub fn cmd_reset_failed_to_queued(config_path: Option<&Path>, yes: bool) -> Result<()> {
    if !yes && !confirm("Queue all failed packages, images and repo bootstraps again?")? {
        println!("Aborted");
        return Ok(());
    }

    let farm = open_farm(config_path)?;
    let conn = farm.open_db()?;
    let packages = Package::failed_to_queued(&conn)?;
    let images = Image::failed_to_queued(&conn)?;
    let bootstraps = RepoBootstrap::failed_to_queued(&conn)?;
    LogEntry {
        count: Some((packages + images + bootstraps) as i64),
        ..LogEntry::new("reset_failed_to_queued")
    }
    .record(&conn)?;
    drop(conn);

    println!(
        "Queued again: {} package(s), {} image(s), {} repo bootstrap(s)",
        packages, images, bootstraps
    );
    farm.build()?;
    Ok(())
}
