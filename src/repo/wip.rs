// src/repo/wip.rs

//! Work-in-progress repositories
//!
//! Build jobs upload their artifacts here. The WIP index is what later
//! jobs of the same branch install dependencies from, so it is rewritten
//! after every upload.

use crate::error::{Error, Result};
use crate::farm::BuildFarm;
use crate::repo::layout::RepoKind;
use crate::repo::{artifact, index};
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// Rewrite (and optionally sign) the index of a WIP repository
pub fn update_index(
    farm: &BuildFarm,
    arch: &str,
    branch: &str,
    splitrepo: Option<&str>,
) -> Result<()> {
    let dir = farm.layout().path(RepoKind::Wip, Some(arch), branch, splitrepo);
    if !dir.is_dir() {
        debug!("No WIP repo at {}, nothing to index", dir.display());
        return Ok(());
    }

    let index_path = index::write_index(&dir)?;
    if let Some(command) = &farm.config().signing.wip_command {
        sign(command, &index_path)?;
    }
    Ok(())
}

fn sign(command: &[String], index_path: &Path) -> Result<()> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| Error::ConfigError("signing.wip_command is empty".to_string()))?;

    let status = Command::new(program)
        .args(args)
        .arg(index_path)
        .status()
        .map_err(|e| Error::IoError(format!("Failed to run {program}: {e}")))?;

    if !status.success() {
        return Err(Error::IoError(format!(
            "Signing {} failed: {program} exited with {status}",
            index_path.display()
        )));
    }
    Ok(())
}

/// Remove WIP artifacts that are published already or no longer current
///
/// Returns the number of removed artifacts.
pub fn clean(
    farm: &BuildFarm,
    conn: &Connection,
    arch: &str,
    branch: &str,
    splitrepo: Option<&str>,
) -> Result<usize> {
    let layout = farm.layout();
    let wip_dir = layout.path(RepoKind::Wip, Some(arch), branch, splitrepo);
    let final_dir = layout.path(RepoKind::Final, Some(arch), branch, splitrepo);

    let mut removed = 0;
    for path in artifact::list(&wip_dir)? {
        let Some(file_name) = path.file_name() else {
            continue;
        };

        let reason = if final_dir.join(file_name).exists() {
            "exists in final repo"
        } else if artifact::origin_in_db(conn, arch, branch, splitrepo, &path)?.is_none() {
            "origin not in db"
        } else {
            continue;
        };

        info!("Removing {} from WIP repo: {}", path.display(), reason);
        fs::remove_file(&path)?;
        removed += 1;
    }

    if removed > 0 {
        update_index(farm, arch, branch, splitrepo)?;
    }
    Ok(removed)
}
