// src/repo/symlink.rs

//! Symlink repositories
//!
//! Before anything is published, the WIP artifacts and the still-current
//! final artifacts are merged into a throwaway directory of symlinks. The
//! index built over that view is signed by a job; once the signed index
//! comes back, the final repo is updated from the view (`final_repo`).

use crate::db::models::Package;
use crate::error::{Error, Result};
use crate::farm::BuildFarm;
use crate::jobs;
use crate::repo::layout::RepoKind;
use crate::repo::{artifact, index, wip};
use rusqlite::Connection;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;
use tracing::{debug, info};

/// Recreate an empty symlink repo directory
fn clean(dir: &Path) -> Result<()> {
    if dir.exists() {
        debug!("Removing {}", dir.display());
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Fail if a package row has no artifact in either the WIP or the final repo
fn check_artifacts_present(
    conn: &Connection,
    wip_dir: &Path,
    final_dir: &Path,
    arch: &str,
    branch: &str,
    splitrepo: Option<&str>,
) -> Result<()> {
    for package in Package::list(conn, arch, branch, splitrepo)? {
        let file_name = artifact::file_name(&package.pkgname, &package.version);
        if !wip_dir.join(&file_name).exists() && !final_dir.join(&file_name).exists() {
            return Err(Error::RepoInconsistent(format!(
                "{file_name} is in the database but in neither {} nor {}",
                wip_dir.display(),
                final_dir.display()
            )));
        }
    }
    Ok(())
}

/// Link all WIP artifacts and the current final artifacts into the symlink repo
pub fn link_to_all_packages(
    farm: &BuildFarm,
    conn: &Connection,
    arch: &str,
    branch: &str,
    splitrepo: Option<&str>,
    force: bool,
) -> Result<usize> {
    let layout = farm.layout();
    let symlink_dir = layout.path(RepoKind::Symlink, Some(arch), branch, splitrepo);
    let wip_dir = layout.path(RepoKind::Wip, Some(arch), branch, splitrepo);
    let final_dir = layout.path(RepoKind::Final, Some(arch), branch, splitrepo);

    if !force {
        check_artifacts_present(conn, &wip_dir, &final_dir, arch, branch, splitrepo)?;
    }

    wip::clean(farm, conn, arch, branch, splitrepo)?;

    let mut linked = 0;
    for path in artifact::list(&wip_dir)? {
        if let Some(file_name) = path.file_name() {
            symlink(&path, symlink_dir.join(file_name))?;
            linked += 1;
        }
    }

    for path in artifact::list(&final_dir)? {
        let Some(file_name) = path.file_name() else {
            continue;
        };
        let target = symlink_dir.join(file_name);
        if target.exists() {
            continue;
        }
        if artifact::origin_in_db(conn, arch, branch, splitrepo, &path)?.is_some() {
            symlink(&path, target)?;
            linked += 1;
        }
    }

    debug!("Linked {} artifacts into {}", linked, symlink_dir.display());
    Ok(linked)
}

/// Merge WIP and final into the symlink repo, index it and request a signature
///
/// Skipped (returns false) when the WIP repo is empty, unless forced.
pub fn create(
    farm: &BuildFarm,
    conn: &Connection,
    arch: &str,
    branch: &str,
    splitrepo: Option<&str>,
    force: bool,
) -> Result<bool> {
    let layout = farm.layout();
    let wip_dir = layout.path(RepoKind::Wip, Some(arch), branch, splitrepo);
    let symlink_dir = layout.path(RepoKind::Symlink, Some(arch), branch, splitrepo);

    if !force && artifact::list(&wip_dir)?.is_empty() {
        debug!("{}/{}: WIP repo is empty, nothing to publish", branch, arch);
        return Ok(false);
    }

    info!(
        "{}/{}{}: creating symlink repo",
        branch,
        arch,
        splitrepo.map(|s| format!(" ({s})")).unwrap_or_default()
    );
    clean(&symlink_dir)?;
    link_to_all_packages(farm, conn, arch, branch, splitrepo, force)?;
    let index_path = index::write_index(&symlink_dir)?;
    sign(farm, conn, &index_path, arch, branch, splitrepo)?;
    Ok(true)
}

/// Make the unsigned index fetchable from the WIP repo and start the signing job
fn sign(
    farm: &BuildFarm,
    conn: &Connection,
    index_path: &Path,
    arch: &str,
    branch: &str,
    splitrepo: Option<&str>,
) -> Result<()> {
    let wip_dir = farm.layout().path(RepoKind::Wip, Some(arch), branch, splitrepo);
    fs::create_dir_all(&wip_dir)?;
    fs::copy(index_path, wip_dir.join(index::SYMLINK_INDEX_NAME))?;

    jobs::sign_index::run(farm, conn, arch, branch, splitrepo)?;
    Ok(())
}
