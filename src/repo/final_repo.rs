// src/repo/final_repo.rs

//! Final (published) repositories
//!
//! Updated from the symlink repo once its index has been signed.

use crate::db::models::PackageStatus;
use crate::error::Result;
use crate::farm::BuildFarm;
use crate::repo::layout::RepoKind;
use crate::repo::status::{self, FixStats};
use crate::repo::{artifact, index};
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Copy artifacts that are not in the final repo yet
fn copy_new_artifacts(symlink_dir: &Path, final_dir: &Path) -> Result<usize> {
    let mut copied = 0;
    for path in artifact::list(symlink_dir)? {
        let Some(file_name) = path.file_name() else {
            continue;
        };
        let target = final_dir.join(file_name);

        let source = fs::canonicalize(&path)?;
        if target.exists() && fs::canonicalize(&target)? == source {
            continue;
        }

        debug!("Copying {} to {}", source.display(), target.display());
        fs::copy(&source, &target)?;
        copied += 1;
    }
    Ok(copied)
}

/// Delete final artifacts that are not part of the symlink view
fn delete_outdated_artifacts(symlink_dir: &Path, final_dir: &Path) -> Result<usize> {
    let mut deleted = 0;
    for path in artifact::list(final_dir)? {
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if symlink_dir.join(file_name).exists() {
            continue;
        }

        info!("Removing outdated {}", path.display());
        fs::remove_file(&path)?;
        deleted += 1;
    }
    Ok(deleted)
}

/// Publish the signed symlink repo into the final repo
pub fn update_from_symlink_repo(
    farm: &BuildFarm,
    conn: &Connection,
    arch: &str,
    branch: &str,
    splitrepo: Option<&str>,
) -> Result<FixStats> {
    let layout = farm.layout();
    let symlink_dir = layout.path(RepoKind::Symlink, Some(arch), branch, splitrepo);
    let final_dir = layout.path(RepoKind::Final, Some(arch), branch, splitrepo);
    fs::create_dir_all(&final_dir)?;

    let copied = copy_new_artifacts(&symlink_dir, &final_dir)?;

    let index_tmp = final_dir.join(format!(".{}.new", index::INDEX_NAME));
    fs::copy(symlink_dir.join(index::INDEX_NAME), &index_tmp)?;
    fs::rename(&index_tmp, final_dir.join(index::INDEX_NAME))?;

    let deleted = delete_outdated_artifacts(&symlink_dir, &final_dir)?;
    info!(
        "{}/{}: final repo updated ({} new, {} removed)",
        branch, arch, copied, deleted
    );

    status::fix_disk_vs_db(
        conn,
        &final_dir,
        arch,
        branch,
        splitrepo,
        PackageStatus::Published,
        false,
        None,
    )
}
