// src/repo/staging.rs

//! Staging branches
//!
//! A staging branch is named `<origin>_staging_<name>` and exists only as a
//! README marker in the final repository tree. Staging branches are built
//! for a fixed set of arches, and their failures never raise alarms.
//! Packages that are already finalized on the origin branch are copied
//! over instead of being rebuilt.

use crate::config::BranchConfig;
use crate::db::models::{LogEntry, Package, PackageStatus};
use crate::error::{Error, Result};
use crate::farm::BuildFarm;
use crate::repo::layout::RepoKind;
use crate::repo::{artifact, wip};
use rusqlite::Connection;
use std::fs;
use tracing::{debug, info, warn};

pub const STAGING_SEPARATOR: &str = "_staging_";

/// Name of the staging branch `name` of `origin`
pub fn join(origin: &str, name: &str) -> String {
    format!("{origin}{STAGING_SEPARATOR}{name}")
}

/// Split a staging branch into (origin, name) if its origin is one of `origins`
pub fn split_known<'a, S: AsRef<str>>(origins: &[S], branch: &'a str) -> Option<(&'a str, &'a str)> {
    let (origin, name) = branch.split_once(STAGING_SEPARATOR)?;
    origins
        .iter()
        .any(|o| o.as_ref() == origin)
        .then_some((origin, name))
}

/// Split a staging branch into (origin, name); `None` for anything else
pub fn branch_split<'a>(branches: &[BranchConfig], branch: &'a str) -> Option<(&'a str, &'a str)> {
    let origins: Vec<&str> = branches.iter().map(|b| b.name.as_str()).collect();
    split_known(&origins, branch)
}

/// Counters reported by `sync_with_origin`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub skipped_already_synced: usize,
    pub skipped_not_applicable: usize,
    pub synced_subpackage: usize,
    pub synced: usize,
}

const MARKER_TEXT: &str = "This is a staging branch. Packages are built here from a \
change set before it is merged into the origin branch.\n";

/// Create the staging repository marker; returns false if it already existed
pub fn init(farm: &BuildFarm, conn: &Connection, branch: &str) -> Result<bool> {
    let (origin, name) = branch_split(&farm.config().branches, branch)
        .ok_or_else(|| Error::InvalidRequest(format!("not a staging branch: {branch}")))?;

    let marker = farm.layout().staging_marker(origin, name);
    if marker.exists() {
        debug!("Staging branch {} already exists", branch);
        return Ok(false);
    }

    if let Some(parent) = marker.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&marker, MARKER_TEXT)?;

    LogEntry {
        branch: Some(branch.to_string()),
        ..LogEntry::new("init_staging_repo")
    }
    .record(conn)?;
    Ok(true)
}

/// Configured branches followed by the staging branches found on disk
pub fn discover(farm: &BuildFarm) -> Result<Vec<BranchConfig>> {
    let config = farm.config();
    let mut branches = config.branches.clone();

    let staging_root = farm.layout().root(RepoKind::Final).join("staging");
    let pattern = format!("{}/*/*/README", staging_root.display());
    let paths = glob::glob(&pattern)
        .map_err(|e| Error::ConfigError(format!("Invalid staging glob {pattern}: {e}")))?;

    let mut found: Vec<(String, String)> = Vec::new();
    for path in paths {
        let path = path.map_err(|e| Error::IoError(e.to_string()))?;
        let origin_dir = path.parent();
        let origin = origin_dir.and_then(|p| p.file_name()).and_then(|n| n.to_str());
        let name = origin_dir
            .and_then(|p| p.parent())
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str());

        if let (Some(origin), Some(name)) = (origin, name) {
            found.push((origin.to_string(), name.to_string()));
        }
    }
    found.sort();

    for origin in &config.branches {
        for (found_origin, name) in &found {
            if *found_origin != origin.name {
                continue;
            }
            branches.push(BranchConfig {
                name: join(&origin.name, name),
                arches: config.staging.arches.clone(),
                ignore_errors: true,
                pmb_branch: origin.pmb_branch.clone(),
            });
        }
    }

    Ok(branches)
}

/// Copy packages that are finalized on the origin branch into the staging WIP repo
pub fn sync_with_origin(
    farm: &BuildFarm,
    conn: &Connection,
    branch: &str,
    arch: &str,
    splitrepo: Option<&str>,
) -> Result<SyncStats> {
    let mut stats = SyncStats::default();
    let Some((origin, _)) = branch_split(&farm.config().branches, branch) else {
        return Ok(stats);
    };

    if Package::count_unpublished(conn, origin, None)? > 0 {
        debug!("{}: origin {} is not published yet, not syncing", branch, origin);
        return Ok(stats);
    }

    let layout = farm.layout();
    let origin_final = layout.path(RepoKind::Final, Some(arch), origin, splitrepo);
    let staging_final = layout.path(RepoKind::Final, Some(arch), branch, splitrepo);
    let staging_wip = layout.path(RepoKind::Wip, Some(arch), branch, splitrepo);

    for path in artifact::list(&origin_final)? {
        let Some(file_name) = path.file_name() else {
            continue;
        };

        if staging_final.join(file_name).exists() || staging_wip.join(file_name).exists() {
            stats.skipped_already_synced += 1;
            continue;
        }

        let Some(info) = artifact::origin_in_db(conn, arch, branch, splitrepo, &path)? else {
            stats.skipped_not_applicable += 1;
            continue;
        };

        fs::create_dir_all(&staging_wip)?;
        fs::copy(&path, staging_wip.join(file_name))?;

        let mut package = Package::find(conn, arch, branch, &info.origin)?.ok_or_else(|| {
            Error::NotFound(format!("package {} in {}/{}", info.origin, branch, arch))
        })?;

        if package.job_id.is_none() && package.status == PackageStatus::Built {
            stats.synced_subpackage += 1;
        } else {
            stats.synced += 1;
        }
        package.set_status_and_job(conn, PackageStatus::Built, None)?;
    }

    if stats.synced > 0 {
        wip::update_index(farm, arch, branch, splitrepo)?;
        LogEntry {
            arch: Some(arch.to_string()),
            branch: Some(branch.to_string()),
            splitrepo: splitrepo.map(str::to_string),
            count: Some(stats.synced as i64),
            ..LogEntry::new("sync_with_origin")
        }
        .record(conn)?;
    }

    debug!("{}/{}: sync with origin: {:?}", branch, arch, stats);
    Ok(stats)
}

/// Delete a staging branch with all of its repositories and packages
pub fn remove(farm: &BuildFarm, conn: &Connection, branch: &str) -> Result<bool> {
    let Some((origin, name)) = branch_split(&farm.config().branches, branch) else {
        warn!("Not removing {}: not a staging branch", branch);
        return Ok(false);
    };

    let layout = farm.layout();
    let mut splitrepos: Vec<Option<&str>> = vec![None];
    splitrepos.extend(farm.config().repo_bootstrap_dirs.iter().map(|s| Some(s.as_str())));

    for kind in [RepoKind::Final, RepoKind::Wip] {
        for splitrepo in &splitrepos {
            let dir = layout.path(kind, None, branch, *splitrepo);
            if dir.exists() {
                info!("Removing {}", dir.display());
                fs::remove_dir_all(&dir)?;
            }

            // staging/<name> once no origin is left in it
            if let Some(name_dir) = dir.parent()
                && name_dir.ends_with(name)
                && name_dir.is_dir()
                && fs::read_dir(name_dir)?.next().is_none()
            {
                fs::remove_dir(name_dir)?;
            }
        }
    }

    let deleted = Package::delete_branch(conn, branch)?;
    LogEntry {
        branch: Some(branch.to_string()),
        count: Some(deleted as i64),
        ..LogEntry::new("remove_staging_repo")
    }
    .record(conn)?;

    info!("Removed staging branch {} of {}", name, origin);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branches() -> Vec<BranchConfig> {
        vec![
            BranchConfig::new("master", &["x86_64"]),
            BranchConfig::new("v24.06", &["x86_64"]),
        ]
    }

    #[test]
    fn test_branch_split() {
        let branches = branches();
        assert_eq!(
            branch_split(&branches, "master_staging_test"),
            Some(("master", "test"))
        );
        assert_eq!(
            branch_split(&branches, "v24.06_staging_my_feature"),
            Some(("v24.06", "my_feature"))
        );
        assert_eq!(branch_split(&branches, "master"), None);
        assert_eq!(branch_split(&branches, "v1_staging_test"), None);
    }

    #[test]
    fn test_join_split_round_trip() {
        let branches = branches();
        for origin in ["master", "v24.06"] {
            for name in ["test", "", "a-b.c", "x_y"] {
                let joined = join(origin, name);
                assert_eq!(branch_split(&branches, &joined), Some((origin, name)));
            }
        }
    }
}
