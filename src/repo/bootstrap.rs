// src/repo/bootstrap.rs

//! Repo bootstraps
//!
//! Some splitrepos (e.g. an alternate init system) need one seeding build
//! of a whole package set before packages in them can be built one by
//! one. Until that bootstrap is published, no ordinary package build
//! starts for the (arch, branch).

use crate::api::DependencyRecord;
use crate::db::models::{LogEntry, RepoBootstrap, RepoBootstrapStatus};
use crate::error::Result;
use crate::farm::BuildFarm;
use rusqlite::Connection;
use tracing::debug;

/// Configured bootstrap directories referenced by a dependency payload
///
/// Order of first appearance is kept.
pub fn needed(bootstrap_dirs: &[String], payload: &[DependencyRecord]) -> Vec<String> {
    let mut ret: Vec<String> = Vec::new();
    for record in payload {
        let Some(repo) = record.repo.as_deref() else {
            continue;
        };
        if bootstrap_dirs.iter().any(|d| d == repo) && !ret.iter().any(|r| r == repo) {
            ret.push(repo.to_string());
        }
    }
    ret
}

/// Queue bootstraps that the payload needs and that were never queued
///
/// Returns whether any new bootstrap row was created.
pub fn init(
    farm: &BuildFarm,
    conn: &Connection,
    payload: &[DependencyRecord],
    arch: &str,
    branch: &str,
) -> Result<bool> {
    let mut started = false;

    for splitrepo in needed(&farm.config().repo_bootstrap_dirs, payload) {
        if RepoBootstrap::find(conn, arch, branch, &splitrepo)?.is_some() {
            debug!("{}/{}/{}: repo bootstrap exists already", branch, splitrepo, arch);
            continue;
        }

        RepoBootstrap::new(arch, branch, &splitrepo).insert(conn)?;
        LogEntry {
            arch: Some(arch.to_string()),
            branch: Some(branch.to_string()),
            splitrepo: Some(splitrepo.clone()),
            ..LogEntry::new("repo_bootstrap_add")
        }
        .record(conn)?;
        started = true;
    }

    Ok(started)
}

/// Move a built bootstrap to published and run a build pass
///
/// Returns false (and does nothing) unless the bootstrap is `built`.
pub fn mark_published(farm: &BuildFarm, arch: &str, branch: &str, splitrepo: &str) -> Result<bool> {
    let conn = farm.open_db()?;
    let Some(mut rb) = RepoBootstrap::find(&conn, arch, branch, splitrepo)? else {
        return Ok(false);
    };
    if rb.status != RepoBootstrapStatus::Built {
        debug!(
            "{}/{}/{}: repo bootstrap is {}, not publishing",
            branch, splitrepo, arch, rb.status
        );
        return Ok(false);
    }

    rb.set_status(&conn, RepoBootstrapStatus::Published)?;
    LogEntry {
        arch: Some(arch.to_string()),
        branch: Some(branch.to_string()),
        splitrepo: Some(splitrepo.to_string()),
        job_id: rb.job_id,
        ..LogEntry::new("repo_bootstrap_published")
    }
    .record(&conn)?;
    drop(conn);

    farm.build()?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pkgname: &str, repo: Option<&str>) -> DependencyRecord {
        DependencyRecord {
            pkgname: pkgname.to_string(),
            repo: repo.map(str::to_string),
            version: "1-r0".to_string(),
            depends: Vec::new(),
        }
    }

    #[test]
    fn test_needed() {
        let dirs = vec!["systemd".to_string(), "musl-next".to_string()];
        let payload = vec![
            record("hello-world", Some("main")),
            record("systemd", Some("systemd")),
            record("systemd-boot", Some("systemd")),
            record("openrc", None),
        ];
        assert_eq!(needed(&dirs, &payload), vec!["systemd".to_string()]);
        assert!(needed(&dirs, &payload[..1]).is_empty());
    }
}
