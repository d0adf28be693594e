// src/repo/status.rs

//! Reconcile package status with the artifacts found on disk

use crate::db::models::{Package, PackageStatus};
use crate::error::Result;
use crate::repo::artifact;
use rusqlite::Connection;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Result of `fix_disk_vs_db`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixStats {
    /// Packages moved to the target status
    pub updated: usize,
    /// Artifacts deleted because no current package matched them
    pub removed: usize,
}

/// Set every package with a current artifact in `dir` to `status`
///
/// A package is counted once even when several artifacts (sub-packages)
/// share its origin. With `job_id` set, only packages without a job id or
/// with that job id match, and they get it assigned. With
/// `remove_unexpected`, artifacts that match no package are deleted.
#[allow(clippy::too_many_arguments)]
pub fn fix_disk_vs_db(
    conn: &Connection,
    dir: &Path,
    arch: &str,
    branch: &str,
    splitrepo: Option<&str>,
    status: PackageStatus,
    remove_unexpected: bool,
    job_id: Option<i64>,
) -> Result<FixStats> {
    let mut stats = FixStats::default();
    let mut seen: HashSet<String> = HashSet::new();

    for path in artifact::list(dir)? {
        let info = artifact::read_info(&path)?;
        let package = Package::find(conn, arch, branch, &info.origin)?.filter(|p| {
            p.version == info.pkgver
                && p.splitrepo.as_deref() == splitrepo
                && (job_id.is_none() || p.job_id.is_none() || p.job_id == job_id)
        });

        let Some(mut package) = package else {
            if remove_unexpected {
                warn!("Removing unexpected artifact {}", path.display());
                fs::remove_file(&path)?;
                stats.removed += 1;
            }
            continue;
        };

        if !seen.insert(package.pkgname.clone()) {
            continue;
        }

        if !package.status.can_transition_to(status) {
            warn!(
                "{}: not changing {} from {} to {}",
                path.display(),
                package.pkgname,
                package.status,
                status
            );
            continue;
        }

        let new_job_id = job_id.or(package.job_id);
        if package.status != status || package.job_id != new_job_id {
            debug!("{}: {} -> {}", package.pkgname, package.status, status);
            package.set_status_and_job(conn, status, new_job_id)?;
        }
        stats.updated += 1;
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::repo::artifact::tests::write_artifact;
    use tempfile::TempDir;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::migrate(&conn).unwrap();
        conn
    }

    #[test]
    fn test_subpackages_count_once() {
        let conn = conn();
        let dir = TempDir::new().unwrap();
        let mut package = Package::new("x86_64", "master", "hello-world", "1-r4");
        package.insert(&conn).unwrap();
        package.set_status(&conn, PackageStatus::Built).unwrap();

        write_artifact(dir.path(), "hello-world", "1-r4", "hello-world");
        write_artifact(dir.path(), "hello-world-doc", "1-r4", "hello-world");

        let stats = fix_disk_vs_db(
            &conn,
            dir.path(),
            "x86_64",
            "master",
            None,
            PackageStatus::Published,
            false,
            None,
        )
        .unwrap();
        assert_eq!(stats, FixStats { updated: 1, removed: 0 });

        let stored = Package::find(&conn, "x86_64", "master", "hello-world")
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, PackageStatus::Published);
    }

    #[test]
    fn test_unexpected_artifacts_are_removed() {
        let conn = conn();
        let dir = TempDir::new().unwrap();
        let mut package = Package::new("x86_64", "master", "hello-world", "1-r4");
        package.insert(&conn).unwrap();

        write_artifact(dir.path(), "hello-world", "1-r3", "hello-world");
        let stats = fix_disk_vs_db(
            &conn,
            dir.path(),
            "x86_64",
            "master",
            None,
            PackageStatus::Built,
            true,
            Some(9),
        )
        .unwrap();
        assert_eq!(stats, FixStats { updated: 0, removed: 1 });
        assert!(artifact::list(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_expected_job_id_is_assigned() {
        let conn = conn();
        let dir = TempDir::new().unwrap();
        let mut package = Package::new("x86_64", "master", "systemd", "255-r0");
        package.splitrepo = Some("systemd".to_string());
        package.insert(&conn).unwrap();

        write_artifact(dir.path(), "systemd", "255-r0", "systemd");
        let stats = fix_disk_vs_db(
            &conn,
            dir.path(),
            "x86_64",
            "master",
            Some("systemd"),
            PackageStatus::Built,
            true,
            Some(9),
        )
        .unwrap();
        assert_eq!(stats.updated, 1);

        let stored = Package::find(&conn, "x86_64", "master", "systemd").unwrap().unwrap();
        assert_eq!(stored.status, PackageStatus::Built);
        assert_eq!(stored.job_id, Some(9));
    }
}
