// src/report.rs

//! Build farm status report

use crate::db::models::{
    Image, ImageStatus, Package, PackageStatus, RepoBootstrap, RepoBootstrapStatus,
};
use crate::error::Result;
use crate::farm::BuildFarm;
use crate::repo::staging;
use rusqlite::{Connection, params};
use std::fmt;

const PACKAGE_STATUSES: [PackageStatus; 5] = [
    PackageStatus::Queued,
    PackageStatus::Building,
    PackageStatus::Built,
    PackageStatus::Published,
    PackageStatus::Failed,
];

const IMAGE_STATUSES: [ImageStatus; 4] = [
    ImageStatus::Queued,
    ImageStatus::Building,
    ImageStatus::Published,
    ImageStatus::Failed,
];

const REPO_BOOTSTRAP_STATUSES: [RepoBootstrapStatus; 5] = [
    RepoBootstrapStatus::Queued,
    RepoBootstrapStatus::Building,
    RepoBootstrapStatus::Built,
    RepoBootstrapStatus::Published,
    RepoBootstrapStatus::Failed,
];

/// Per (branch, arch) package counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchBranchCounts {
    pub branch: String,
    pub arch: String,
    pub total: usize,
    pub unpublished: usize,
    /// Built or published without a job of their own (copied from the origin branch)
    pub synced: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub packages: Vec<(PackageStatus, usize)>,
    pub images: Vec<(ImageStatus, usize)>,
    pub repo_bootstraps: Vec<(RepoBootstrapStatus, usize)>,
    pub arch_branches: Vec<ArchBranchCounts>,
    /// Failed packages on branches whose errors are not ignored
    pub failed_relevant: usize,
    pub stuck: bool,
}

fn count(conn: &Connection, sql: &str, branch: &str, arch: &str) -> Result<usize> {
    let count: i64 = conn.query_row(sql, params![branch, arch], |row| row.get(0))?;
    Ok(count as usize)
}

impl StatusReport {
    pub fn collect(farm: &BuildFarm, conn: &Connection) -> Result<Self> {
        let mut packages = Vec::new();
        for status in PACKAGE_STATUSES {
            packages.push((status, Package::count_by_status(conn, status)?));
        }
        let mut images = Vec::new();
        for status in IMAGE_STATUSES {
            images.push((status, Image::count_by_status(conn, status)?));
        }
        let mut repo_bootstraps = Vec::new();
        for status in REPO_BOOTSTRAP_STATUSES {
            repo_bootstraps.push((status, RepoBootstrap::count_by_status(conn, status)?));
        }

        let mut arch_branches = Vec::new();
        let mut failed_relevant = 0;
        for branch in staging::discover(farm)? {
            for arch in &branch.arches {
                let total = count(
                    conn,
                    "SELECT COUNT(*) FROM packages WHERE branch = ?1 AND arch = ?2",
                    &branch.name,
                    arch,
                )?;
                let synced = count(
                    conn,
                    "SELECT COUNT(*) FROM packages
                     WHERE branch = ?1 AND arch = ?2 AND job_id IS NULL
                       AND status IN ('built', 'published')",
                    &branch.name,
                    arch,
                )?;
                if !branch.ignore_errors {
                    failed_relevant += count(
                        conn,
                        "SELECT COUNT(*) FROM packages
                         WHERE branch = ?1 AND arch = ?2 AND status = 'failed'",
                        &branch.name,
                        arch,
                    )?;
                }
                arch_branches.push(ArchBranchCounts {
                    branch: branch.name.clone(),
                    arch: arch.clone(),
                    total,
                    unpublished: Package::count_unpublished(conn, &branch.name, Some(arch))?,
                    synced,
                });
            }
        }

        let idle = packages.contains(&(PackageStatus::Building, 0))
            && images.contains(&(ImageStatus::Building, 0))
            && repo_bootstraps.contains(&(RepoBootstrapStatus::Building, 0));
        let stuck = idle && !packages.contains(&(PackageStatus::Queued, 0));

        Ok(Self {
            packages,
            images,
            repo_bootstraps,
            arch_branches,
            failed_relevant,
            stuck,
        })
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Packages:")?;
        for (status, n) in &self.packages {
            writeln!(f, "  {:<10} {}", status.as_str(), n)?;
        }
        writeln!(f, "Images:")?;
        for (status, n) in &self.images {
            writeln!(f, "  {:<10} {}", status.as_str(), n)?;
        }
        writeln!(f, "Repo bootstraps:")?;
        for (status, n) in &self.repo_bootstraps {
            writeln!(f, "  {:<10} {}", status.as_str(), n)?;
        }
        writeln!(f, "Repositories:")?;
        for counts in &self.arch_branches {
            writeln!(
                f,
                "  {}/{}: {} package(s), {} unpublished, {} synced",
                counts.branch, counts.arch, counts.total, counts.unpublished, counts.synced
            )?;
        }
        write!(f, "Failed (relevant): {}", self.failed_relevant)?;
        if self.stuck {
            write!(f, "\nNothing is building, but packages are queued")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    #[test]
    fn test_collect() {
        let temp = TempDir::new().unwrap();
        let farm = BuildFarm::new(Config::with_root(temp.path())).unwrap();
        farm.init().unwrap();
        let conn = farm.open_db().unwrap();

        let mut hello = Package::new("x86_64", "master", "hello-world", "1-r4");
        hello.insert(&conn).unwrap();
        hello.set_status(&conn, PackageStatus::Published).unwrap();

        let mut wrapper = Package::new("x86_64", "master", "hello-world-wrapper", "1-r2");
        wrapper.insert(&conn).unwrap();
        wrapper.set_status_and_job(&conn, PackageStatus::Building, Some(3)).unwrap();
        wrapper.set_status(&conn, PackageStatus::Failed).unwrap();

        let report = StatusReport::collect(&farm, &conn).unwrap();
        assert!(report.packages.contains(&(PackageStatus::Published, 1)));
        assert!(report.packages.contains(&(PackageStatus::Failed, 1)));
        assert_eq!(report.failed_relevant, 1);
        assert!(!report.stuck);

        let x86 = report
            .arch_branches
            .iter()
            .find(|c| c.branch == "master" && c.arch == "x86_64")
            .unwrap();
        assert_eq!(x86.total, 2);
        assert_eq!(x86.unpublished, 1);
        assert_eq!(x86.synced, 1);

        let text = report.to_string();
        assert!(text.contains("master/x86_64: 2 package(s), 1 unpublished, 1 synced"));
    }
}
