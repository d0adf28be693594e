// src/db/models/package.rs

//! Package model - one live build row per package, arch, branch and splitrepo
//!
//! Rows are overwritten when a new version is reported, never versioned.
//! Dependencies are kept in the `package_dependencies` edge table and
//! loaded as plain status lists, so readiness can be decided without a
//! database (see `scheduler::depends_ready`).

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Build status of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageStatus {
    Queued,
    Building,
    Built,
    Published,
    Failed,
}

impl PackageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageStatus::Queued => "queued",
            PackageStatus::Building => "building",
            PackageStatus::Built => "built",
            PackageStatus::Published => "published",
            PackageStatus::Failed => "failed",
        }
    }

    /// Whether a row in this status may be moved to `next`
    pub fn can_transition_to(self, next: PackageStatus) -> bool {
        use PackageStatus::*;

        self == next
            || matches!(
                (self, next),
                (Queued, Building | Built | Published)
                    | (Building, Built | Failed | Queued)
                    | (Built, Published | Queued)
                    | (Published, Queued | Built)
                    | (Failed, Building | Queued | Built | Published)
            )
    }

    /// Built or published: usable as a dependency
    pub fn is_done(self) -> bool {
        matches!(self, PackageStatus::Built | PackageStatus::Published)
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(PackageStatus::Queued),
            "building" => Ok(PackageStatus::Building),
            "built" => Ok(PackageStatus::Built),
            "published" => Ok(PackageStatus::Published),
            "failed" => Ok(PackageStatus::Failed),
            _ => Err(format!("Invalid package status: {s}")),
        }
    }
}

const COLUMNS: &str = "id, arch, branch, pkgname, version, status, job_id, retry_count, splitrepo";

/// A package build row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub id: Option<i64>,
    pub arch: String,
    pub branch: String,
    pub pkgname: String,
    pub version: String,
    pub status: PackageStatus,
    pub job_id: Option<i64>,
    pub retry_count: i64,
    pub splitrepo: Option<String>,
}

impl Package {
    /// Create a new queued package
    pub fn new(arch: &str, branch: &str, pkgname: &str, version: &str) -> Self {
        Self {
            id: None,
            arch: arch.to_string(),
            branch: branch.to_string(),
            pkgname: pkgname.to_string(),
            version: version.to_string(),
            status: PackageStatus::Queued,
            job_id: None,
            retry_count: 0,
            splitrepo: None,
        }
    }

    /// Insert this package into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO packages (arch, branch, pkgname, version, status, job_id, retry_count, splitrepo)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &self.arch,
                &self.branch,
                &self.pkgname,
                &self.version,
                self.status.as_str(),
                self.job_id,
                self.retry_count,
                &self.splitrepo,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let sql = format!("SELECT {COLUMNS} FROM packages WHERE id = ?1");
        let package = conn.query_row(&sql, [id], Self::from_row).optional()?;
        Ok(package)
    }

    /// Find a package by name, regardless of its splitrepo
    pub fn find(conn: &Connection, arch: &str, branch: &str, pkgname: &str) -> Result<Option<Self>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM packages
             WHERE arch = ?1 AND branch = ?2 AND pkgname = ?3
             ORDER BY id LIMIT 1"
        );
        let package = conn
            .query_row(&sql, params![arch, branch, pkgname], Self::from_row)
            .optional()?;
        Ok(package)
    }

    /// All packages of one (arch, branch, splitrepo) repository
    pub fn list(
        conn: &Connection,
        arch: &str,
        branch: &str,
        splitrepo: Option<&str>,
    ) -> Result<Vec<Self>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM packages
             WHERE arch = ?1 AND branch = ?2 AND splitrepo IS ?3
             ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let packages = stmt
            .query_map(params![arch, branch, splitrepo], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(packages)
    }

    /// All packages of one (arch, branch), any splitrepo
    pub fn list_arch_branch(conn: &Connection, arch: &str, branch: &str) -> Result<Vec<Self>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM packages WHERE arch = ?1 AND branch = ?2 ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let packages = stmt
            .query_map(params![arch, branch], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(packages)
    }

    pub fn list_by_status(conn: &Connection, status: PackageStatus) -> Result<Vec<Self>> {
        let sql = format!("SELECT {COLUMNS} FROM packages WHERE status = ?1 ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let packages = stmt
            .query_map([status.as_str()], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(packages)
    }

    /// Failed and queued packages of one (arch, branch), oldest first
    pub fn list_candidates(conn: &Connection, arch: &str, branch: &str) -> Result<Vec<Self>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM packages
             WHERE arch = ?1 AND branch = ?2 AND status IN ('failed', 'queued')
             ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let packages = stmt
            .query_map(params![arch, branch], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(packages)
    }

    pub fn count_by_status(conn: &Connection, status: PackageStatus) -> Result<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM packages WHERE status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Packages of a branch (optionally one arch) that are not published yet
    pub fn count_unpublished(conn: &Connection, branch: &str, arch: Option<&str>) -> Result<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM packages
             WHERE branch = ?1 AND (?2 IS NULL OR arch = ?2) AND status != 'published'",
            params![branch, arch],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Whether any package of (arch, branch) is failed, building or queued
    pub fn has_unfinished(conn: &Connection, arch: &str, branch: &str) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM packages
             WHERE arch = ?1 AND branch = ?2 AND status IN ('failed', 'building', 'queued')",
            params![arch, branch],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Whether `pkgname` is recorded at exactly `version`
    pub fn has_version(
        conn: &Connection,
        arch: &str,
        branch: &str,
        splitrepo: Option<&str>,
        pkgname: &str,
        version: &str,
    ) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM packages
             WHERE arch = ?1 AND branch = ?2 AND splitrepo IS ?3 AND pkgname = ?4 AND version = ?5",
            params![arch, branch, splitrepo, pkgname, version],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Distinct splitrepos with packages in (arch, branch); the main repo sorts first
    pub fn splitrepos(conn: &Connection, arch: &str, branch: &str) -> Result<Vec<Option<String>>> {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT splitrepo FROM packages
             WHERE arch = ?1 AND branch = ?2 ORDER BY splitrepo",
        )?;
        let splitrepos = stmt
            .query_map(params![arch, branch], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(splitrepos)
    }

    fn require_id(&self) -> Result<i64> {
        self.id.ok_or_else(|| {
            Error::NotFound(format!("package {} has not been stored", self.pkgname))
        })
    }

    fn check_transition(&self, next: PackageStatus) -> Result<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                entity: "package",
                from: self.status.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Change the status, keeping the job id
    pub fn set_status(&mut self, conn: &Connection, status: PackageStatus) -> Result<()> {
        let job_id = self.job_id;
        self.set_status_and_job(conn, status, job_id)
    }

    /// Change status and job id together
    pub fn set_status_and_job(
        &mut self,
        conn: &Connection,
        status: PackageStatus,
        job_id: Option<i64>,
    ) -> Result<()> {
        let id = self.require_id()?;
        self.check_transition(status)?;

        conn.execute(
            "UPDATE packages SET status = ?1, job_id = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?3",
            params![status.as_str(), job_id, id],
        )?;

        self.status = status;
        self.job_id = job_id;
        Ok(())
    }

    pub fn increment_retry_count(&mut self, conn: &Connection) -> Result<()> {
        let id = self.require_id()?;
        conn.execute(
            "UPDATE packages SET retry_count = retry_count + 1 WHERE id = ?1",
            [id],
        )?;
        self.retry_count += 1;
        Ok(())
    }

    /// Overwrite the row with a new version: queued again, retries reset
    pub fn update_version(&mut self, conn: &Connection, version: &str) -> Result<()> {
        let id = self.require_id()?;
        self.check_transition(PackageStatus::Queued)?;

        conn.execute(
            "UPDATE packages
             SET version = ?1, status = 'queued', job_id = NULL, retry_count = 0,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?2",
            params![version, id],
        )?;

        self.version = version.to_string();
        self.status = PackageStatus::Queued;
        self.job_id = None;
        self.retry_count = 0;
        Ok(())
    }

    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        conn.execute("DELETE FROM packages WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Delete every package of a branch, returning how many were removed
    pub fn delete_branch(conn: &Connection, branch: &str) -> Result<usize> {
        let count = conn.execute("DELETE FROM packages WHERE branch = ?1", [branch])?;
        Ok(count)
    }

    /// Replace the dependency edges of a package
    pub fn set_depends(conn: &Connection, id: i64, dependency_ids: &[i64]) -> Result<()> {
        conn.execute("DELETE FROM package_dependencies WHERE package_id = ?1", [id])?;

        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO package_dependencies (package_id, dependency_id) VALUES (?1, ?2)",
        )?;
        for dependency_id in dependency_ids {
            stmt.execute(params![id, dependency_id])?;
        }
        Ok(())
    }

    /// Packages this package depends on
    pub fn depends(conn: &Connection, id: i64) -> Result<Vec<Self>> {
        let sql = format!(
            "SELECT {} FROM packages p
             JOIN package_dependencies d ON d.dependency_id = p.id
             WHERE d.package_id = ?1 ORDER BY p.id",
            prefixed_columns("p")
        );
        let mut stmt = conn.prepare(&sql)?;
        let packages = stmt
            .query_map([id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(packages)
    }

    /// Statuses of the dependencies of every package in (arch, branch)
    ///
    /// Packages without dependencies are absent from the map.
    pub fn dependency_statuses(
        conn: &Connection,
        arch: &str,
        branch: &str,
    ) -> Result<HashMap<i64, Vec<PackageStatus>>> {
        let mut stmt = conn.prepare(
            "SELECT d.package_id, dep.status FROM package_dependencies d
             JOIN packages p ON p.id = d.package_id
             JOIN packages dep ON dep.id = d.dependency_id
             WHERE p.arch = ?1 AND p.branch = ?2",
        )?;
        let rows = stmt
            .query_map(params![arch, branch], |row| {
                Ok((row.get::<_, i64>(0)?, status_column(row, 1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut statuses: HashMap<i64, Vec<PackageStatus>> = HashMap::new();
        for (package_id, status) in rows {
            statuses.entry(package_id).or_default().push(status);
        }
        Ok(statuses)
    }

    /// Maintenance: mark every building package as failed
    pub fn building_to_failed(conn: &Connection) -> Result<usize> {
        let count = conn.execute(
            "UPDATE packages SET status = 'failed', updated_at = CURRENT_TIMESTAMP
             WHERE status = 'building'",
            [],
        )?;
        Ok(count)
    }

    /// Maintenance: queue every failed package again
    pub fn failed_to_queued(conn: &Connection) -> Result<usize> {
        let count = conn.execute(
            "UPDATE packages SET status = 'queued', retry_count = 0, updated_at = CURRENT_TIMESTAMP
             WHERE status = 'failed'",
            [],
        )?;
        Ok(count)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let status = status_column(row, 5)?;

        Ok(Self {
            id: Some(row.get(0)?),
            arch: row.get(1)?,
            branch: row.get(2)?,
            pkgname: row.get(3)?,
            version: row.get(4)?,
            status,
            job_id: row.get(6)?,
            retry_count: row.get(7)?,
            splitrepo: row.get(8)?,
        })
    }
}

fn status_column(row: &Row, idx: usize) -> rusqlite::Result<PackageStatus> {
    let status: String = row.get(idx)?;
    status.parse::<PackageStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })
}

fn prefixed_columns(alias: &str) -> String {
    COLUMNS
        .split(", ")
        .map(|column| format!("{alias}.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}
