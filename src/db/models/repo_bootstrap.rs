// src/db/models/repo_bootstrap.rs

//! RepoBootstrap model - one-shot seeding build of a splitrepo

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a repo bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepoBootstrapStatus {
    Queued,
    Building,
    Built,
    Published,
    Failed,
}

impl RepoBootstrapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoBootstrapStatus::Queued => "queued",
            RepoBootstrapStatus::Building => "building",
            RepoBootstrapStatus::Built => "built",
            RepoBootstrapStatus::Published => "published",
            RepoBootstrapStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(self, next: RepoBootstrapStatus) -> bool {
        use RepoBootstrapStatus::*;

        self == next
            || matches!(
                (self, next),
                (Queued, Building)
                    | (Building, Built | Failed)
                    | (Built, Published)
                    | (Failed, Building | Queued)
            )
    }
}

impl fmt::Display for RepoBootstrapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepoBootstrapStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RepoBootstrapStatus::Queued),
            "building" => Ok(RepoBootstrapStatus::Building),
            "built" => Ok(RepoBootstrapStatus::Built),
            "published" => Ok(RepoBootstrapStatus::Published),
            "failed" => Ok(RepoBootstrapStatus::Failed),
            _ => Err(format!("Invalid repo bootstrap status: {s}")),
        }
    }
}

const COLUMNS: &str = "id, arch, branch, splitrepo, status, job_id, retry_count";

/// A repo bootstrap row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoBootstrap {
    pub id: Option<i64>,
    pub arch: String,
    pub branch: String,
    pub splitrepo: String,
    pub status: RepoBootstrapStatus,
    pub job_id: Option<i64>,
    pub retry_count: i64,
}

impl RepoBootstrap {
    pub fn new(arch: &str, branch: &str, splitrepo: &str) -> Self {
        Self {
            id: None,
            arch: arch.to_string(),
            branch: branch.to_string(),
            splitrepo: splitrepo.to_string(),
            status: RepoBootstrapStatus::Queued,
            job_id: None,
            retry_count: 0,
        }
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO repo_bootstraps (arch, branch, splitrepo, status, job_id, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &self.arch,
                &self.branch,
                &self.splitrepo,
                self.status.as_str(),
                self.job_id,
                self.retry_count,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    pub fn find(
        conn: &Connection,
        arch: &str,
        branch: &str,
        splitrepo: &str,
    ) -> Result<Option<Self>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM repo_bootstraps
             WHERE arch = ?1 AND branch = ?2 AND splitrepo = ?3"
        );
        let rb = conn
            .query_row(&sql, params![arch, branch, splitrepo], Self::from_row)
            .optional()?;
        Ok(rb)
    }

    /// Bootstraps of (arch, branch) that are not published yet, oldest first
    pub fn list_unpublished(conn: &Connection, arch: &str, branch: &str) -> Result<Vec<Self>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM repo_bootstraps
             WHERE arch = ?1 AND branch = ?2 AND status != 'published'
             ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rbs = stmt
            .query_map(params![arch, branch], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rbs)
    }

    pub fn list_by_status(conn: &Connection, status: RepoBootstrapStatus) -> Result<Vec<Self>> {
        let sql = format!("SELECT {COLUMNS} FROM repo_bootstraps WHERE status = ?1 ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rbs = stmt
            .query_map([status.as_str()], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rbs)
    }

    pub fn count_by_status(conn: &Connection, status: RepoBootstrapStatus) -> Result<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM repo_bootstraps WHERE status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn require_id(&self) -> Result<i64> {
        self.id.ok_or_else(|| {
            Error::NotFound(format!(
                "repo bootstrap {}/{}/{} has not been stored",
                self.branch, self.splitrepo, self.arch
            ))
        })
    }

    pub fn set_status(&mut self, conn: &Connection, status: RepoBootstrapStatus) -> Result<()> {
        let job_id = self.job_id;
        self.set_status_and_job(conn, status, job_id)
    }

    pub fn set_status_and_job(
        &mut self,
        conn: &Connection,
        status: RepoBootstrapStatus,
        job_id: Option<i64>,
    ) -> Result<()> {
        let id = self.require_id()?;
        if !self.status.can_transition_to(status) {
            return Err(Error::InvalidTransition {
                entity: "repo bootstrap",
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }

        conn.execute(
            "UPDATE repo_bootstraps SET status = ?1, job_id = ?2 WHERE id = ?3",
            params![status.as_str(), job_id, id],
        )?;

        self.status = status;
        self.job_id = job_id;
        Ok(())
    }

    pub fn increment_retry_count(&mut self, conn: &Connection) -> Result<()> {
        let id = self.require_id()?;
        conn.execute(
            "UPDATE repo_bootstraps SET retry_count = retry_count + 1 WHERE id = ?1",
            [id],
        )?;
        self.retry_count += 1;
        Ok(())
    }

    /// Maintenance: mark every building bootstrap as failed
    pub fn building_to_failed(conn: &Connection) -> Result<usize> {
        let count = conn.execute(
            "UPDATE repo_bootstraps SET status = 'failed' WHERE status = 'building'",
            [],
        )?;
        Ok(count)
    }

    /// Maintenance: queue every failed bootstrap again
    pub fn failed_to_queued(conn: &Connection) -> Result<usize> {
        let count = conn.execute(
            "UPDATE repo_bootstraps SET status = 'queued', retry_count = 0 WHERE status = 'failed'",
            [],
        )?;
        Ok(count)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let status_str: String = row.get(4)?;
        let status = status_str.parse::<RepoBootstrapStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            arch: row.get(1)?,
            branch: row.get(2)?,
            splitrepo: row.get(3)?,
            status,
            job_id: row.get(5)?,
            retry_count: row.get(6)?,
        })
    }
}
