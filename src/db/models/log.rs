// src/db/models/log.rs

//! Audit log - append-only record of everything the farm did
//!
//! Entries reference packages, images and jobs by denormalized fields only.
//! The log doubles as input for the job rate limiter.

use crate::db::models::{Image, Package, RepoBootstrap};
use crate::error::Result;
use chrono::NaiveDate;
use rusqlite::{Connection, Row, params};
use std::fmt;
use tracing::info;

const COLUMNS: &str = "id, date, action, payload, arch, branch, pkgname, version, job_id, \
                       retry_count, device, ui, dir_name, splitrepo, depend_pkgname, count";

/// One audit log entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogEntry {
    pub id: Option<i64>,
    pub date: Option<String>,
    pub action: String,
    pub payload: Option<String>,
    pub arch: Option<String>,
    pub branch: Option<String>,
    pub pkgname: Option<String>,
    pub version: Option<String>,
    pub job_id: Option<i64>,
    pub retry_count: Option<i64>,
    pub device: Option<String>,
    pub ui: Option<String>,
    pub dir_name: Option<String>,
    pub splitrepo: Option<String>,
    pub depend_pkgname: Option<String>,
    pub count: Option<i64>,
}

impl LogEntry {
    pub fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            ..Self::default()
        }
    }

    /// Entry describing a package
    pub fn for_package(package: &Package, action: &str) -> Self {
        Self {
            arch: Some(package.arch.clone()),
            branch: Some(package.branch.clone()),
            pkgname: Some(package.pkgname.clone()),
            version: Some(package.version.clone()),
            job_id: package.job_id,
            retry_count: Some(package.retry_count),
            splitrepo: package.splitrepo.clone(),
            ..Self::new(action)
        }
    }

    pub fn for_image(image: &Image, action: &str) -> Self {
        Self {
            branch: Some(image.branch.clone()),
            device: Some(image.device.clone()),
            ui: Some(image.ui.clone()),
            dir_name: image.dir_name.clone(),
            job_id: image.job_id,
            retry_count: Some(image.retry_count),
            ..Self::new(action)
        }
    }

    pub fn for_repo_bootstrap(rb: &RepoBootstrap, action: &str) -> Self {
        Self {
            arch: Some(rb.arch.clone()),
            branch: Some(rb.branch.clone()),
            splitrepo: Some(rb.splitrepo.clone()),
            job_id: rb.job_id,
            retry_count: Some(rb.retry_count),
            ..Self::new(action)
        }
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO log (action, payload, arch, branch, pkgname, version, job_id,
                              retry_count, device, ui, dir_name, splitrepo, depend_pkgname, count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                &self.action,
                &self.payload,
                &self.arch,
                &self.branch,
                &self.pkgname,
                &self.version,
                self.job_id,
                self.retry_count,
                &self.device,
                &self.ui,
                &self.dir_name,
                &self.splitrepo,
                &self.depend_pkgname,
                self.count,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Store the entry and echo it to the tracing log
    pub fn record(mut self, conn: &Connection) -> Result<()> {
        self.insert(conn)?;
        info!("### {} ###", self);
        Ok(())
    }

    /// Most recent entries, newest first
    pub fn recent(conn: &Connection, limit: usize) -> Result<Vec<Self>> {
        let sql = format!("SELECT {COLUMNS} FROM log ORDER BY id DESC LIMIT ?1");
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map([limit as i64], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn list_by_action(conn: &Connection, action: &str) -> Result<Vec<Self>> {
        let sql = format!("SELECT {COLUMNS} FROM log WHERE action = ?1 ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map([action], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Whether both entries describe the same job being started
    pub fn same_job(&self, other: &LogEntry) -> bool {
        self.action == other.action
            && self.arch == other.arch
            && self.branch == other.branch
            && self.pkgname == other.pkgname
            && self.version == other.version
            && self.device == other.device
            && self.ui == other.ui
            && self.dir_name == other.dir_name
    }

    /// Day the entry was written (UTC), if the date column parses
    pub fn day(&self) -> Option<NaiveDate> {
        let date = self.date.as_deref()?;
        NaiveDate::parse_from_str(date.get(..10)?, "%Y-%m-%d").ok()
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            date: row.get(1)?,
            action: row.get(2)?,
            payload: row.get(3)?,
            arch: row.get(4)?,
            branch: row.get(5)?,
            pkgname: row.get(6)?,
            version: row.get(7)?,
            job_id: row.get(8)?,
            retry_count: row.get(9)?,
            device: row.get(10)?,
            ui: row.get(11)?,
            dir_name: row.get(12)?,
            splitrepo: row.get(13)?,
            depend_pkgname: row.get(14)?,
            count: row.get(15)?,
        })
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.action)?;

        let fields = [
            ("arch", self.arch.clone()),
            ("branch", self.branch.clone()),
            ("splitrepo", self.splitrepo.clone()),
            ("pkgname", self.pkgname.clone()),
            ("version", self.version.clone()),
            ("device", self.device.clone()),
            ("ui", self.ui.clone()),
            ("dir_name", self.dir_name.clone()),
            ("job_id", self.job_id.map(|v| v.to_string())),
            ("retry_count", self.retry_count.map(|v| v.to_string())),
            ("depend_pkgname", self.depend_pkgname.clone()),
            ("count", self.count.map(|v| v.to_string())),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                write!(f, ", {key}: {value}")?;
            }
        }
        Ok(())
    }
}
