// src/db/models/image.rs

//! Image model - device image builds
//!
//! Unlike packages, completed images stay in the table as history until
//! retention removes them. The current build for a (device, branch, ui)
//! is the newest row that is not published.

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::fmt;
use std::str::FromStr;

/// Build status of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageStatus {
    Queued,
    Building,
    Published,
    Failed,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::Queued => "queued",
            ImageStatus::Building => "building",
            ImageStatus::Published => "published",
            ImageStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(self, next: ImageStatus) -> bool {
        use ImageStatus::*;

        self == next
            || matches!(
                (self, next),
                (Queued, Building) | (Building, Published | Failed) | (Failed, Building | Queued)
            )
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ImageStatus::Queued),
            "building" => Ok(ImageStatus::Building),
            "published" => Ok(ImageStatus::Published),
            "failed" => Ok(ImageStatus::Failed),
            _ => Err(format!("Invalid image status: {s}")),
        }
    }
}

const COLUMNS: &str = "id, device, branch, ui, status, job_id, dir_name, retry_count, date";

/// An image build row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: Option<i64>,
    pub device: String,
    pub branch: String,
    pub ui: String,
    pub status: ImageStatus,
    pub job_id: Option<i64>,
    pub dir_name: Option<String>,
    pub retry_count: i64,
    pub date: Option<String>,
}

impl Image {
    /// Create a new queued image
    pub fn new(device: &str, branch: &str, ui: &str) -> Self {
        Self {
            id: None,
            device: device.to_string(),
            branch: branch.to_string(),
            ui: ui.to_string(),
            status: ImageStatus::Queued,
            job_id: None,
            dir_name: None,
            retry_count: 0,
            date: None,
        }
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO images (device, branch, ui, status, job_id, dir_name, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &self.device,
                &self.branch,
                &self.ui,
                self.status.as_str(),
                self.job_id,
                &self.dir_name,
                self.retry_count,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let sql = format!("SELECT {COLUMNS} FROM images WHERE id = ?1");
        let image = conn.query_row(&sql, [id], Self::from_row).optional()?;
        Ok(image)
    }

    /// The current (not yet published) image for a device, branch and ui
    pub fn find_unfinished(
        conn: &Connection,
        device: &str,
        branch: &str,
        ui: &str,
    ) -> Result<Option<Self>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM images
             WHERE device = ?1 AND branch = ?2 AND ui = ?3 AND status != 'published'
             ORDER BY id DESC LIMIT 1"
        );
        let image = conn
            .query_row(&sql, params![device, branch, ui], Self::from_row)
            .optional()?;
        Ok(image)
    }

    /// Published images for a device, branch and ui, newest first
    pub fn list_published(
        conn: &Connection,
        device: &str,
        branch: &str,
        ui: &str,
    ) -> Result<Vec<Self>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM images
             WHERE device = ?1 AND branch = ?2 AND ui = ?3 AND status = 'published'
             ORDER BY date DESC, id DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let images = stmt
            .query_map(params![device, branch, ui], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(images)
    }

    /// Failed and queued images of a branch, oldest first
    pub fn list_candidates(conn: &Connection, branch: &str) -> Result<Vec<Self>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM images
             WHERE branch = ?1 AND status IN ('failed', 'queued')
             ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let images = stmt
            .query_map([branch], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(images)
    }

    pub fn list_by_status(conn: &Connection, status: ImageStatus) -> Result<Vec<Self>> {
        let sql = format!("SELECT {COLUMNS} FROM images WHERE status = ?1 ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let images = stmt
            .query_map([status.as_str()], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(images)
    }

    pub fn count_by_status(conn: &Connection, status: ImageStatus) -> Result<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM images WHERE status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn require_id(&self) -> Result<i64> {
        self.id.ok_or_else(|| {
            Error::NotFound(format!(
                "image {}:{}:{} has not been stored",
                self.device, self.branch, self.ui
            ))
        })
    }

    fn check_transition(&self, next: ImageStatus) -> Result<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                entity: "image",
                from: self.status.to_string(),
                to: next.to_string(),
            })
        }
    }

    pub fn set_status(&mut self, conn: &Connection, status: ImageStatus) -> Result<()> {
        let job_id = self.job_id;
        self.set_status_and_job(conn, status, job_id)
    }

    pub fn set_status_and_job(
        &mut self,
        conn: &Connection,
        status: ImageStatus,
        job_id: Option<i64>,
    ) -> Result<()> {
        let id = self.require_id()?;
        self.check_transition(status)?;

        conn.execute(
            "UPDATE images SET status = ?1, job_id = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?3",
            params![status.as_str(), job_id, id],
        )?;

        self.status = status;
        self.job_id = job_id;
        Ok(())
    }

    /// Mark published, recording the output directory and the publish date
    pub fn set_published(&mut self, conn: &Connection, dir_name: &str) -> Result<()> {
        let id = self.require_id()?;
        self.check_transition(ImageStatus::Published)?;

        conn.execute(
            "UPDATE images
             SET status = 'published', dir_name = ?1, date = CURRENT_TIMESTAMP,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?2",
            params![dir_name, id],
        )?;

        self.status = ImageStatus::Published;
        self.dir_name = Some(dir_name.to_string());
        Ok(())
    }

    pub fn increment_retry_count(&mut self, conn: &Connection) -> Result<()> {
        let id = self.require_id()?;
        conn.execute(
            "UPDATE images SET retry_count = retry_count + 1 WHERE id = ?1",
            [id],
        )?;
        self.retry_count += 1;
        Ok(())
    }

    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        conn.execute("DELETE FROM images WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Maintenance: mark every building image as failed
    pub fn building_to_failed(conn: &Connection) -> Result<usize> {
        let count = conn.execute(
            "UPDATE images SET status = 'failed', updated_at = CURRENT_TIMESTAMP
             WHERE status = 'building'",
            [],
        )?;
        Ok(count)
    }

    /// Maintenance: queue every failed image again
    pub fn failed_to_queued(conn: &Connection) -> Result<usize> {
        let count = conn.execute(
            "UPDATE images SET status = 'queued', retry_count = 0, updated_at = CURRENT_TIMESTAMP
             WHERE status = 'failed'",
            [],
        )?;
        Ok(count)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let status_str: String = row.get(4)?;
        let status = status_str.parse::<ImageStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            device: row.get(1)?,
            branch: row.get(2)?,
            ui: row.get(3)?,
            status,
            job_id: row.get(5)?,
            dir_name: row.get(6)?,
            retry_count: row.get(7)?,
            date: row.get(8)?,
        })
    }
}
