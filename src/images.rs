// src/images.rs

//! Image queue and retention
//!
//! Images are rebuilt per `[[image]]` target and branch once the newest
//! published build is older than `images.rebuild_interval_days`. Published
//! builds older than `images.retention_days` are removed from disk and
//! database; the newest build of every target is always kept.
//!
//! Published images live at `<images>/<branch>/<device>/<ui>/<dir_name>/`.

use crate::db::models::{Image, LogEntry};
use crate::error::{Error, Result};
use crate::farm::BuildFarm;
use chrono::{Duration, NaiveDateTime, Utc};
use regex::Regex;
use rusqlite::Connection;
use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// Directory of one image build: UTC date and time of the build
static DIR_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{8}-[0-9]{4}$").unwrap());

/// Files of one image build: the dir name, then the image name
static FILE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{8}-[0-9]{4}-[A-Za-z0-9._+-]+(\.img\.xz|\.zip)(\.sha(256|512))?$").unwrap()
});

pub fn is_valid_dir_name(dir_name: &str) -> bool {
    DIR_NAME_RE.is_match(dir_name)
}

pub fn is_valid_file_name(file_name: &str) -> bool {
    FILE_NAME_RE.is_match(file_name)
}

/// Directory of an image build, or of all builds of a target when `dir_name` is `None`
pub fn path(farm: &BuildFarm, image: &Image, dir_name: Option<&str>) -> PathBuf {
    let mut path = farm
        .config()
        .paths
        .images
        .join(&image.branch)
        .join(&image.device)
        .join(&image.ui);
    if let Some(dir_name) = dir_name {
        path.push(dir_name);
    }
    path
}

/// Parse the `date` column written by SQLite's CURRENT_TIMESTAMP
fn parse_date(date: Option<&str>) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(date?, "%Y-%m-%d %H:%M:%S").ok()
}

/// Queue images whose newest build is missing or too old
///
/// Returns the number of queued images.
pub fn fill_queue(farm: &BuildFarm, conn: &Connection) -> Result<usize> {
    fill_queue_at(farm, conn, Utc::now().naive_utc())
}

pub(crate) fn fill_queue_at(farm: &BuildFarm, conn: &Connection, now: NaiveDateTime) -> Result<usize> {
    let config = farm.config();
    let interval = Duration::days(config.images.rebuild_interval_days);
    let mut queued = 0;

    for target in &config.image_targets {
        for branch in &target.branches {
            if Image::find_unfinished(conn, &target.device, branch, &target.ui)?.is_some() {
                continue;
            }

            let newest = Image::list_published(conn, &target.device, branch, &target.ui)?
                .into_iter()
                .next();
            if let Some(newest) = newest {
                match parse_date(newest.date.as_deref()) {
                    Some(date) if now - date < interval => continue,
                    Some(_) => {}
                    None => {
                        warn!(
                            "{}:{}:{}: published image without a valid date",
                            branch, target.device, target.ui
                        );
                        continue;
                    }
                }
            }

            let mut image = Image::new(&target.device, branch, &target.ui);
            image.insert(conn)?;
            LogEntry::for_image(&image, "add_image_to_queue").record(conn)?;
            queued += 1;
        }
    }

    if queued > 0 {
        info!("Queued {} image(s)", queued);
    }
    Ok(queued)
}

/// Remove published images past their retention period
///
/// Returns the number of removed images.
pub fn remove_old(farm: &BuildFarm, conn: &Connection) -> Result<usize> {
    remove_old_at(farm, conn, Utc::now().naive_utc())
}

pub(crate) fn remove_old_at(farm: &BuildFarm, conn: &Connection, now: NaiveDateTime) -> Result<usize> {
    let config = farm.config();
    let retention = Duration::days(config.images.retention_days);
    let mut removed = 0;

    for target in &config.image_targets {
        for branch in &target.branches {
            let published = Image::list_published(conn, &target.device, branch, &target.ui)?;

            // newest first; the newest one stays regardless of its age
            for image in published.iter().skip(1) {
                let Some(date) = parse_date(image.date.as_deref()) else {
                    continue;
                };
                if now - date <= retention {
                    continue;
                }

                if let Some(dir_name) = image.dir_name.as_deref() {
                    let dir = path(farm, image, Some(dir_name));
                    if dir.exists() {
                        info!("Removing old image {}", dir.display());
                        fs::remove_dir_all(&dir).map_err(|e| {
                            Error::IoError(format!("Failed to remove {}: {e}", dir.display()))
                        })?;
                    }
                }

                let id = image.id.ok_or_else(|| {
                    Error::NotFound(format!("image {}:{} has no id", image.device, image.ui))
                })?;
                Image::delete(conn, id)?;
                LogEntry::for_image(image, "remove_old_image").record(conn)?;
                removed += 1;
            }
        }
    }

    debug!("Removed {} old image(s)", removed);
    Ok(removed)
}
