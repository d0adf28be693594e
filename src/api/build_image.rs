// src/api/build_image.rs

//! An image build finished: move its files into the images tree

use super::CallbackRequest;
use crate::db::models::{Image, ImageStatus, LogEntry};
use crate::error::{Error, Result};
use crate::farm::BuildFarm;
use crate::images;
use std::fs;
use tracing::info;

pub fn handle(farm: &BuildFarm, request: &CallbackRequest) -> Result<String> {
    let config = farm.config();
    let branch = request.header("Branch")?;
    let device = request.header("Device")?;
    let ui = request.header("Ui")?;
    let job_id = request.job_id()?;

    if config.branch(branch).is_none() {
        return Err(Error::InvalidRequest(format!("unknown branch: {branch}")));
    }
    let configured = config.image_targets.iter().any(|t| {
        t.device == device && t.ui == ui && t.branches.iter().any(|b| b == branch)
    });
    if !configured {
        return Err(Error::InvalidRequest(format!(
            "no image configured for {branch}:{device}:{ui}"
        )));
    }

    let dir_name = request.header("Version")?;
    if !images::is_valid_dir_name(dir_name) {
        return Err(Error::InvalidRequest(format!("invalid image dir name: {dir_name}")));
    }
    let files = request.require_files()?;
    for file in files {
        if !images::is_valid_file_name(&file.filename) {
            return Err(Error::InvalidRequest(format!(
                "invalid image file name: {}",
                file.filename
            )));
        }
    }

    let count = farm.exclusive(|| {
        let conn = farm.open_db()?;
        let mut image = Image::find_unfinished(&conn, device, branch, ui)?.ok_or_else(|| {
            Error::StaleJob(format!("no unfinished image for {branch}:{device}:{ui}"))
        })?;
        if image.status != ImageStatus::Building || image.job_id != Some(job_id) {
            return Err(Error::StaleJob(format!(
                "image {branch}:{device}:{ui} is {} with job {:?}, not building with job {job_id}",
                image.status, image.job_id
            )));
        }

        let dir = images::path(farm, &image, Some(dir_name));
        fs::create_dir_all(&dir)?;
        for file in files {
            let path = file.save(&dir)?;
            info!("Stored {}", path.display());
        }

        image.set_published(&conn, dir_name)?;
        LogEntry::for_image(&image, "api_job_callback_build_image").record(&conn)?;
        images::remove_old(farm, &conn)?;
        Ok(files.len())
    })?;

    farm.build()?;
    Ok(format!("image dir created from {count} files"))
}
