// src/api/build_package.rs

//! A package build finished: store its artifacts in the WIP repository

use super::CallbackRequest;
use crate::db::models::{LogEntry, PackageStatus};
use crate::error::{Error, Result};
use crate::farm::BuildFarm;
use crate::repo::{RepoKind, artifact, wip};
use std::fs;
use std::path::Path;
use tracing::info;

pub fn handle(farm: &BuildFarm, request: &CallbackRequest) -> Result<String> {
    let branch = super::branch(farm, request)?;
    let arch = super::arch(request, &branch)?;
    let job_id = request.job_id()?;
    let files = request.require_files()?;

    for file in files {
        if !artifact::is_artifact(Path::new(&file.filename)) {
            return Err(Error::InvalidRequest(format!(
                "not a package artifact: {}",
                file.filename
            )));
        }
    }

    farm.exclusive(|| {
        let conn = farm.open_db()?;
        let mut package = super::building_package(&conn, request, &arch, &branch.name, job_id)?;
        let splitrepo = package.splitrepo.clone();

        let dir = farm
            .layout()
            .path(RepoKind::Wip, Some(&arch), &branch.name, splitrepo.as_deref());
        fs::create_dir_all(&dir)?;
        for file in files {
            let path = file.save(&dir)?;
            info!("Stored {}", path.display());
        }
        wip::update_index(farm, &arch, &branch.name, splitrepo.as_deref())?;

        package.set_status(&conn, PackageStatus::Built)?;
        LogEntry::for_package(&package, "api_job_callback_build_package").record(&conn)?;
        Ok(())
    })?;

    farm.build()?;
    Ok("package received".to_string())
}
