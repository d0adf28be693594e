// src/api/repo_bootstrap.rs

//! A repo bootstrap finished: its artifacts replace the splitrepo's WIP repo

use super::CallbackRequest;
use crate::db::models::{LogEntry, PackageStatus, RepoBootstrap, RepoBootstrapStatus};
use crate::error::{Error, Result};
use crate::farm::BuildFarm;
use crate::repo::{RepoKind, artifact, status};
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use tracing::info;

/// The bootstrap this callback reports on; it must be building with this job
fn building_bootstrap(
    conn: &Connection,
    arch: &str,
    branch: &str,
    splitrepo: &str,
    job_id: i64,
) -> Result<RepoBootstrap> {
    let rb = RepoBootstrap::find(conn, arch, branch, splitrepo)?.ok_or_else(|| {
        Error::InvalidRequest(format!("no repo bootstrap for {branch}/{splitrepo}/{arch}"))
    })?;
    if rb.status != RepoBootstrapStatus::Building || rb.job_id != Some(job_id) {
        return Err(Error::StaleJob(format!(
            "repo bootstrap {branch}/{splitrepo}/{arch} is {} with job {:?}, not building with job {job_id}",
            rb.status, rb.job_id
        )));
    }
    Ok(rb)
}

/// Remove what an earlier (failed) bootstrap left in the WIP repo
fn reset_wip_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        info!("Removing previous WIP repo {} (failed repo bootstrap?)", dir.display());
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

pub fn handle(farm: &BuildFarm, request: &CallbackRequest) -> Result<String> {
    let branch = super::branch(farm, request)?;
    let arch = super::arch(request, &branch)?;
    let splitrepo = request.header("Splitrepo")?.to_string();
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
        let mut rb = building_bootstrap(&conn, &arch, &branch.name, &splitrepo, job_id)?;

        let dir = farm
            .layout()
            .path(RepoKind::Wip, Some(&arch), &branch.name, Some(&splitrepo));
        reset_wip_dir(&dir)?;
        for file in files {
            file.save(&dir)?;
        }

        let stats = status::fix_disk_vs_db(
            &conn,
            &dir,
            &arch,
            &branch.name,
            Some(&splitrepo),
            PackageStatus::Built,
            true,
            rb.job_id,
        )?;

        let reason = if stats.removed > 0 {
            Some("unexpected packages or versions uploaded")
        } else if stats.updated == 0 {
            Some("no package of the bootstrap was updated in the database")
        } else {
            None
        };
        if let Some(reason) = reason {
            rb.set_status(&conn, RepoBootstrapStatus::Failed)?;
            LogEntry::for_repo_bootstrap(&rb, "api_job_callback_repo_bootstrap_failed")
                .record(&conn)?;
            return Err(Error::BootstrapMismatch(format!(
                "{}/{}/{}: {reason}",
                branch.name, splitrepo, arch
            )));
        }

        rb.set_status(&conn, RepoBootstrapStatus::Built)?;
        LogEntry {
            count: Some(stats.updated as i64),
            ..LogEntry::for_repo_bootstrap(&rb, "api_job_callback_repo_bootstrap")
        }
        .record(&conn)?;
        Ok(())
    })?;

    farm.build()?;
    Ok("repo bootstrap received".to_string())
}
