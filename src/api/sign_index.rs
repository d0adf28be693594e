// src/api/sign_index.rs

//! The symlink repo index was signed: publish the final repo

use super::CallbackRequest;
use crate::db::models::{LogEntry, RepoBootstrap, RepoBootstrapStatus};
use crate::error::{Error, Result};
use crate::farm::BuildFarm;
use crate::repo::{RepoKind, bootstrap, final_repo, index, wip};
use tracing::info;

pub fn handle(farm: &BuildFarm, request: &CallbackRequest) -> Result<String> {
    let branch = super::branch(farm, request)?;
    let arch = super::arch(request, &branch)?;
    let splitrepo = request.header_opt("Splitrepo").map(str::to_string);
    let job_id = request.job_id()?;
    request.require_files()?;
    let signed = request.file(index::INDEX_NAME)?;

    let publish_bootstrap = farm.exclusive(|| {
        let conn = farm.open_db()?;
        let symlink_dir = farm.layout().path(
            RepoKind::Symlink,
            Some(&arch),
            &branch.name,
            splitrepo.as_deref(),
        );
        if !symlink_dir.join(index::INDEX_NAME).exists() {
            return Err(Error::StaleJob(format!(
                "{}/{}: no symlink repo waiting for a signature",
                branch.name, arch
            )));
        }

        signed.save(&symlink_dir)?;
        let stats = final_repo::update_from_symlink_repo(
            farm,
            &conn,
            &arch,
            &branch.name,
            splitrepo.as_deref(),
        )?;
        wip::clean(farm, &conn, &arch, &branch.name, splitrepo.as_deref())?;

        LogEntry {
            arch: Some(arch.clone()),
            branch: Some(branch.name.clone()),
            splitrepo: splitrepo.clone(),
            job_id: Some(job_id),
            count: Some(stats.updated as i64),
            ..LogEntry::new("api_job_callback_sign_index")
        }
        .record(&conn)?;
        info!(
            "{}/{}: {} package(s) published",
            branch.name, arch, stats.updated
        );

        let Some(splitrepo) = splitrepo.as_deref() else {
            return Ok(false);
        };
        let rb = RepoBootstrap::find(&conn, &arch, &branch.name, splitrepo)?;
        Ok(rb.is_some_and(|rb| rb.status == RepoBootstrapStatus::Built))
    })?;

    match splitrepo.as_deref() {
        Some(splitrepo) if publish_bootstrap => {
            bootstrap::mark_published(farm, &arch, &branch.name, splitrepo)?;
        }
        _ => {
            farm.build()?;
        }
    }
    Ok("signed index received".to_string())
}
