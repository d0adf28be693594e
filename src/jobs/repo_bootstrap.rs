// src/jobs/repo_bootstrap.rs

//! Seed a splitrepo with a full bootstrap build

use super::{JobIdentity, shell_quote};
use crate::api::Endpoint;
use crate::backend::Task;
use crate::db::models::{RepoBootstrap, RepoBootstrapStatus};
use crate::error::Result;
use crate::farm::BuildFarm;
use crate::repo::RepoKind;
use rusqlite::Connection;

/// Pkgname recorded in the log for bootstrap jobs
pub const LOG_PKGNAME: &str = "[repo_bootstrap]";

pub fn run(farm: &BuildFarm, conn: &Connection, rb: &mut RepoBootstrap) -> Result<i64> {
    let mirror_final = super::repo_url(farm, RepoKind::Final, &rb.branch, None);

    let tasks = vec![
        Task::new(
            "repo_bootstrap",
            format!(
                r#"
            pmbootstrap \
                -mp {} \
                --aports="$PWD/pmaports" \
                --details-to-stdout \
                repo_bootstrap \
                --arch {} \
                {}
            "#,
                shell_quote(&mirror_final),
                shell_quote(&rb.arch),
                shell_quote(&rb.splitrepo)
            ),
        ),
        super::checksums_task(),
        super::callback_task(
            farm,
            Endpoint::RepoBootstrap,
            &[
                ("Arch", shell_quote(&rb.arch)),
                ("Branch", shell_quote(&rb.branch)),
                ("Splitrepo", shell_quote(&rb.splitrepo)),
            ],
            super::BUILT_PACKAGES,
        ),
    ];

    let note = format!("Repo bootstrap: `{}/{}/{}`", rb.branch, rb.splitrepo, rb.arch);
    let identity = JobIdentity {
        arch: Some(rb.arch.clone()),
        pkgname: Some(LOG_PKGNAME.to_string()),
        splitrepo: Some(rb.splitrepo.clone()),
        retry_count: Some(rb.retry_count),
        ..JobIdentity::new(&rb.branch)
    };
    let job_id = super::run(farm, conn, "repo_bootstrap", &note, tasks, &identity)?;

    if rb.status == RepoBootstrapStatus::Failed {
        rb.increment_retry_count(conn)?;
    }
    rb.set_status_and_job(conn, RepoBootstrapStatus::Building, Some(job_id))?;
    Ok(job_id)
}
