// src/jobs/sign_index.rs

//! Sign the index of a symlink repo
//!
//! The unsigned index is fetched from the WIP repo, where
//! `repo::symlink` put it, and comes back through the sign-index callback.

use super::{JobIdentity, shell_quote};
use crate::api::Endpoint;
use crate::backend::{BackendKind, Task};
use crate::error::Result;
use crate::farm::BuildFarm;
use crate::repo::{RepoKind, index};
use rusqlite::Connection;

pub fn run(
    farm: &BuildFarm,
    conn: &Connection,
    arch: &str,
    branch: &str,
    splitrepo: Option<&str>,
) -> Result<i64> {
    let config = farm.config();
    let unsigned = match config.jobs.service {
        BackendKind::Local => farm
            .layout()
            .path(RepoKind::Wip, Some(arch), branch, splitrepo)
            .join(index::SYMLINK_INDEX_NAME)
            .display()
            .to_string(),
        BackendKind::Remote => format!(
            "{}/{}/{}",
            super::repo_url(farm, RepoKind::Wip, branch, splitrepo),
            arch,
            index::SYMLINK_INDEX_NAME
        ),
    };

    let fetch = match config.jobs.service {
        BackendKind::Local => format!("cp {} {}", shell_quote(&unsigned), index::INDEX_NAME),
        BackendKind::Remote => format!("wget {} -O {}", shell_quote(&unsigned), index::INDEX_NAME),
    };

    let mut headers = vec![("Arch", shell_quote(arch)), ("Branch", shell_quote(branch))];
    if let Some(splitrepo) = splitrepo {
        headers.push(("Splitrepo", shell_quote(splitrepo)));
    }

    let tasks = vec![
        Task::new("download_unsigned_index", fetch),
        Task::new(
            "sign",
            format!(
                r#"
            abuild-sign -k "{}" {}
            "#,
                config.signing.final_key,
                index::INDEX_NAME
            ),
        ),
        super::callback_task(farm, Endpoint::SignIndex, &headers, index::INDEX_NAME),
    ];

    let note = format!(
        "Sign index: `{}/{}{}`",
        branch,
        arch,
        splitrepo.map(|s| format!("/{s}")).unwrap_or_default()
    );
    let identity = JobIdentity {
        arch: Some(arch.to_string()),
        splitrepo: splitrepo.map(str::to_string),
        ..JobIdentity::new(branch)
    };
    super::run(farm, conn, "sign_index", &note, tasks, &identity)
}
