// src/jobs/get_depends.rs

//! Ask the build tool which packages a branch needs, with their dependencies
//!
//! Produces one `depends.<arch>.json` per arch, ingested by the get-depends
//! callback.

use super::{JobIdentity, shell_quote};
use crate::api::Endpoint;
use crate::backend::Task;
use crate::error::{Error, Result};
use crate::farm::BuildFarm;
use crate::repo::{RepoKind, staging};
use rusqlite::Connection;

pub fn run(farm: &BuildFarm, conn: &Connection, branch: &str) -> Result<i64> {
    let branches = staging::discover(farm)?;
    let branch_config = branches
        .iter()
        .find(|b| b.name == branch)
        .ok_or_else(|| Error::InvalidRequest(format!("unknown branch: {branch}")))?;

    let mirror_final = super::repo_url(farm, RepoKind::Final, branch, None);
    let mut tasks = Vec::new();
    for arch in &branch_config.arches {
        tasks.push(Task::new(
            &format!("{branch}_{arch}"),
            format!(
                r#"
            pmbootstrap \
                -mp {} \
                --aports="$PWD/pmaports" \
                repo_missing --built --arch {} \
                > depends.{}.json
            cat depends.{}.json
            "#,
                shell_quote(&mirror_final),
                shell_quote(arch),
                arch,
                arch
            ),
        ));
    }
    tasks.push(super::callback_task(
        farm,
        Endpoint::GetDepends,
        &[("Branch", shell_quote(branch))],
        "depends.*.json",
    ));

    let note = format!("Parse packages and dependencies of `{branch}`");
    super::run(farm, conn, "get_depends", &note, tasks, &JobIdentity::new(branch))
}
