// src/api/get_depends.rs

//! Dependency payload ingest
//!
//! The get_depends job uploads one `depends.<arch>.json` per arch of a
//! branch, listing every package that should exist with its version and
//! the names it depends on. Package rows are created, overwritten on a
//! version change and deleted when no longer listed; dependency edges are
//! replaced as a whole.

use super::CallbackRequest;
use crate::config::BranchConfig;
use crate::db::models::{LogEntry, Package};
use crate::error::{Error, Result};
use crate::farm::BuildFarm;
use crate::repo::{bootstrap, staging};
use rusqlite::Connection;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// One package of a dependency payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DependencyRecord {
    pub pkgname: String,

    /// Repository directory in the package source tree (e.g. "main", "systemd")
    #[serde(default)]
    pub repo: Option<String>,

    pub version: String,

    /// Names of packages that must be built first
    #[serde(default)]
    pub depends: Vec<String>,
}

/// Name of the payload file for `arch`
pub fn payload_name(arch: &str) -> String {
    format!("depends.{arch}.json")
}

/// Parse one payload file
pub fn parse_payload(data: &[u8]) -> Result<Vec<DependencyRecord>> {
    serde_json::from_slice(data)
        .map_err(|e| Error::InvalidRequest(format!("invalid dependency payload: {e}")))
}

/// Branch from the `Branch` header
///
/// Unlike other callbacks, a staging branch that does not exist yet is
/// accepted: this callback creates it.
fn branch(farm: &BuildFarm, request: &CallbackRequest) -> Result<BranchConfig> {
    let name = request.header("Branch")?;
    if let Some(branch) = staging::discover(farm)?.into_iter().find(|b| b.name == name) {
        return Ok(branch);
    }

    let config = farm.config();
    match staging::branch_split(&config.branches, name) {
        Some((origin, _)) => Ok(BranchConfig {
            name: name.to_string(),
            arches: config.staging.arches.clone(),
            ignore_errors: true,
            pmb_branch: config
                .branch(origin)
                .map(|b| b.pmb_branch.clone())
                .unwrap_or_default(),
        }),
        None => Err(Error::InvalidRequest(format!("unknown branch: {name}"))),
    }
}

/// Splitrepo of a payload record: only bootstrap directories are split out
fn splitrepo_of(farm: &BuildFarm, record: &DependencyRecord) -> Option<String> {
    record
        .repo
        .as_ref()
        .filter(|repo| farm.config().repo_bootstrap_dirs.contains(repo))
        .cloned()
}

/// Bring the package rows of one (arch, branch) in line with a payload
fn update_packages(
    farm: &BuildFarm,
    conn: &Connection,
    arch: &str,
    branch: &str,
    payload: &[DependencyRecord],
) -> Result<()> {
    let mut ids: HashMap<&str, i64> = HashMap::new();

    for record in payload {
        let splitrepo = splitrepo_of(farm, record);
        let id = match Package::find(conn, arch, branch, &record.pkgname)? {
            Some(mut package) => {
                if package.version != record.version {
                    debug!(
                        "{}/{}/{}: {} -> {}",
                        branch, arch, record.pkgname, package.version, record.version
                    );
                    package.update_version(conn, &record.version)?;
                    LogEntry::for_package(&package, "package_update_version").record(conn)?;
                }
                package.id
            }
            None => {
                let mut package = Package::new(arch, branch, &record.pkgname, &record.version);
                package.splitrepo = splitrepo;
                package.insert(conn)?;
                LogEntry::for_package(&package, "package_add").record(conn)?;
                package.id
            }
        };
        if let Some(id) = id {
            ids.insert(record.pkgname.as_str(), id);
        }
    }

    for package in Package::list_arch_branch(conn, arch, branch)? {
        if ids.contains_key(package.pkgname.as_str()) {
            continue;
        }
        if let Some(id) = package.id {
            Package::delete(conn, id)?;
            LogEntry::for_package(&package, "package_delete").record(conn)?;
        }
    }

    for record in payload {
        let Some(&id) = ids.get(record.pkgname.as_str()) else {
            continue;
        };
        // names outside the payload are provided by other repositories
        let mut depends: Vec<i64> = record
            .depends
            .iter()
            .filter_map(|name| ids.get(name.as_str()).copied())
            .filter(|dep| *dep != id)
            .collect();
        depends.sort_unstable();
        depends.dedup();
        Package::set_depends(conn, id, &depends)?;
    }

    Ok(())
}

pub fn handle(farm: &BuildFarm, request: &CallbackRequest) -> Result<String> {
    let branch = branch(farm, request)?;
    let files = request.require_files()?;

    let mut payloads: Vec<(String, Vec<DependencyRecord>)> = Vec::new();
    for arch in &branch.arches {
        let file = request.file(&payload_name(arch))?;
        payloads.push((arch.clone(), parse_payload(&file.data)?));
    }
    if files.len() != payloads.len() {
        return Err(Error::InvalidRequest(format!(
            "expected {} payload file(s) for branch {}, got {}",
            payloads.len(),
            branch.name,
            files.len()
        )));
    }

    farm.exclusive(|| {
        let mut conn = farm.open_db()?;
        crate::db::transaction(&mut conn, |tx| {
            for (arch, payload) in &payloads {
                update_packages(farm, tx, arch, &branch.name, payload)?;
                bootstrap::init(farm, tx, payload, arch, &branch.name)?;
            }
            if staging::branch_split(&farm.config().branches, &branch.name).is_some() {
                staging::init(farm, tx, &branch.name)?;
            }
            LogEntry {
                branch: Some(branch.name.clone()),
                ..LogEntry::new("api_job_callback_get_depends")
            }
            .record(tx)?;
            Ok(())
        })
    })?;

    info!(
        "Dependencies of {} updated ({} arch(es))",
        branch.name,
        payloads.len()
    );
    farm.build()?;
    Ok("depends received".to_string())
}
