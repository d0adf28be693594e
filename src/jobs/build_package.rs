// src/jobs/build_package.rs

//! Build one package

use super::{JobIdentity, shell_quote};
use crate::api::Endpoint;
use crate::backend::Task;
use crate::db::models::{LogEntry, Package, PackageStatus, RepoBootstrap};
use crate::error::Result;
use crate::farm::BuildFarm;
use crate::repo::{RepoKind, artifact, index};
use rusqlite::Connection;

/// Start a build job for `package`
///
/// Returns false without starting anything when the artifact is in the
/// WIP repo already; the package is marked built instead.
pub fn run(farm: &BuildFarm, conn: &Connection, package: &mut Package) -> Result<bool> {
    let arch = package.arch.clone();
    let branch = package.branch.clone();
    let splitrepo = package.splitrepo.clone();
    let layout = farm.layout();

    let wip_dir = layout.path(RepoKind::Wip, Some(&arch), &branch, splitrepo.as_deref());
    if wip_dir
        .join(artifact::file_name(&package.pkgname, &package.version))
        .exists()
    {
        package.set_status(conn, PackageStatus::Built)?;
        LogEntry::for_package(package, "package_exists_in_wip_repo").record(conn)?;
        return Ok(false);
    }

    let final_dir = layout.path(RepoKind::Final, Some(&arch), &branch, splitrepo.as_deref());
    let force_missing_repos = if final_dir.join(index::INDEX_NAME).exists() {
        ""
    } else {
        "export PMB_APK_FORCE_MISSING_REPOSITORIES=1"
    };

    let systemd = if RepoBootstrap::list_unpublished(conn, &arch, &branch)?.is_empty()
        && splitrepo.is_none()
    {
        "never"
    } else {
        "always"
    };

    let mirror_wip = super::repo_url(farm, RepoKind::Wip, &branch, splitrepo.as_deref());
    let mirror_final = super::repo_url(farm, RepoKind::Final, &branch, splitrepo.as_deref());

    let mut tasks = vec![Task::new(
        "pmbootstrap_build",
        format!(
            r#"
            pmbootstrap config systemd {systemd}
            {force_missing_repos}
            pmbootstrap \
                -mp {} \
                -mp {} \
                --aports="$PWD/pmaports" \
                --no-ccache \
                --details-to-stdout \
                build \
                --no-depends \
                --strict \
                --arch {} \
                --force \
                {}
            "#,
            shell_quote(&mirror_wip),
            shell_quote(&mirror_final),
            shell_quote(&arch),
            shell_quote(&package.pkgname)
        ),
    )];
    tasks.push(super::checksums_task());

    let mut headers = vec![
        ("Arch", shell_quote(&arch)),
        ("Branch", shell_quote(&branch)),
        ("Pkgname", shell_quote(&package.pkgname)),
        ("Version", shell_quote(&package.version)),
    ];
    if let Some(splitrepo) = &splitrepo {
        headers.push(("Splitrepo", shell_quote(splitrepo)));
    }
    tasks.push(super::callback_task(
        farm,
        Endpoint::BuildPackage,
        &headers,
        super::BUILT_PACKAGES,
    ));

    let note = format!(
        "Build package: `{}/{}/{}-{}`",
        branch, arch, package.pkgname, package.version
    );
    let identity = JobIdentity {
        arch: Some(arch.clone()),
        pkgname: Some(package.pkgname.clone()),
        version: Some(package.version.clone()),
        splitrepo: splitrepo.clone(),
        retry_count: Some(package.retry_count),
        ..JobIdentity::new(&branch)
    };
    let job_id = super::run(farm, conn, "build_package", &note, tasks, &identity)?;

    if package.status == PackageStatus::Failed {
        package.increment_retry_count(conn)?;
    }
    package.set_status_and_job(conn, PackageStatus::Building, Some(job_id))?;
    Ok(true)
}
