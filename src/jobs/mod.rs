// src/jobs/mod.rs

//! Job dispatch and status sync
//!
//! Every job the farm starts goes through `run`: the rate limiter looks at
//! the audit log first, the task scripts are normalized, the job service
//! gets the job, and the submission is logged. The task templates for each
//! kind of job live in the submodules; the scheduler only sees task names.

pub mod build_image;
pub mod build_package;
pub mod get_depends;
pub mod repo_bootstrap;
pub mod sign_index;

use crate::api::Endpoint;
use crate::backend::{self, BackendKind, JobOutcome, JobSpec, Task};
use crate::db::models::{
    Image, ImageStatus, LogEntry, Package, PackageStatus, RepoBootstrap, RepoBootstrapStatus,
};
use crate::error::{Error, Result};
use crate::farm::BuildFarm;
use crate::repo::RepoKind;
use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info, warn};

/// Number of identical recent job starts that trips the rate limiter
pub const RATE_LIMIT_ENTRIES: usize = 10;

/// Indent removed from task scripts
const TASK_INDENT: usize = 12;

/// Identity fields stored with a job submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobIdentity {
    pub branch: String,
    pub arch: Option<String>,
    pub pkgname: Option<String>,
    pub version: Option<String>,
    pub device: Option<String>,
    pub ui: Option<String>,
    pub dir_name: Option<String>,
    pub splitrepo: Option<String>,
    pub retry_count: Option<i64>,
}

impl JobIdentity {
    pub fn new(branch: &str) -> Self {
        Self {
            branch: branch.to_string(),
            ..Self::default()
        }
    }

    /// Log entry for this identity
    pub fn log_entry(&self, action: &str) -> LogEntry {
        LogEntry {
            arch: self.arch.clone(),
            branch: Some(self.branch.clone()),
            pkgname: self.pkgname.clone(),
            version: self.version.clone(),
            device: self.device.clone(),
            ui: self.ui.clone(),
            dir_name: self.dir_name.clone(),
            splitrepo: self.splitrepo.clone(),
            retry_count: self.retry_count,
            ..LogEntry::new(action)
        }
    }
}

/// Strip the indent of embedded shell code
///
/// Leading and trailing blank lines are dropped, `spaces` leading spaces
/// are removed from every line that has them, and the result ends in
/// exactly one newline.
pub fn remove_additional_indent(script: &str, spaces: usize) -> String {
    let indent = " ".repeat(spaces);
    let lines: Vec<&str> = script
        .lines()
        .skip_while(|line| line.trim().is_empty())
        .map(|line| line.strip_prefix(indent.as_str()).unwrap_or(line))
        .collect();

    let end = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map_or(0, |i| i + 1);

    let mut ret = String::new();
    for line in &lines[..end] {
        ret.push_str(line);
        ret.push('\n');
    }
    ret
}

/// Quote a string for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:+@%,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Refuse to start the same job over and over
///
/// Trips when the newest `RATE_LIMIT_ENTRIES` log entries all describe
/// starting exactly this job, today (UTC). That only happens when the
/// scheduler is stuck in a loop, so the process must stop.
pub fn check_rate_limit(conn: &Connection, candidate: &LogEntry) -> Result<()> {
    let entries = LogEntry::recent(conn, RATE_LIMIT_ENTRIES)?;
    if entries.len() < RATE_LIMIT_ENTRIES {
        return Ok(());
    }

    let today = Utc::now().date_naive();
    for entry in &entries {
        if entry.day() != Some(today) {
            debug!("Rate limit: job {:?} was not started today", entry.job_id);
            return Ok(());
        }
        if !entry.same_job(candidate) {
            debug!("Rate limit: job {:?} is different", entry.job_id);
            return Ok(());
        }
    }

    LogEntry::new("bug_found_shutting_down").record(conn)?;
    Err(Error::RateLimitTripped(format!(
        "{} was started {} times in a row today, refusing to spam the job service",
        candidate.action, RATE_LIMIT_ENTRIES
    )))
}

/// Start a job and log it; returns the job id
pub fn run(
    farm: &BuildFarm,
    conn: &Connection,
    name: &str,
    note: &str,
    tasks: Vec<Task>,
    identity: &JobIdentity,
) -> Result<i64> {
    let backend = farm.backend();
    info!("[{}] Run job: {} ({})", backend.name(), note, name);

    let action = format!("job_{name}");
    let mut entry = identity.log_entry(&action);
    check_rate_limit(conn, &entry)?;

    let tasks = tasks
        .into_iter()
        .map(|task| Task {
            script: remove_additional_indent(&task.script, TASK_INDENT),
            name: task.name,
        })
        .collect();

    let spec = JobSpec {
        name: name.to_string(),
        note: note.to_string(),
        tasks,
        branch: identity.branch.clone(),
        timeout: farm.config().job_timeout(),
    };
    let job_id = backend.submit(&spec)?;

    entry.job_id = Some(job_id);
    entry.record(conn)?;
    info!("Job link: {}", backend.link(job_id));
    Ok(job_id)
}

/// Environment variable holding the job id inside a job
pub fn job_id_var(farm: &BuildFarm) -> &'static str {
    match farm.config().jobs.service {
        BackendKind::Local => backend::local::JOB_ID_VAR,
        BackendKind::Remote => backend::remote::JOB_ID_VAR,
    }
}

/// Task delivering the job's results to a callback endpoint
///
/// Header values are shell words (quote literals with `shell_quote`).
/// `files` is a shell expression expanding to the paths to upload.
pub fn callback_task(
    farm: &BuildFarm,
    endpoint: Endpoint,
    headers: &[(&str, String)],
    files: &str,
) -> Task {
    let config = farm.config();
    let job_id = format!("\"${}\"", job_id_var(farm));
    let headers = std::iter::once(("Job-Id", job_id))
        .chain(headers.iter().map(|(key, value)| (*key, value.clone())));

    let script = match config.jobs.service {
        BackendKind::Local => {
            let args: Vec<String> = headers
                .map(|(key, value)| format!("-H {key}={value}"))
                .collect();
            format!(
                "
            {} callback {} \\
                {} \\
                {}
            ",
                config.jobs.callback_command,
                endpoint.as_str(),
                args.join(" \\\n                "),
                files
            )
        }
        BackendKind::Remote => {
            let args: Vec<String> = headers
                .map(|(key, value)| format!("-H \"X-Buildfarm-{key}: \"{value}"))
                .collect();
            let url = format!(
                "{}/api/job-callback/{}",
                config.remote.callback_url.trim_end_matches('/'),
                endpoint.as_str()
            );
            format!(
                "
            set --
            for f in {}; do
                set -- \"$@\" -F \"file[]=@$f\"
            done
            curl -fsS \\
                -H \"X-Buildfarm-Token: $(cat ~/.buildfarm_callback_token)\" \\
                {} \\
                \"$@\" \\
                {}
            ",
                files,
                args.join(" \\\n                "),
                shell_quote(&url)
            )
        }
    };

    Task::new("submit", script)
}

/// URL of a repository as seen from inside a job (without arch)
pub fn repo_url(farm: &BuildFarm, kind: RepoKind, branch: &str, splitrepo: Option<&str>) -> String {
    let layout = farm.layout();
    let dir = layout.path(kind, None, branch, splitrepo);
    let relative = dir.strip_prefix(layout.root(kind)).unwrap_or(&dir);
    let base = match kind {
        RepoKind::Wip => &farm.config().jobs.mirror_wip,
        _ => &farm.config().jobs.mirror,
    };
    format!("{}/{}", base.trim_end_matches('/'), relative.display())
}

/// Task printing checksums of the built packages
pub fn checksums_task() -> Task {
    Task::new(
        "checksums",
        r#"
            cd "$(pmbootstrap -q config work)/packages/"
            sha512sum $(find . -name '*.apk')
        "#,
    )
}

/// Shell expression listing the packages built by a job
pub const BUILT_PACKAGES: &str = r#"$(find "$(pmbootstrap -q config work)/packages" -name '*.apk')"#;

/// Sync the status of every building entity with the job service
///
/// Returns the number of entities whose status changed.
pub fn reconcile(farm: &BuildFarm) -> Result<usize> {
    let conn = farm.open_db()?;
    let mut changed = 0;
    changed += reconcile_packages(farm, &conn)?;
    changed += reconcile_images(farm, &conn)?;
    changed += reconcile_repo_bootstraps(farm, &conn)?;
    if changed > 0 {
        info!("Job status sync: {} change(s)", changed);
    }
    Ok(changed)
}

fn reconcile_packages(farm: &BuildFarm, conn: &Connection) -> Result<usize> {
    debug!("Checking if building packages have failed or finished");
    let mut changed = 0;

    for package in Package::list_by_status(conn, PackageStatus::Building)? {
        let Some(job_id) = package.job_id else {
            warn!("{}/{}/{}: building without a job id", package.branch, package.arch, package.pkgname);
            continue;
        };
        let new_status = match farm.backend().poll(job_id)?.outcome() {
            JobOutcome::InProgress => continue,
            JobOutcome::Succeeded => PackageStatus::Built,
            JobOutcome::Failed => PackageStatus::Failed,
        };

        // a callback may have moved the row while we were polling
        let Some(id) = package.id else { continue };
        let Some(mut current) = Package::find_by_id(conn, id)? else {
            continue;
        };
        if current.status != PackageStatus::Building || current.job_id != Some(job_id) {
            continue;
        }

        current.set_status(conn, new_status)?;
        LogEntry::for_package(&current, &format!("job_update_package_status_{new_status}"))
            .record(conn)?;
        changed += 1;
    }
    Ok(changed)
}

fn reconcile_images(farm: &BuildFarm, conn: &Connection) -> Result<usize> {
    debug!("Checking if building images have failed or finished");
    let mut changed = 0;

    for image in Image::list_by_status(conn, ImageStatus::Building)? {
        let Some(job_id) = image.job_id else {
            warn!("{}:{}:{}: building without a job id", image.branch, image.device, image.ui);
            continue;
        };
        let new_status = match farm.backend().poll(job_id)?.outcome() {
            JobOutcome::InProgress => continue,
            JobOutcome::Succeeded => ImageStatus::Published,
            JobOutcome::Failed => ImageStatus::Failed,
        };

        let Some(id) = image.id else { continue };
        let Some(mut current) = Image::find_by_id(conn, id)? else {
            continue;
        };
        if current.status != ImageStatus::Building || current.job_id != Some(job_id) {
            continue;
        }

        current.set_status(conn, new_status)?;
        LogEntry::for_image(&current, &format!("job_update_image_status_{new_status}"))
            .record(conn)?;
        changed += 1;
    }
    Ok(changed)
}

fn reconcile_repo_bootstraps(farm: &BuildFarm, conn: &Connection) -> Result<usize> {
    debug!("Checking if building repo bootstraps have failed or finished");
    let mut changed = 0;

    for rb in RepoBootstrap::list_by_status(conn, RepoBootstrapStatus::Building)? {
        let Some(job_id) = rb.job_id else {
            warn!("{}/{}/{}: building without a job id", rb.branch, rb.splitrepo, rb.arch);
            continue;
        };
        let new_status = match farm.backend().poll(job_id)?.outcome() {
            JobOutcome::InProgress => continue,
            JobOutcome::Succeeded => RepoBootstrapStatus::Built,
            JobOutcome::Failed => RepoBootstrapStatus::Failed,
        };

        let Some(mut current) = RepoBootstrap::find(conn, &rb.arch, &rb.branch, &rb.splitrepo)?
        else {
            continue;
        };
        if current.status != RepoBootstrapStatus::Building || current.job_id != Some(job_id) {
            continue;
        }

        current.set_status(conn, new_status)?;
        LogEntry::for_repo_bootstrap(
            &current,
            &format!("job_update_repo_bootstrap_status_{new_status}"),
        )
        .record(conn)?;
        changed += 1;
    }
    Ok(changed)
}
