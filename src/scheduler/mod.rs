// src/scheduler/mod.rs

//! Build scheduler
//!
//! A build pass decides what to start next: repo bootstraps, packages and
//! images, within the global budget of parallel jobs. When every package
//! of an (arch, branch) is built, the pass publishes its WIP repo instead.
//!
//! Passes never overlap. The symlink repos are rebuilt from scratch during
//! a pass, and a job or a second pass seeing one half-written would serve
//! or sign a corrupt index. The gate is a mutex for threads of this
//! process plus a file lock for other processes (CLI callbacks).
//!
//! Per pass:
//! 1. slots = max parallel jobs - everything currently building
//! 2. for every branch (configured ones first, then staging branches) and
//!    every arch of it, native arch first:
//!    - staging branches wait until their origin is fully published, then
//!      take over what the origin already built
//!    - an unpublished repo bootstrap blocks all package builds
//!    - otherwise start packages whose dependencies are done, failed ones
//!      with retries left before queued ones
//!    - nothing startable: either the repo is stuck, or the WIP repo is
//!      complete and gets published
//!    - other arches wait until the native arch is fully published
//! 3. images for configured branches without unpublished packages

mod lock;
pub mod select;

pub use lock::PassLock;

use crate::config::BranchConfig;
use crate::db::models::{
    Image, ImageStatus, Package, PackageStatus, RepoBootstrap, RepoBootstrapStatus,
};
use crate::error::Result;
use crate::farm::BuildFarm;
use crate::jobs;
use crate::repo::{staging, symlink};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Knobs for a single build pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOptions {
    /// Publish this branch even if its WIP repo is empty, e.g. after
    /// packages were deleted from the database
    pub force_repo_update_branch: Option<String>,

    /// Never publish (used by the status sync timer)
    pub no_repo_update: bool,
}

impl PassOptions {
    pub fn no_repo_update() -> Self {
        Self {
            no_repo_update: true,
            ..Self::default()
        }
    }
}

/// What a build pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Package builds started, as `branch/arch/pkgname`
    pub started: Vec<String>,
    /// Repo bootstraps started, as `branch/splitrepo/arch`
    pub bootstraps_started: Vec<String>,
    /// Image builds started, as `branch/device:ui`
    pub images_started: Vec<String>,
    /// Repos with unfinished packages that could not start anything
    pub stuck: Vec<String>,
    /// Repos whose symlink repo was created and sent for signing
    pub published: Vec<String>,
}

impl PassSummary {
    pub fn jobs_started(&self) -> usize {
        self.started.len() + self.bootstraps_started.len() + self.images_started.len()
    }
}

/// Serializes build passes and counts them
pub struct Scheduler {
    gate: Mutex<()>,
    passes: AtomicU64,
    lock_path: PathBuf,
}

impl Scheduler {
    pub fn new(lock_path: impl Into<PathBuf>) -> Self {
        Self {
            gate: Mutex::new(()),
            passes: AtomicU64::new(0),
            lock_path: lock_path.into(),
        }
    }

    /// Number of passes completed by this process
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<(MutexGuard<'_, ()>, PassLock)> {
        // a panic in an earlier pass leaves nothing half-done in memory
        let guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let file_lock = PassLock::acquire(&self.lock_path)?;
        Ok((guard, file_lock))
    }

    /// Run one build pass
    pub fn run_pass(&self, farm: &BuildFarm, options: &PassOptions) -> Result<PassSummary> {
        let _lock = self.lock()?;
        let conn = farm.open_db()?;

        let summary = Pass::new(farm, &conn, options).run()?;
        self.passes.fetch_add(1, Ordering::SeqCst);

        if summary.jobs_started() > 0 || !summary.published.is_empty() {
            info!(
                "Build pass: {} package(s), {} bootstrap(s), {} image(s) started, {} repo(s) published",
                summary.started.len(),
                summary.bootstraps_started.len(),
                summary.images_started.len(),
                summary.published.len()
            );
        }
        Ok(summary)
    }

    /// Run `f` while no pass is running
    pub(crate) fn exclusive<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _lock = self.lock()?;
        f()
    }
}

/// Format an (arch, branch, splitrepo) for log messages
fn fmt_repo(arch: &str, branch: &str, splitrepo: Option<&str>) -> String {
    match splitrepo {
        Some(splitrepo) => format!("{branch}:{splitrepo}/{arch}"),
        None => format!("{branch}/{arch}"),
    }
}

/// State of one pass
struct Pass<'a> {
    farm: &'a BuildFarm,
    conn: &'a Connection,
    options: &'a PassOptions,
    slots: i64,
    summary: PassSummary,
}

impl<'a> Pass<'a> {
    fn new(farm: &'a BuildFarm, conn: &'a Connection, options: &'a PassOptions) -> Self {
        Self {
            farm,
            conn,
            options,
            slots: 0,
            summary: PassSummary::default(),
        }
    }

    fn retry_max(&self) -> i64 {
        self.farm.config().scheduler.retry_count_max
    }

    fn run(mut self) -> Result<PassSummary> {
        let running = Package::count_by_status(self.conn, PackageStatus::Building)?
            + Image::count_by_status(self.conn, ImageStatus::Building)?
            + RepoBootstrap::count_by_status(self.conn, RepoBootstrapStatus::Building)?;
        let max = self.farm.config().scheduler.max_parallel_build_jobs;
        self.slots = max as i64 - running as i64;
        debug!("Build pass: {} running, {} slot(s) available", running, self.slots);

        for branch in staging::discover(self.farm)? {
            self.build_branch(&branch)?;
        }

        if self.slots > 0 {
            self.build_images()?;
        }
        Ok(self.summary)
    }

    fn build_branch(&mut self, branch: &BranchConfig) -> Result<()> {
        for (i, arch) in branch.arches.iter().enumerate() {
            self.build_arch_branch(arch, &branch.name)?;

            // cross compilers come from the native arch
            if i == 0 && Package::count_unpublished(self.conn, &branch.name, Some(arch))? > 0 {
                debug!(
                    "{}/{}: has unpublished packages, not building other arches",
                    branch.name, arch
                );
                break;
            }
        }
        Ok(())
    }

    fn build_arch_branch(&mut self, arch: &str, branch: &str) -> Result<()> {
        let conn = self.conn;
        let repo = fmt_repo(arch, branch, None);

        if let Some((origin, _)) = staging::branch_split(&self.farm.config().branches, branch) {
            if Package::count_unpublished(conn, origin, None)? > 0 {
                debug!("[{}] skipping, {} has unpublished packages", repo, origin);
                return Ok(());
            }

            let mut splitrepos = Package::splitrepos(conn, arch, origin)?;
            if !splitrepos.contains(&None) {
                splitrepos.insert(0, None);
            }
            for splitrepo in splitrepos {
                staging::sync_with_origin(self.farm, conn, branch, arch, splitrepo.as_deref())?;
            }
        }

        if let Some(mut rb) = RepoBootstrap::list_unpublished(conn, arch, branch)?
            .into_iter()
            .next()
        {
            return self.handle_repo_bootstrap(&mut rb);
        }

        let (started, exhausted) = self.build_packages(arch, branch)?;
        if started > 0 || !exhausted {
            return Ok(());
        }

        if Package::has_unfinished(conn, arch, branch)? {
            warn!("[{}] repo is stuck", repo);
            self.summary.stuck.push(repo);
            return Ok(());
        }

        let force = self.options.force_repo_update_branch.as_deref() == Some(branch);
        if self.options.no_repo_update && !force {
            debug!("[{}] WIP repo complete, not publishing (no_repo_update)", repo);
            return Ok(());
        }

        let mut splitrepos = Package::splitrepos(conn, arch, branch)?;
        if force && !splitrepos.contains(&None) {
            splitrepos.insert(0, None);
        }
        for splitrepo in splitrepos {
            if symlink::create(self.farm, conn, arch, branch, splitrepo.as_deref(), force)? {
                self.summary
                    .published
                    .push(fmt_repo(arch, branch, splitrepo.as_deref()));
            }
        }
        Ok(())
    }

    /// Start the bootstrap or publish it; nothing else is built meanwhile
    fn handle_repo_bootstrap(&mut self, rb: &mut RepoBootstrap) -> Result<()> {
        let label = format!("{}/{}/{}", rb.branch, rb.splitrepo, rb.arch);

        if self.slots <= 0 {
            debug!("{}: repo bootstrap waiting, no slots available", label);
            return Ok(());
        }

        let can_start = match rb.status {
            RepoBootstrapStatus::Queued => true,
            RepoBootstrapStatus::Failed => select::retry_eligible(rb.retry_count, self.retry_max()),
            _ => false,
        };

        if can_start {
            jobs::repo_bootstrap::run(self.farm, self.conn, rb)?;
            self.slots -= 1;
            self.summary.bootstraps_started.push(label.clone());
        } else if rb.status == RepoBootstrapStatus::Built {
            // published even under no_repo_update, packages stay blocked until then
            info!("{}: publishing repo bootstrap", label);
            symlink::create(
                self.farm,
                self.conn,
                &rb.arch,
                &rb.branch,
                Some(&rb.splitrepo),
                true,
            )?;
            self.slots -= 1;
            self.summary
                .published
                .push(fmt_repo(&rb.arch, &rb.branch, Some(&rb.splitrepo)));
        }

        debug!("{}: repo bootstrap not done, not building other packages", label);
        Ok(())
    }

    /// Start as many packages as slots allow
    ///
    /// Returns how many were started, and whether the loop ended because no
    /// candidate was left (as opposed to running out of slots).
    fn build_packages(&mut self, arch: &str, branch: &str) -> Result<(usize, bool)> {
        let mut started = 0;

        loop {
            let candidates = Package::list_candidates(self.conn, arch, branch)?;
            let dependency_statuses = Package::dependency_statuses(self.conn, arch, branch)?;
            let Some(next) =
                select::pick_next_package(&candidates, &dependency_statuses, self.retry_max())
            else {
                if !candidates.is_empty() {
                    debug!(
                        "{}/{}: {} candidate(s), none with finished dependencies",
                        branch,
                        arch,
                        candidates.len()
                    );
                }
                return Ok((started, true));
            };

            if self.slots <= 0 {
                debug!("{}/{}: no more slots available", branch, arch);
                return Ok((started, false));
            }

            let mut package = next.clone();
            let label = format!("{}/{}/{}", branch, arch, package.pkgname);
            if jobs::build_package::run(self.farm, self.conn, &mut package)? {
                self.slots -= 1;
                started += 1;
                self.summary.started.push(label);
            } else {
                debug!("{}: found in WIP repo, marked as built", label);
            }
        }
    }

    fn build_images(&mut self) -> Result<()> {
        let branches: Vec<String> = self
            .farm
            .config()
            .branches
            .iter()
            .map(|b| b.name.clone())
            .collect();

        for branch in branches {
            if Package::count_unpublished(self.conn, &branch, None)? > 0 {
                continue;
            }

            while self.slots > 0 {
                let candidates = Image::list_candidates(self.conn, &branch)?;
                let Some(next) = select::pick_next_image(&candidates, self.retry_max()) else {
                    break;
                };

                let mut image = next.clone();
                jobs::build_image::run(self.farm, self.conn, &mut image)?;
                self.slots -= 1;
                self.summary
                    .images_started
                    .push(format!("{}/{}:{}", image.branch, image.device, image.ui));
            }

            if self.slots <= 0 {
                break;
            }
        }
        Ok(())
    }
}
