// src/config.rs
//! Configuration file parsing for the build farm
//!
//! Supports TOML configuration files with the following sections:
//! - [paths] - Database, repository and temp directories
//! - [scheduler] - Concurrency budget and retry ceiling
//! - [jobs] - Job service selection and job timeout
//! - [remote] - Remote CI service credentials and endpoints
//! - [staging] - Architectures built for staging branches
//! - [signing] - Optional external command signing the WIP index
//! - [timer] - Status sync interval
//! - [images] - Image retention
//! - [[branch]] - Ordered list of release branches
//! - [[image]] - Images to build per device/UI

use crate::backend::BackendKind;
use crate::repo::staging::STAGING_SEPARATOR;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// TOML configuration file structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsSection,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub jobs: JobsSection,

    #[serde(default)]
    pub remote: RemoteSection,

    #[serde(default)]
    pub staging: StagingSection,

    #[serde(default)]
    pub signing: SigningSection,

    #[serde(default)]
    pub timer: TimerSection,

    #[serde(default)]
    pub images: ImagesSection,

    /// Release branches in scheduling order
    #[serde(default = "default_branches", rename = "branch")]
    pub branches: Vec<BranchConfig>,

    /// Splitrepo directories that need a one-shot bootstrap build
    #[serde(default = "default_repo_bootstrap_dirs")]
    pub repo_bootstrap_dirs: Vec<String>,

    /// Images to build
    #[serde(default, rename = "image")]
    pub image_targets: Vec<ImageTarget>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsSection::default(),
            scheduler: SchedulerSection::default(),
            jobs: JobsSection::default(),
            remote: RemoteSection::default(),
            staging: StagingSection::default(),
            signing: SigningSection::default(),
            timer: TimerSection::default(),
            images: ImagesSection::default(),
            branches: default_branches(),
            repo_bootstrap_dirs: default_repo_bootstrap_dirs(),
            image_targets: Vec::new(),
        }
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    /// SQLite database
    #[serde(default = "default_db")]
    pub db: PathBuf,

    /// Root of the work-in-progress repositories
    #[serde(default = "default_repo_wip")]
    pub repo_wip: PathBuf,

    /// Root of the published repositories
    #[serde(default = "default_repo_final")]
    pub repo_final: PathBuf,

    /// Scratch space (symlink repos, local jobs, locks)
    #[serde(default = "default_temp")]
    pub temp: PathBuf,

    /// Root of the published images
    #[serde(default = "default_images")]
    pub images: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            db: default_db(),
            repo_wip: default_repo_wip(),
            repo_final: default_repo_final(),
            temp: default_temp(),
            images: default_images(),
        }
    }
}

fn default_db() -> PathBuf {
    PathBuf::from("/var/lib/buildfarm/buildfarm.db")
}

fn default_repo_wip() -> PathBuf {
    PathBuf::from("/var/lib/buildfarm/wip")
}

fn default_repo_final() -> PathBuf {
    PathBuf::from("/var/lib/buildfarm/final")
}

fn default_temp() -> PathBuf {
    PathBuf::from("/var/lib/buildfarm/temp")
}

fn default_images() -> PathBuf {
    PathBuf::from("/var/lib/buildfarm/images")
}

/// Scheduler limits
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Global number of concurrently building packages, images and bootstraps
    #[serde(default = "default_max_parallel_build_jobs")]
    pub max_parallel_build_jobs: usize,

    /// Failed builds are retried while their retry count is below this
    #[serde(default = "default_retry_count_max")]
    pub retry_count_max: i64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_parallel_build_jobs: default_max_parallel_build_jobs(),
            retry_count_max: default_retry_count_max(),
        }
    }
}

fn default_max_parallel_build_jobs() -> usize {
    5
}

fn default_retry_count_max() -> i64 {
    5
}

/// Job service settings
#[derive(Debug, Clone, Deserialize)]
pub struct JobsSection {
    /// Which job service runs the jobs
    #[serde(default)]
    pub service: BackendKind,

    /// Timeout passed to the job service, in seconds
    #[serde(default = "default_job_timeout")]
    pub timeout_secs: u64,

    /// Command used by job scripts to deliver callbacks (local service)
    #[serde(default = "default_callback_command")]
    pub callback_command: String,

    /// Mirror of the final repositories, as seen from inside a job
    #[serde(default = "default_mirror")]
    pub mirror: String,

    /// Mirror of the WIP repositories, as seen from inside a job
    #[serde(default = "default_mirror_wip")]
    pub mirror_wip: String,
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            service: BackendKind::default(),
            timeout_secs: default_job_timeout(),
            callback_command: default_callback_command(),
            mirror: default_mirror(),
            mirror_wip: default_mirror_wip(),
        }
    }
}

fn default_job_timeout() -> u64 {
    14400
}

fn default_callback_command() -> String {
    "buildfarm".to_string()
}

fn default_mirror() -> String {
    "http://localhost/final".to_string()
}

fn default_mirror_wip() -> String {
    "http://localhost/wip".to_string()
}

/// Remote CI service settings
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSection {
    /// GraphQL endpoint
    #[serde(default = "default_remote_api")]
    pub api_url: String,

    /// Base URL for human readable job links
    #[serde(default = "default_remote_web")]
    pub web_url: String,

    /// Account that owns the jobs
    #[serde(default)]
    pub user: String,

    /// API token
    #[serde(default)]
    pub token: Option<String>,

    /// File containing the API token (used when `token` is unset)
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    /// Build image used for jobs
    #[serde(default = "default_remote_image")]
    pub image: String,

    /// Public URL of the callback endpoint, as seen from the job
    #[serde(default)]
    pub callback_url: String,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            api_url: default_remote_api(),
            web_url: default_remote_web(),
            user: String::new(),
            token: None,
            token_file: None,
            image: default_remote_image(),
            callback_url: String::new(),
        }
    }
}

fn default_remote_api() -> String {
    "https://builds.sr.ht/query".to_string()
}

fn default_remote_web() -> String {
    "https://builds.sr.ht".to_string()
}

fn default_remote_image() -> String {
    "alpine/edge".to_string()
}

/// Staging branch settings
#[derive(Debug, Clone, Deserialize)]
pub struct StagingSection {
    /// Architectures built for every staging branch
    #[serde(default = "default_staging_arches")]
    pub arches: Vec<String>,
}

impl Default for StagingSection {
    fn default() -> Self {
        Self {
            arches: default_staging_arches(),
        }
    }
}

fn default_staging_arches() -> Vec<String> {
    vec!["x86_64".to_string()]
}

/// Index signing
#[derive(Debug, Clone, Deserialize)]
pub struct SigningSection {
    /// Command (program and arguments) run with the WIP index path appended
    #[serde(default)]
    pub wip_command: Option<Vec<String>>,

    /// Private key used by sign_index jobs, as seen from inside a job
    #[serde(default = "default_final_key")]
    pub final_key: String,
}

impl Default for SigningSection {
    fn default() -> Self {
        Self {
            wip_command: None,
            final_key: default_final_key(),
        }
    }
}

fn default_final_key() -> String {
    "$HOME/.final.rsa".to_string()
}

/// Status sync timer
#[derive(Debug, Clone, Deserialize)]
pub struct TimerSection {
    #[serde(default = "default_timer_interval")]
    pub interval_secs: u64,
}

impl Default for TimerSection {
    fn default() -> Self {
        Self {
            interval_secs: default_timer_interval(),
        }
    }
}

fn default_timer_interval() -> u64 {
    300
}

/// Image retention and rebuild policy
#[derive(Debug, Clone, Deserialize)]
pub struct ImagesSection {
    /// Published images older than this are removed (the newest is kept)
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// A new image is queued when the newest one is older than this
    #[serde(default = "default_rebuild_interval_days")]
    pub rebuild_interval_days: i64,
}

impl Default for ImagesSection {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            rebuild_interval_days: default_rebuild_interval_days(),
        }
    }
}

fn default_retention_days() -> i64 {
    70
}

fn default_rebuild_interval_days() -> i64 {
    7
}

/// One release branch
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BranchConfig {
    pub name: String,

    /// Architectures in build order; the first one is the native arch
    pub arches: Vec<String>,

    /// Failures on this branch do not count towards the failure alarm
    #[serde(default)]
    pub ignore_errors: bool,

    /// Branch of the build tool used by jobs for this branch
    #[serde(default = "default_pmb_branch")]
    pub pmb_branch: String,
}

impl BranchConfig {
    pub fn new(name: &str, arches: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            arches: arches.iter().map(|a| a.to_string()).collect(),
            ignore_errors: false,
            pmb_branch: default_pmb_branch(),
        }
    }
}

fn default_pmb_branch() -> String {
    "master".to_string()
}

fn default_branches() -> Vec<BranchConfig> {
    vec![BranchConfig::new("master", &["x86_64", "aarch64", "armv7"])]
}

fn default_repo_bootstrap_dirs() -> Vec<String> {
    vec!["systemd".to_string()]
}

/// An image built for a device and UI on a set of branches
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageTarget {
    pub device: String,
    pub ui: String,
    pub branches: Vec<String>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Configuration keeping all state below one directory
    pub fn with_root(root: &Path) -> Self {
        let mut config = Self::default();
        config.paths = PathsSection {
            db: root.join("buildfarm.db"),
            repo_wip: root.join("wip"),
            repo_final: root.join("final"),
            temp: root.join("temp"),
            images: root.join("images"),
        };
        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.branches.is_empty() {
            anyhow::bail!("at least one [[branch]] must be configured");
        }

        for branch in &self.branches {
            if branch.name.is_empty() || branch.name.contains(STAGING_SEPARATOR) {
                anyhow::bail!("invalid branch name: {:?}", branch.name);
            }
            if branch.arches.is_empty() {
                anyhow::bail!("branch {} has no arches", branch.name);
            }
        }

        if self.scheduler.max_parallel_build_jobs == 0 {
            anyhow::bail!("scheduler.max_parallel_build_jobs must be at least 1");
        }

        for target in &self.image_targets {
            for branch in &target.branches {
                if self.branch(branch).is_none() {
                    anyhow::bail!(
                        "image {}:{} references unknown branch {}",
                        target.device,
                        target.ui,
                        branch
                    );
                }
            }
        }

        Ok(())
    }

    /// Look up a configured (non-staging) branch
    pub fn branch(&self, name: &str) -> Option<&BranchConfig> {
        self.branches.iter().find(|b| b.name == name)
    }

    /// Timeout handed to the job service
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.jobs.timeout_secs)
    }

    pub fn timer_interval(&self) -> Duration {
        Duration::from_secs(self.timer.interval_secs)
    }

    /// Lock file serializing build passes across processes
    pub fn scheduler_lock_path(&self) -> PathBuf {
        self.paths.temp.join("scheduler.lock")
    }
}
