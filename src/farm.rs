// src/farm.rs

//! The build farm context
//!
//! `BuildFarm` ties together the configuration, the repository layout, the
//! job service and the scheduler. It is shared (behind an `Arc`) by the
//! timer thread and callback handlers; everything that changes repository
//! state goes through `build()` or `exclusive()`, which serialize on the
//! scheduler gate.

use crate::backend::{self, JobBackend};
use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::repo::{RepoKind, RepoLayout};
use crate::scheduler::{PassOptions, PassSummary, Scheduler};
use rusqlite::Connection;
use std::fs;
use tracing::info;

pub struct BuildFarm {
    config: Config,
    layout: RepoLayout,
    backend: Box<dyn JobBackend>,
    scheduler: Scheduler,
}

impl BuildFarm {
    /// Create a farm with the job service selected in the configuration
    pub fn new(config: Config) -> Result<Self> {
        let backend = backend::create(&config)?;
        Ok(Self::with_backend(config, backend))
    }

    /// Create a farm with an explicit job service
    pub fn with_backend(config: Config, backend: Box<dyn JobBackend>) -> Self {
        let layout = RepoLayout::new(&config);
        let scheduler = Scheduler::new(config.scheduler_lock_path());
        Self {
            config,
            layout,
            backend,
            scheduler,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &RepoLayout {
        &self.layout
    }

    pub fn backend(&self) -> &dyn JobBackend {
        self.backend.as_ref()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Create the database, the repository roots and prepare the job service
    pub fn init(&self) -> Result<()> {
        db::init(&self.config.paths.db)?;
        for kind in [RepoKind::Wip, RepoKind::Symlink, RepoKind::Final] {
            fs::create_dir_all(self.layout.root(kind))?;
        }
        fs::create_dir_all(&self.config.paths.temp)?;
        fs::create_dir_all(&self.config.paths.images)?;
        self.backend.init()?;
        info!(
            "Build farm initialized ({} job service, database {})",
            self.backend.name(),
            self.config.paths.db.display()
        );
        Ok(())
    }

    /// Open a new database connection
    pub fn open_db(&self) -> Result<Connection> {
        db::open(&self.config.paths.db)
    }

    /// Run one build pass with default options
    pub fn build(&self) -> Result<PassSummary> {
        self.build_with(&PassOptions::default())
    }

    pub fn build_with(&self, options: &PassOptions) -> Result<PassSummary> {
        self.scheduler.run_pass(self, options)
    }

    /// Number of build passes completed by this process
    pub fn passes(&self) -> u64 {
        self.scheduler.passes()
    }

    /// Run `f` while no build pass can touch the repositories
    pub(crate) fn exclusive<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.scheduler.exclusive(f)
    }
}
