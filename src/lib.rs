// src/lib.rs

//! Build farm coordinator
//!
//! Tracks the build state of packages, images and repo bootstraps of a
//! distribution, decides what to build next, hands build jobs to a job
//! service and turns their results into published repositories.
//!
//! # Architecture
//!
//! - Database-first: all build state in SQLite, one live row per package
//! - Three repositories per (arch, branch, splitrepo): WIP (fresh builds),
//!   symlink (WIP merged with final, awaiting a signature) and final
//! - One serialized build pass decides everything; callbacks and the
//!   status sync timer only record results and trigger a pass
//! - Job services behind the `JobBackend` trait (local processes or a
//!   remote CI service)

pub mod api;
pub mod backend;
pub mod config;
pub mod db;
mod error;
pub mod farm;
pub mod images;
pub mod jobs;
pub mod repo;
pub mod report;
pub mod scheduler;
pub mod timer;

pub use backend::{JobBackend, JobSpec, JobStatus, Task};
pub use config::Config;
pub use error::{Error, Result};
pub use farm::BuildFarm;
pub use scheduler::{PassOptions, PassSummary};
