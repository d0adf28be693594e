// src/db/models/mod.rs

//! Data models for the build state tables
//!
//! Each model owns the SQL for its table. Status changes go through the
//! model so that the transition tables are enforced in one place.

mod image;
mod log;
mod package;
mod repo_bootstrap;

pub use image::{Image, ImageStatus};
pub use log::LogEntry;
pub use package::{Package, PackageStatus};
pub use repo_bootstrap::{RepoBootstrap, RepoBootstrapStatus};
