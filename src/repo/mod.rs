// src/repo/mod.rs

//! Package repositories on disk
//!
//! Every (arch, branch, splitrepo) has three copies:
//! - WIP: artifacts uploaded by build jobs, not published yet
//! - symlink: WIP merged with the still-current final artifacts, indexed
//!   and signed before publishing
//! - final: the published repository
//!
//! Publishing moves a repository through WIP -> symlink -> final. The
//! database is reconciled with what ended up on disk afterwards.

pub mod artifact;
pub mod bootstrap;
pub mod final_repo;
pub mod index;
pub mod layout;
pub mod staging;
pub mod status;
pub mod symlink;
pub mod wip;

pub use layout::{RepoKind, RepoLayout};
