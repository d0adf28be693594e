// src/repo/layout.rs

//! Repository path resolver
//!
//! Every repository lives below one of three roots:
//!
//! ```text
//! <root>/[extra-repos/<splitrepo>/]<branch>/<arch>
//! <root>/[extra-repos/<splitrepo>/]staging/<name>/<origin>/<arch>
//! ```
//!
//! Staging repositories end in the origin branch name so that mirror URLs
//! of the origin branch work for them unchanged.

use crate::config::Config;
use crate::repo::staging;
use std::path::{Path, PathBuf};

/// Which copy of a repository to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoKind {
    /// Freshly built, unpublished artifacts
    Wip,
    /// Merged WIP + final view used to build and sign a new index
    Symlink,
    /// Published repository
    Final,
}

/// Resolves repository directories; performs no I/O
#[derive(Debug, Clone)]
pub struct RepoLayout {
    wip: PathBuf,
    symlink: PathBuf,
    final_root: PathBuf,
    origins: Vec<String>,
}

impl RepoLayout {
    pub fn new(config: &Config) -> Self {
        Self {
            wip: config.paths.repo_wip.clone(),
            symlink: config.paths.temp.join("repo_symlink"),
            final_root: config.paths.repo_final.clone(),
            origins: config.branches.iter().map(|b| b.name.clone()).collect(),
        }
    }

    pub fn root(&self, kind: RepoKind) -> &Path {
        match kind {
            RepoKind::Wip => &self.wip,
            RepoKind::Symlink => &self.symlink,
            RepoKind::Final => &self.final_root,
        }
    }

    /// Directory of one repository
    pub fn path(
        &self,
        kind: RepoKind,
        arch: Option<&str>,
        branch: &str,
        splitrepo: Option<&str>,
    ) -> PathBuf {
        let mut path = self.root(kind).to_path_buf();

        if let Some(splitrepo) = splitrepo {
            path.push("extra-repos");
            path.push(splitrepo);
        }

        match staging::split_known(&self.origins, branch) {
            Some((origin, name)) => {
                path.push("staging");
                path.push(name);
                path.push(origin);
            }
            None => path.push(branch),
        }

        if let Some(arch) = arch {
            path.push(arch);
        }
        path
    }

    /// Directory holding every origin copy of one staging name
    pub fn staging_name_dir(&self, kind: RepoKind, name: &str) -> PathBuf {
        self.root(kind).join("staging").join(name)
    }

    /// Marker file whose presence makes a staging branch exist
    pub fn staging_marker(&self, origin: &str, name: &str) -> PathBuf {
        self.staging_name_dir(RepoKind::Final, name)
            .join(origin)
            .join("README")
    }
}
