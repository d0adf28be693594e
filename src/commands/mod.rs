// src/commands/mod.rs
//! Command handlers for the build farm CLI

mod build;
mod callback;
mod reset;
mod staging;
mod system;

pub use build::{cmd_build, cmd_get_depends, cmd_reconcile, cmd_status};
pub use callback::cmd_callback;
pub use reset::{cmd_reset_building_to_failed, cmd_reset_failed_to_queued};
pub use staging::{cmd_staging_init, cmd_staging_list, cmd_staging_remove};
pub use system::{cmd_completions, cmd_init, cmd_serve};

use anyhow::{Context, Result};
use buildfarm::BuildFarm;
use buildfarm::config::Config;
use std::path::Path;
use tracing::debug;

/// Configuration used when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/buildfarm/buildfarm.toml";

/// Load the configuration from `path`, the default location, or built-in defaults
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                Config::load(default)
            } else {
                debug!("{} not found, using built-in defaults", DEFAULT_CONFIG_PATH);
                Ok(Config::default())
            }
        }
    }
}

/// Build the farm context for a command
pub fn open_farm(config_path: Option<&Path>) -> Result<BuildFarm> {
    let config = load_config(config_path)?;
    BuildFarm::new(config).context("Failed to set up the job service")
}
