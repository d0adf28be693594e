// src/backend/mod.rs

//! Job services
//!
//! A job service runs a job (an ordered list of named shell tasks) somewhere
//! else and reports its status. The scheduler only ever talks to the
//! `JobBackend` trait; the implementation is picked once from the
//! configuration.
//!
//! - `local` - runs jobs as detached shell processes on this machine
//! - `remote` - submits jobs to a remote CI service over GraphQL

pub mod local;
pub mod remote;

pub use local::LocalBackend;
pub use remote::RemoteBackend;

use crate::config::Config;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Status of a job as reported by the job service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Success,
    Failed,
    Timeout,
    Cancelled,
}

/// What a job status means for the entity that is building
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    InProgress,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn outcome(self) -> JobOutcome {
        match self {
            JobStatus::Pending | JobStatus::Queued | JobStatus::Running => JobOutcome::InProgress,
            JobStatus::Success => JobOutcome::Succeeded,
            JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled => JobOutcome::Failed,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    /// Unknown states are fatal, they are never mapped to a default
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            "timeout" => Ok(JobStatus::Timeout),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(Error::UnknownJobStatus(s.to_string())),
        }
    }
}

/// One named shell task of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    pub script: String,
}

impl Task {
    pub fn new(name: &str, script: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            script: script.into(),
        }
    }
}

/// Everything a job service needs to run a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub note: String,
    /// Run in order; the job fails at the first failing task
    pub tasks: Vec<Task>,
    pub branch: String,
    pub timeout: Duration,
}

/// A service that runs jobs
pub trait JobBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Prepare the service (directories, credentials)
    fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Start a job, returning its id
    fn submit(&self, spec: &JobSpec) -> Result<i64>;

    /// Current status of a job
    fn poll(&self, job_id: i64) -> Result<JobStatus>;

    /// Human readable link to the job
    fn link(&self, job_id: i64) -> String;
}

/// Available job services
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Remote,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Remote => "remote",
        }
    }
}

/// Create the job service selected in the configuration
pub fn create(config: &Config) -> Result<Box<dyn JobBackend>> {
    let backend: Box<dyn JobBackend> = match config.jobs.service {
        BackendKind::Local => Box::new(LocalBackend::new(config.paths.temp.join("local_jobs"))),
        BackendKind::Remote => Box::new(RemoteBackend::new(&config.remote)?),
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!("running".parse::<JobStatus>().unwrap(), JobStatus::Running);
        assert_eq!("SUCCESS".parse::<JobStatus>().unwrap(), JobStatus::Success);
        assert_eq!("cancelled\n".parse::<JobStatus>().unwrap(), JobStatus::Cancelled);
    }

    #[test]
    fn test_unknown_status_is_fatal() {
        let err = "exploded".parse::<JobStatus>().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(JobStatus::Pending.outcome(), JobOutcome::InProgress);
        assert_eq!(JobStatus::Queued.outcome(), JobOutcome::InProgress);
        assert_eq!(JobStatus::Running.outcome(), JobOutcome::InProgress);
        assert_eq!(JobStatus::Success.outcome(), JobOutcome::Succeeded);
        assert_eq!(JobStatus::Failed.outcome(), JobOutcome::Failed);
        assert_eq!(JobStatus::Timeout.outcome(), JobOutcome::Failed);
        assert_eq!(JobStatus::Cancelled.outcome(), JobOutcome::Failed);
    }
}
