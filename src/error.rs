// src/error.rs

//! Error types for the build farm
//!
//! Errors fall into three groups:
//! - client errors (bad callback input, stale jobs) are rejected at the
//!   boundary without touching any row
//! - fatal errors (rate limit tripped, unknown backend state, bootstrap
//!   mismatch) stop the process
//! - everything else is an ordinary operational failure

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Stale job: {0}")]
    StaleJob(String),

    #[error("Invalid {entity} status transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Job backend error: {0}")]
    BackendError(String),

    #[error("Unrecognized job status from backend: {0}")]
    UnknownJobStatus(String),

    #[error("We keep starting the same job: {0}")]
    RateLimitTripped(String),

    #[error("Repo bootstrap upload mismatch: {0}")]
    BootstrapMismatch(String),

    #[error("Artifact error: {0}")]
    ArtifactError(String),

    #[error("Repository inconsistency: {0}")]
    RepoInconsistent(String),
}

impl Error {
    /// Errors that must halt the scheduler process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnknownJobStatus(_) | Error::RateLimitTripped(_) | Error::BootstrapMismatch(_)
        )
    }

    /// Errors caused by the caller of a callback
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidRequest(_) | Error::StaleJob(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidRequest(format!("Invalid JSON: {err}"))
    }
}

/// Result type alias for build farm operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::RateLimitTripped("job_build_package".into()).is_fatal());
        assert!(Error::UnknownJobStatus("exploded".into()).is_fatal());
        assert!(Error::BootstrapMismatch("nothing matched".into()).is_fatal());
        assert!(!Error::StaleJob("old job".into()).is_fatal());
    }

    #[test]
    fn test_client_classification() {
        assert!(Error::InvalidRequest("missing header".into()).is_client_error());
        assert!(Error::StaleJob("old job".into()).is_client_error());
        assert!(!Error::IoError("disk full".into()).is_client_error());
    }
}
