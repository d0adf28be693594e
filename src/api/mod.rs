// src/api/mod.rs

//! Inbound job callbacks
//!
//! Jobs report their results to one endpoint per job kind. The transport
//! is not handled here: a callback is a header map plus uploaded files,
//! delivered either by the `callback` CLI command (local job service) or by
//! whatever HTTP front end forwards the remote service's requests.
//!
//! Each handler validates the request against the database first. A
//! request that does not match the current state (a superseded job, a
//! package that moved on) is rejected with `Error::StaleJob` and changes
//! nothing. Accepted results are stored while no build pass runs, then a
//! new pass is started.

pub mod build_image;
pub mod build_package;
pub mod get_depends;
pub mod repo_bootstrap;
pub mod sign_index;
pub mod update_job_status;

pub use get_depends::DependencyRecord;

use crate::config::BranchConfig;
use crate::db::models::{Package, PackageStatus};
use crate::error::{Error, Result};
use crate::farm::BuildFarm;
use crate::repo::staging;
use rusqlite::Connection;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Prefix of callback headers sent over HTTP
pub const HEADER_PREFIX: &str = "x-buildfarm-";

/// Callback endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    BuildPackage,
    BuildImage,
    RepoBootstrap,
    SignIndex,
    GetDepends,
    UpdateJobStatus,
}

impl Endpoint {
    pub const ALL: [Endpoint; 6] = [
        Endpoint::BuildPackage,
        Endpoint::BuildImage,
        Endpoint::RepoBootstrap,
        Endpoint::SignIndex,
        Endpoint::GetDepends,
        Endpoint::UpdateJobStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuildPackage => "build-package",
            Self::BuildImage => "build-image",
            Self::RepoBootstrap => "repo-bootstrap",
            Self::SignIndex => "sign-index",
            Self::GetDepends => "get-depends",
            Self::UpdateJobStatus => "update-job-status",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == normalized)
            .ok_or_else(|| Error::InvalidRequest(format!("unknown callback endpoint: {s}")))
    }
}

/// A file uploaded with a callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: &str, data: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.to_string(),
            data: data.into(),
        }
    }

    /// Read a file from disk, keeping only its base name
    pub fn read(path: &Path) -> Result<Self> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::InvalidRequest(format!("not a file name: {}", path.display()))
            })?;
        let data = fs::read(path)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {e}", path.display())))?;
        Ok(Self::new(filename, data))
    }

    /// Store the file as `dir/<filename>`
    fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(&self.filename);
        fs::write(&path, &self.data)
            .map_err(|e| Error::IoError(format!("Failed to write {}: {e}", path.display())))?;
        Ok(path)
    }
}

/// One callback: identity headers and uploaded files
///
/// Header names are case-insensitive; the `X-Buildfarm-` prefix used on
/// the wire is accepted and ignored.
#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    headers: HashMap<String, String>,
    files: Vec<UploadedFile>,
}

impl CallbackRequest {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(key: &str) -> String {
        let key = key.trim().to_ascii_lowercase();
        match key.strip_prefix(HEADER_PREFIX) {
            Some(stripped) => stripped.to_string(),
            None => key,
        }
    }

    pub fn add_header(&mut self, key: &str, value: &str) {
        self.headers
            .insert(Self::normalize(key), value.trim().to_string());
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.add_header(key, value);
        self
    }

    pub fn add_file(&mut self, file: UploadedFile) {
        self.files.push(file);
    }

    pub fn with_file(mut self, filename: &str, data: impl Into<Vec<u8>>) -> Self {
        self.add_file(UploadedFile::new(filename, data));
        self
    }

    /// Optional header; empty values count as missing
    pub fn header_opt(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&Self::normalize(key))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Required header
    pub fn header(&self, key: &str) -> Result<&str> {
        self.header_opt(key)
            .ok_or_else(|| Error::InvalidRequest(format!("missing header: {key}")))
    }

    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }

    /// Validated job id from the `Job-Id` header
    pub fn job_id(&self) -> Result<i64> {
        let raw = self.header("Job-Id")?;
        raw.parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| Error::InvalidRequest(format!("invalid job id: {raw}")))
    }

    /// Uploaded files, refusing an empty upload and unsafe file names
    fn require_files(&self) -> Result<&[UploadedFile]> {
        if self.files.is_empty() {
            return Err(Error::InvalidRequest("no files uploaded".to_string()));
        }
        for file in &self.files {
            validate_filename(&file.filename)?;
        }
        Ok(&self.files)
    }

    /// The uploaded file with this exact name
    fn file(&self, filename: &str) -> Result<&UploadedFile> {
        self.files
            .iter()
            .find(|f| f.filename == filename)
            .ok_or_else(|| Error::InvalidRequest(format!("missing uploaded file: {filename}")))
    }
}

/// Refuse names that could escape the target directory
fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty()
        || filename.starts_with('.')
        || filename.contains('/')
        || filename.contains('\\')
    {
        return Err(Error::InvalidRequest(format!(
            "invalid file name: {filename:?}"
        )));
    }
    Ok(())
}

/// Branch from the `Branch` header; staging branches count when they exist
pub(crate) fn branch(farm: &BuildFarm, request: &CallbackRequest) -> Result<BranchConfig> {
    let name = request.header("Branch")?;
    staging::discover(farm)?
        .into_iter()
        .find(|b| b.name == name)
        .ok_or_else(|| Error::InvalidRequest(format!("unknown branch: {name}")))
}

/// Arch from the `Arch` header, which must be built for `branch`
pub(crate) fn arch(request: &CallbackRequest, branch: &BranchConfig) -> Result<String> {
    let arch = request.header("Arch")?;
    if !branch.arches.iter().any(|a| a == arch) {
        return Err(Error::InvalidRequest(format!(
            "arch {arch} is not built for branch {}",
            branch.name
        )));
    }
    Ok(arch.to_string())
}

/// The package a build-package callback reports on
///
/// The package must be building with this job id and still want the
/// reported version.
pub(crate) fn building_package(
    conn: &Connection,
    request: &CallbackRequest,
    arch: &str,
    branch: &str,
    job_id: i64,
) -> Result<Package> {
    let pkgname = request.header("Pkgname")?;
    let version = request.header("Version")?;

    let package = Package::find(conn, arch, branch, pkgname)?.ok_or_else(|| {
        Error::InvalidRequest(format!("unknown package: {branch}/{arch}/{pkgname}"))
    })?;

    if package.version != version {
        return Err(Error::InvalidRequest(format!(
            "{branch}/{arch}/{pkgname}: version {version} was built, but {} is wanted",
            package.version
        )));
    }
    if package.status != PackageStatus::Building || package.job_id != Some(job_id) {
        return Err(Error::StaleJob(format!(
            "{branch}/{arch}/{pkgname} is {} with job {:?}, not building with job {job_id}",
            package.status, package.job_id
        )));
    }
    Ok(package)
}

/// Run the handler for `endpoint`; returns a short message for the caller
pub fn dispatch(farm: &BuildFarm, endpoint: Endpoint, request: &CallbackRequest) -> Result<String> {
    info!("Callback: {}", endpoint);
    match endpoint {
        Endpoint::BuildPackage => build_package::handle(farm, request),
        Endpoint::BuildImage => build_image::handle(farm, request),
        Endpoint::RepoBootstrap => repo_bootstrap::handle(farm, request),
        Endpoint::SignIndex => sign_index::handle(farm, request),
        Endpoint::GetDepends => get_depends::handle(farm, request),
        Endpoint::UpdateJobStatus => update_job_status::handle(farm, request),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_names() {
        for endpoint in Endpoint::ALL {
            assert_eq!(endpoint.as_str().parse::<Endpoint>().unwrap(), endpoint);
        }
        assert_eq!(
            "sign_index".parse::<Endpoint>().unwrap(),
            Endpoint::SignIndex
        );
        assert!("build-everything".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_headers_case_insensitive() {
        let request = CallbackRequest::new()
            .with_header("X-Buildfarm-Pkgname", "hello-world")
            .with_header("arch", "x86_64")
            .with_header("Splitrepo", "");

        assert_eq!(request.header("Pkgname").unwrap(), "hello-world");
        assert_eq!(request.header("ARCH").unwrap(), "x86_64");
        assert_eq!(request.header_opt("Splitrepo"), None);
        assert!(matches!(
            request.header("Version"),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_job_id() {
        let request = CallbackRequest::new().with_header("Job-Id", "42");
        assert_eq!(request.job_id().unwrap(), 42);

        for bad in ["abc", "0", "-3"] {
            let request = CallbackRequest::new().with_header("Job-Id", bad);
            assert!(request.job_id().is_err(), "{bad}");
        }
    }

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("hello-world-1-r4.apk").is_ok());
        assert!(validate_filename("../APKINDEX.tar.gz").is_err());
        assert!(validate_filename(".hidden").is_err());
        assert!(validate_filename("a/b.apk").is_err());
        assert!(validate_filename("").is_err());
    }

    #[test]
    fn test_require_files() {
        let request = CallbackRequest::new();
        assert!(request.require_files().is_err());

        let request = request.with_file("hello-world-1-r4.apk", b"data".to_vec());
        assert_eq!(request.require_files().unwrap().len(), 1);
        assert!(request.file("hello-world-1-r4.apk").is_ok());
        assert!(request.file("APKINDEX.tar.gz").is_err());
    }
}
