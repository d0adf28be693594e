// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use buildfarm::api::{self, CallbackRequest, Endpoint};
use buildfarm::config::{BranchConfig, Config};
use buildfarm::db::models::Package;
use buildfarm::repo::{RepoKind, artifact, index};
use buildfarm::{BuildFarm, Error, JobBackend, JobSpec, JobStatus, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use rusqlite::Connection;
use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// State shared between a `MockBackend` and the test that owns it
#[derive(Default)]
pub struct MockJobs {
    next_id: AtomicI64,
    submitted: Mutex<Vec<(i64, JobSpec)>>,
    statuses: Mutex<HashMap<i64, JobStatus>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Mutex<Duration>,
}

impl MockJobs {
    /// Every submitted job, oldest first
    pub fn submitted(&self) -> Vec<(i64, JobSpec)> {
        self.submitted.lock().unwrap().clone()
    }

    /// Names of the submitted jobs, oldest first
    pub fn names(&self) -> Vec<String> {
        self.submitted().into_iter().map(|(_, spec)| spec.name).collect()
    }

    /// Jobs submitted with this name
    pub fn named(&self, name: &str) -> Vec<(i64, JobSpec)> {
        self.submitted()
            .into_iter()
            .filter(|(_, spec)| spec.name == name)
            .collect()
    }

    pub fn set_status(&self, job_id: i64, status: JobStatus) {
        self.statuses.lock().unwrap().insert(job_id, status);
    }

    /// Make every submission take this long
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Highest number of submissions that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Job service that records submissions instead of running them
pub struct MockBackend {
    jobs: Arc<MockJobs>,
}

impl JobBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn submit(&self, spec: &JobSpec) -> Result<i64> {
        let in_flight = self.jobs.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.jobs.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let delay = *self.jobs.delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let id = self.jobs.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.jobs.submitted.lock().unwrap().push((id, spec.clone()));
        self.jobs.statuses.lock().unwrap().insert(id, JobStatus::Running);

        self.jobs.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(id)
    }

    fn poll(&self, job_id: i64) -> Result<JobStatus> {
        self.jobs
            .statuses
            .lock()
            .unwrap()
            .get(&job_id)
            .copied()
            .ok_or_else(|| Error::BackendError(format!("unknown job {job_id}")))
    }

    fn link(&self, job_id: i64) -> String {
        format!("mock://{job_id}")
    }
}

/// A farm below a temp directory, running jobs on a `MockBackend`
pub struct TestFarm {
    pub temp: TempDir,
    pub farm: Arc<BuildFarm>,
    pub jobs: Arc<MockJobs>,
}

impl TestFarm {
    /// Farm with one branch `master` built for x86_64 only
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut Config)) -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = Config::with_root(temp.path());
        config.branches = vec![BranchConfig::new("master", &["x86_64"])];
        configure(&mut config);

        let jobs = Arc::new(MockJobs::default());
        let backend = Box::new(MockBackend {
            jobs: Arc::clone(&jobs),
        });
        let farm = BuildFarm::with_backend(config, backend);
        farm.init().unwrap();

        Self {
            temp,
            farm: Arc::new(farm),
            jobs,
        }
    }

    pub fn conn(&self) -> Connection {
        self.farm.open_db().unwrap()
    }

    pub fn package(&self, arch: &str, branch: &str, pkgname: &str) -> Package {
        Package::find(&self.conn(), arch, branch, pkgname)
            .unwrap()
            .unwrap_or_else(|| panic!("no package {branch}/{arch}/{pkgname}"))
    }

    /// Deliver a successful build-package callback for a building package
    pub fn finish_package(&self, arch: &str, branch: &str, pkgname: &str) -> Result<String> {
        let package = self.package(arch, branch, pkgname);
        let job_id = package.job_id.expect("package has no job");
        let request = CallbackRequest::new()
            .with_header("Arch", arch)
            .with_header("Branch", branch)
            .with_header("Pkgname", pkgname)
            .with_header("Version", &package.version)
            .with_header("Job-Id", &job_id.to_string())
            .with_file(
                &artifact::file_name(pkgname, &package.version),
                artifact_bytes(pkgname, &package.version, pkgname),
            );
        api::dispatch(&self.farm, Endpoint::BuildPackage, &request)
    }

    /// Deliver the sign-index callback for the newest sign_index job
    ///
    /// The unsigned index is sent back as the "signed" one.
    pub fn finish_signing(&self, arch: &str, branch: &str, splitrepo: Option<&str>) -> Result<String> {
        let (job_id, _) = self
            .jobs
            .named("sign_index")
            .pop()
            .expect("no sign_index job");
        let symlink_dir = self
            .farm
            .layout()
            .path(RepoKind::Symlink, Some(arch), branch, splitrepo);
        let index_data = fs::read(symlink_dir.join(index::INDEX_NAME)).unwrap();

        let mut request = CallbackRequest::new()
            .with_header("Arch", arch)
            .with_header("Branch", branch)
            .with_header("Job-Id", &job_id.to_string())
            .with_file(index::INDEX_NAME, index_data);
        if let Some(splitrepo) = splitrepo {
            request.add_header("Splitrepo", splitrepo);
        }
        api::dispatch(&self.farm, Endpoint::SignIndex, &request)
    }
}

/// Insert a queued package, depending on the named packages
pub fn add_package(
    conn: &Connection,
    arch: &str,
    branch: &str,
    pkgname: &str,
    version: &str,
    depends: &[&str],
) -> Package {
    let mut package = Package::new(arch, branch, pkgname, version);
    package.insert(conn).unwrap();

    let ids: Vec<i64> = depends
        .iter()
        .map(|name| {
            Package::find(conn, arch, branch, name)
                .unwrap()
                .and_then(|p| p.id)
                .unwrap()
        })
        .collect();
    Package::set_depends(conn, package.id.unwrap(), &ids).unwrap();
    package
}

/// Contents of a minimal artifact: a gzip tar holding a `.PKGINFO`
pub fn artifact_bytes(pkgname: &str, version: &str, origin: &str) -> Vec<u8> {
    let pkginfo = format!(
        "# Generated by abuild\npkgname = {pkgname}\npkgver = {version}\narch = x86_64\norigin = {origin}\n"
    );

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(pkginfo.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, ".PKGINFO", pkginfo.as_bytes())
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

/// Write an artifact into a repository directory
pub fn write_artifact(farm: &BuildFarm, kind: RepoKind, arch: &str, branch: &str, pkgname: &str, version: &str) {
    let dir = farm.layout().path(kind, Some(arch), branch, None);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join(artifact::file_name(pkgname, version)),
        artifact_bytes(pkgname, version, pkgname),
    )
    .unwrap();
}
