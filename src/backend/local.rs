// src/backend/local.rs

//! Local job service
//!
//! Every job gets a directory below the service root:
//!
//! ```text
//! <root>/<id>/tasks/NN-<name>.sh   one script per task
//! <root>/<id>/run.sh               runs the tasks in order
//! <root>/<id>/job.sh               applies the timeout, writes `status`
//! <root>/<id>/status               current status, replaced atomically
//! <root>/<id>/pid                  pid of the job.sh process
//! <root>/<id>/log.txt              output of all tasks
//! ```
//!
//! Status lives on disk so that any process (the server, a CLI callback,
//! a later `reconcile`) can poll jobs started by another one.

use super::{JobBackend, JobSpec, JobStatus};
use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use tracing::{debug, info, warn};

/// Environment variable holding the job id inside local jobs
pub const JOB_ID_VAR: &str = "BUILDFARM_JOB_ID";

const STATUS_FILE: &str = "status";
const PID_FILE: &str = "pid";
const LOG_FILE: &str = "log.txt";
const COUNTER_FILE: &str = "next_id";

const RUN_SCRIPT: &str = r#"#!/bin/sh
for task in tasks/*.sh; do
    echo ">>> $task"
    sh -e "$task" || exit 1
done
"#;

/// Job service running jobs as detached shell processes
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn job_dir(&self, job_id: i64) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    /// Allocate the next job id, safe across processes
    fn next_id(&self) -> Result<i64> {
        fs::create_dir_all(&self.root)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.root.join(COUNTER_FILE))?;
        file.lock_exclusive()
            .map_err(|e| Error::IoError(format!("Failed to lock job counter: {e}")))?;

        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let id = match content.trim() {
            "" => 1,
            s => s
                .parse::<i64>()
                .map_err(|e| Error::BackendError(format!("Corrupt job counter {s:?}: {e}")))?,
        };

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", id + 1)?;
        file.sync_all()?;
        // the lock goes away with the handle
        Ok(id)
    }

    fn job_script(timeout_secs: u64) -> String {
        format!(
            r#"#!/bin/sh
set_status() {{
    printf '%s\n' "$1" > {STATUS_FILE}.tmp && mv {STATUS_FILE}.tmp {STATUS_FILE}
}}
set_status running
timeout {timeout_secs} sh ./run.sh
rc=$?
case $rc in
    0) set_status success ;;
    124) set_status timeout ;;
    *) set_status failed ;;
esac
exit $rc
"#
        )
    }

    fn write_status(dir: &Path, status: JobStatus) -> Result<()> {
        let tmp = dir.join(format!("{STATUS_FILE}.tmp"));
        fs::write(&tmp, format!("{status}\n"))?;
        fs::rename(&tmp, dir.join(STATUS_FILE))?;
        Ok(())
    }

    fn prepare(&self, job_id: i64, spec: &JobSpec) -> Result<PathBuf> {
        let dir = self.job_dir(job_id);
        let tasks_dir = dir.join("tasks");
        fs::create_dir_all(&tasks_dir)?;

        for (i, task) in spec.tasks.iter().enumerate() {
            let path = tasks_dir.join(format!("{:02}-{}.sh", i, task.name));
            fs::write(path, &task.script)?;
        }
        fs::write(dir.join("run.sh"), RUN_SCRIPT)?;
        fs::write(dir.join("job.sh"), Self::job_script(spec.timeout.as_secs().max(1)))?;
        fs::write(dir.join("note.txt"), format!("{}\n", spec.note))?;
        Self::write_status(&dir, JobStatus::Queued)?;
        Ok(dir)
    }

    fn process_alive(pid: &str) -> bool {
        let proc_root = Path::new("/proc");
        !proc_root.is_dir() || proc_root.join(pid.trim()).exists()
    }
}

impl JobBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    fn submit(&self, spec: &JobSpec) -> Result<i64> {
        let job_id = self.next_id()?;
        let dir = self.prepare(job_id, spec)?;

        let log = File::create(dir.join(LOG_FILE))?;
        let log_err = log.try_clone()?;
        let mut child = Command::new("sh")
            .arg("./job.sh")
            .current_dir(&dir)
            .env(JOB_ID_VAR, job_id.to_string())
            .env("BUILD_BRANCH", &spec.branch)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|e| Error::BackendError(format!("Failed to start job {job_id}: {e}")))?;

        fs::write(dir.join(PID_FILE), format!("{}\n", child.id()))?;

        // reap the child; the job reports through its status file
        let spawned = thread::Builder::new()
            .name(format!("job-{job_id}"))
            .spawn(move || match child.wait() {
                Ok(status) => debug!("Local job {} exited: {}", job_id, status),
                Err(e) => warn!("Failed to wait for local job {}: {}", job_id, e),
            });
        if let Err(e) = spawned {
            warn!("Failed to spawn reaper for job {}: {}", job_id, e);
        }

        info!("Started local job {} ({})", job_id, spec.name);
        Ok(job_id)
    }

    fn poll(&self, job_id: i64) -> Result<JobStatus> {
        let dir = self.job_dir(job_id);
        let content = fs::read_to_string(dir.join(STATUS_FILE))
            .map_err(|e| Error::BackendError(format!("Unknown local job {job_id}: {e}")))?;
        let status: JobStatus = content.parse()?;

        if matches!(status, JobStatus::Queued | JobStatus::Running)
            && let Ok(pid) = fs::read_to_string(dir.join(PID_FILE))
            && !Self::process_alive(&pid)
        {
            warn!("Local job {} vanished while {}", job_id, status);
            return Ok(JobStatus::Failed);
        }

        Ok(status)
    }

    fn link(&self, job_id: i64) -> String {
        format!("file://{}", self.job_dir(job_id).join(LOG_FILE).display())
    }
}
