// src/backend/remote.rs

//! Remote CI job service
//!
//! Jobs are submitted as build manifests through the service's GraphQL API.
//! The manifest is generated as JSON, which the service accepts as YAML.

use super::{JobBackend, JobSpec, JobStatus};
use crate::config::RemoteSection;
use crate::error::{Error, Result};
use reqwest::blocking::Client;
use serde_json::{Map, Value, json};
use std::fs;
use std::time::Duration;
use tracing::{debug, info};

/// Timeout for API requests
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable holding the job id inside remote jobs
pub const JOB_ID_VAR: &str = "JOB_ID";

const SUBMIT_MUTATION: &str = "mutation Submit($manifest: String!, $note: String, $tags: [String!]) {
    submit(manifest: $manifest, note: $note, tags: $tags, execute: true) { id }
}";

const STATUS_QUERY: &str = "query Status($id: Int!) { job(id: $id) { status } }";

/// Job service backed by a remote CI over GraphQL
pub struct RemoteBackend {
    client: Client,
    api_url: String,
    web_url: String,
    user: String,
    image: String,
    token: String,
}

impl RemoteBackend {
    pub fn new(config: &RemoteSection) -> Result<Self> {
        let token = match (&config.token, &config.token_file) {
            (Some(token), _) => token.clone(),
            (None, Some(path)) => fs::read_to_string(path)
                .map_err(|e| {
                    Error::ConfigError(format!("Failed to read {}: {e}", path.display()))
                })?
                .trim()
                .to_string(),
            (None, None) => {
                return Err(Error::ConfigError(
                    "remote.token or remote.token_file must be set".to_string(),
                ));
            }
        };

        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::BackendError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            web_url: config.web_url.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            image: config.image.clone(),
            token,
        })
    }

    /// Build manifest for a job
    pub fn manifest(&self, spec: &JobSpec) -> Value {
        let tasks: Vec<Value> = spec
            .tasks
            .iter()
            .map(|task| {
                let mut entry = Map::new();
                entry.insert(task.name.clone(), Value::String(task.script.clone()));
                Value::Object(entry)
            })
            .collect();

        json!({
            "image": self.image,
            "environment": { "BUILD_BRANCH": spec.branch },
            "tasks": tasks,
            "timeout": format!("{}s", spec.timeout.as_secs()),
        })
    }

    fn query(&self, query: &str, variables: Value) -> Result<Value> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .map_err(|e| Error::BackendError(format!("Request to {} failed: {e}", self.api_url)))?;

        let status = response.status();
        let body: Value = response
            .json()
            .map_err(|e| Error::BackendError(format!("Invalid response from {}: {e}", self.api_url)))?;

        if !status.is_success() {
            return Err(Error::BackendError(format!("HTTP {status} from {}: {body}", self.api_url)));
        }
        if let Some(errors) = body.get("errors").filter(|e| !e.is_null()) {
            return Err(Error::BackendError(format!("GraphQL errors: {errors}")));
        }

        body.get("data")
            .cloned()
            .ok_or_else(|| Error::BackendError(format!("No data in response: {body}")))
    }
}

impl JobBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn submit(&self, spec: &JobSpec) -> Result<i64> {
        let manifest = serde_json::to_string_pretty(&self.manifest(spec))
            .map_err(|e| Error::BackendError(format!("Failed to encode manifest: {e}")))?;
        debug!("Submitting manifest for {}:\n{}", spec.name, manifest);

        let data = self.query(
            SUBMIT_MUTATION,
            json!({
                "manifest": manifest,
                "note": spec.note,
                "tags": ["buildfarm", spec.branch, spec.name],
            }),
        )?;

        let job_id = data
            .pointer("/submit/id")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::BackendError(format!("No job id in response: {data}")))?;

        info!("Submitted remote job {} ({})", job_id, spec.name);
        Ok(job_id)
    }

    fn poll(&self, job_id: i64) -> Result<JobStatus> {
        let data = self.query(STATUS_QUERY, json!({ "id": job_id }))?;
        let status = data
            .pointer("/job/status")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::BackendError(format!("No status for job {job_id}: {data}")))?;
        status.to_lowercase().parse()
    }

    fn link(&self, job_id: i64) -> String {
        format!("{}/~{}/job/{}", self.web_url, self.user, job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Task;

    fn backend() -> RemoteBackend {
        let config = RemoteSection {
            user: "buildfarm".to_string(),
            token: Some("secret".to_string()),
            ..RemoteSection::default()
        };
        RemoteBackend::new(&config).unwrap()
    }

    #[test]
    fn test_requires_token() {
        assert!(RemoteBackend::new(&RemoteSection::default()).is_err());
    }

    #[test]
    fn test_link() {
        assert_eq!(backend().link(42), "https://builds.sr.ht/~buildfarm/job/42");
    }

    #[test]
    fn test_manifest_keeps_task_order() {
        let spec = JobSpec {
            name: "build_package".to_string(),
            note: "hello-world".to_string(),
            tasks: vec![Task::new("build", "echo a\n"), Task::new("submit", "echo b\n")],
            branch: "master".to_string(),
            timeout: Duration::from_secs(60),
        };

        let manifest = backend().manifest(&spec);
        assert_eq!(manifest["image"], "alpine/edge");
        assert_eq!(manifest["environment"]["BUILD_BRANCH"], "master");
        assert_eq!(manifest["tasks"][0]["build"], "echo a\n");
        assert_eq!(manifest["tasks"][1]["submit"], "echo b\n");
    }
}
