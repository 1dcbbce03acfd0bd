//! Kubernetes Job spawner.
//!
//! Each work item becomes one `batch/v1` Job named after the item. The Job
//! runs the agent image with the resolved [`JobConfig`] inline in the
//! `RELAY_JOB` environment variable.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, info_span, warn, Instrument};

use super::spawner::{session_name, Spawner};
use crate::config::{ClusterConfig, GlobalConfig};
use crate::models::job::{JobConfig, JOB_INLINE_ENV, STATE_DIR_ENV};
use crate::models::work_item::{unique_name, WorkItem};
use crate::{AppError, BoxFuture, Result};

/// Longest DNS-1123 label.
const MAX_NAME_LEN: usize = 63;
const JOB_PREFIX: &str = "relay-agent-";

/// Workspace path inside the job container.
pub const CONTAINER_WORKSPACE: &str = "/workspace";

/// State directory inside the job container.
pub const CONTAINER_STATE_DIR: &str = "/tmp/agent-relay";

/// Observed state of an existing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Pending or running.
    Active,
    /// Finished successfully.
    Succeeded,
    /// Finished with failure.
    Failed,
}

/// Minimal job API of the cluster.
pub trait ClusterJobApi: Send + Sync {
    /// Look up a job by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the API call fails.
    fn get_job<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<JobStatus>>>;

    /// Submit a job manifest.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the submission is rejected.
    fn create_job<'a>(&'a self, manifest: &'a Value) -> BoxFuture<'a, Result<()>>;

    /// Delete a job and its pods. Deleting a missing job succeeds.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the API call fails.
    fn delete_job<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Job name for a work item: `relay-agent-<sanitized id>`, at most 63
/// characters.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the id has no usable characters.
pub fn job_name(item: &WorkItem) -> Result<String> {
    session_name(item)?;
    let id = unique_name(&item.id, MAX_NAME_LEN - JOB_PREFIX.len());
    Ok(format!("{JOB_PREFIX}{id}"))
}

/// Build the `batch/v1` Job manifest for `job`.
///
/// # Errors
///
/// Returns `AppError::Io` if the job cannot be serialized.
pub fn build_job_manifest(name: &str, job: &JobConfig, config: &GlobalConfig) -> Result<Value> {
    let cluster = &config.cluster;
    let git = &config.git;
    let label = job.work_item.sanitized_id();

    let mut env = vec![
        json!({ "name": JOB_INLINE_ENV, "value": job.to_json()? }),
        json!({ "name": "GIT_AUTHOR_NAME", "value": git.user_name }),
        json!({ "name": "GIT_AUTHOR_EMAIL", "value": git.user_email }),
        json!({ "name": "GIT_COMMITTER_NAME", "value": git.user_name }),
        json!({ "name": "GIT_COMMITTER_EMAIL", "value": git.user_email }),
        json!({ "name": "GIT_TERMINAL_PROMPT", "value": "0" }),
        json!({ "name": STATE_DIR_ENV, "value": CONTAINER_STATE_DIR }),
    ];
    for (key, value) in &job.work_item.env {
        env.push(json!({ "name": key, "value": value }));
    }

    let mut container = json!({
        "name": "agent",
        "image": job.image,
        "imagePullPolicy": cluster.image_pull_policy,
        "args": config.agent.args,
        "env": env,
    });
    if let Some(secret) = &cluster.secret_name {
        container["envFrom"] = json!([{ "secretRef": { "name": secret } }]);
    }

    Ok(json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": name,
            "namespace": cluster.namespace,
            "labels": { "app": "agent-relay", "work-item": label },
        },
        "spec": {
            "backoffLimit": 0,
            "ttlSecondsAfterFinished": cluster.ttl_seconds_after_finished,
            "template": {
                "metadata": {
                    "labels": { "app": "agent-relay", "work-item": label },
                },
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [container],
                },
            },
        },
    }))
}

/// Runs each work item as a cluster Job.
#[derive(Clone)]
pub struct ClusterSpawner {
    api: Arc<dyn ClusterJobApi>,
    config: Arc<GlobalConfig>,
}

impl ClusterSpawner {
    /// Create a spawner submitting through `api`.
    #[must_use]
    pub fn new(api: Arc<dyn ClusterJobApi>, config: Arc<GlobalConfig>) -> Self {
        Self { api, config }
    }

    async fn spawn_inner(&self, item: &WorkItem) -> Result<()> {
        let name = job_name(item)?;
        match self.api.get_job(&name).await? {
            Some(JobStatus::Failed) => {
                warn!(job = %name, "previous job failed, deleting it for a retry");
                self.api.delete_job(&name).await?;
                Err(AppError::Spawn(format!(
                    "job {name} had failed and was deleted; retrying next tick"
                )))
            }
            Some(status) => {
                info!(job = %name, ?status, "job already exists, nothing to spawn");
                Ok(())
            }
            None => {
                let job = JobConfig::resolve(item, &self.config, PathBuf::from(CONTAINER_WORKSPACE));
                let manifest = build_job_manifest(&name, &job, &self.config)?;
                self.api.create_job(&manifest).await?;
                info!(job = %name, image = %job.image, "cluster job created");
                Ok(())
            }
        }
    }
}

impl Spawner for ClusterSpawner {
    fn name(&self) -> &'static str {
        "cluster"
    }

    fn spawn<'a>(&'a self, item: &'a WorkItem) -> BoxFuture<'a, Result<()>> {
        let span = info_span!("cluster_spawn", work_item_id = %item.id);
        Box::pin(self.spawn_inner(item).instrument(span))
    }

    fn cleanup<'a>(&'a self, item: &'a WorkItem) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let name = job_name(item)?;
            self.api.delete_job(&name).await
        })
    }
}

/// [`ClusterJobApi`] over the Kubernetes REST API with the in-cluster
/// service account.
#[derive(Debug, Clone)]
pub struct KubeJobApi {
    client: reqwest::Client,
    jobs_url: String,
    token: String,
}

impl KubeJobApi {
    /// Build a client from `[cluster]`, reading the service-account token
    /// and CA certificate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the token or certificate cannot be
    /// read or the HTTP client cannot be built.
    pub fn from_config(cluster: &ClusterConfig) -> Result<Self> {
        let sa_dir = cluster.service_account_dir.as_path();
        let token = read_secret(&sa_dir.join("token"))?.trim().to_owned();

        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));
        let ca_path = sa_dir.join("ca.crt");
        if ca_path.exists() {
            let pem = std::fs::read(&ca_path).map_err(|err| {
                AppError::Config(format!("cannot read {}: {err}", ca_path.display()))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|err| AppError::Config(format!("invalid cluster CA: {err}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            jobs_url: format!(
                "{}/apis/batch/v1/namespaces/{}/jobs",
                cluster.api_url.trim_end_matches('/'),
                cluster.namespace
            ),
            token,
        })
    }
}

fn read_secret(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|err| AppError::Config(format!("cannot read {}: {err}", path.display())))
}

/// Interpret the `status` block of a Job object.
#[must_use]
pub fn parse_job_status(body: &Value) -> JobStatus {
    let count = |key: &str| body["status"][key].as_u64().unwrap_or(0);
    if count("failed") > 0 {
        JobStatus::Failed
    } else if count("succeeded") > 0 {
        JobStatus::Succeeded
    } else {
        JobStatus::Active
    }
}

async fn rejection(context: &str, response: reqwest::Response) -> AppError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(300).collect();
    AppError::Spawn(format!("{context}: {status}: {snippet}"))
}

impl ClusterJobApi for KubeJobApi {
    fn get_job<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<JobStatus>>> {
        Box::pin(async move {
            let response = self
                .client
                .get(format!("{}/{name}", self.jobs_url))
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|err| AppError::Spawn(format!("job lookup failed: {err}")))?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !response.status().is_success() {
                return Err(rejection("job lookup rejected", response).await);
            }
            let body: Value = response
                .json()
                .await
                .map_err(|err| AppError::Spawn(format!("invalid job body: {err}")))?;
            Ok(Some(parse_job_status(&body)))
        })
    }

    fn create_job<'a>(&'a self, manifest: &'a Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.jobs_url)
                .bearer_auth(&self.token)
                .json(manifest)
                .send()
                .await
                .map_err(|err| AppError::Spawn(format!("job submission failed: {err}")))?;
            if response.status() == reqwest::StatusCode::CONFLICT {
                info!("job was created concurrently");
                return Ok(());
            }
            if !response.status().is_success() {
                return Err(rejection("job submission rejected", response).await);
            }
            Ok(())
        })
    }

    fn delete_job<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = reqwest::Url::parse_with_params(
                &format!("{}/{name}", self.jobs_url),
                &[("propagationPolicy", "Background")],
            )
            .map_err(|err| AppError::Spawn(format!("invalid job url: {err}")))?;
            let response = self
                .client
                .delete(url)
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|err| AppError::Spawn(format!("job deletion failed: {err}")))?;
            if response.status() == reqwest::StatusCode::NOT_FOUND || response.status().is_success()
            {
                return Ok(());
            }
            Err(rejection("job deletion rejected", response).await)
        })
    }
}
