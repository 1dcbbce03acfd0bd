//! GitHub issues source.

use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, info_span, Instrument};

use super::{extract_repo_url, repo_pattern, ItemStatus, WorkSource};
use crate::models::work_item::WorkItem;
use crate::{AppError, BoxFuture, Result};

#[derive(Debug, Deserialize)]
struct Issue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

/// Open issues of one repository that carry a label.
#[derive(Debug, Clone)]
pub struct GitHubSource {
    client: reqwest::Client,
    api_url: String,
    repo: String,
    label: String,
    token: String,
    repo_pattern: Regex,
}

impl GitHubSource {
    /// Poll `owner/repo` for open issues labelled `label`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `repo` is not `owner/name` or the HTTP
    /// client cannot be built.
    pub fn new(api_url: &str, repo: &str, label: &str, token: String) -> Result<Self> {
        let valid = repo
            .split_once('/')
            .is_some_and(|(owner, name)| !owner.is_empty() && !name.is_empty() && !name.contains('/'));
        if !valid {
            return Err(AppError::Config(format!(
                "source.github_repo must be owner/name, got {repo}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("agent-relay")
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_owned(),
            repo: repo.to_owned(),
            label: label.to_owned(),
            token,
            repo_pattern: repo_pattern()?,
        })
    }

    fn to_work_item(&self, issue: Issue) -> Option<WorkItem> {
        if issue.pull_request.is_some() {
            return None;
        }
        let body = issue.body.unwrap_or_default();
        let repo_url = extract_repo_url(&self.repo_pattern, &body)
            .unwrap_or_else(|| format!("https://github.com/{}", self.repo));
        let mut item = WorkItem::new(format!("gh-{}", issue.number), issue.title)
            .with_description(body)
            .with_repo(repo_url);
        item.env
            .insert("GITHUB_ISSUE".into(), issue.number.to_string());
        Some(item)
    }

    async fn fetch(&self) -> Result<Vec<WorkItem>> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/repos/{}/issues", self.api_url, self.repo),
            &[
                ("state", "open"),
                ("labels", self.label.as_str()),
                ("per_page", "100"),
            ],
        )
        .map_err(|err| AppError::Source(format!("invalid github url: {err}")))?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|err| AppError::Source(format!("github request failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(300).collect();
            return Err(AppError::Source(format!("github api error {status}: {snippet}")));
        }

        let issues: Vec<Issue> = response
            .json()
            .await
            .map_err(|err| AppError::Source(format!("invalid github response: {err}")))?;
        let items: Vec<WorkItem> = issues
            .into_iter()
            .filter_map(|issue| self.to_work_item(issue))
            .collect();
        debug!(count = items.len(), "github issues polled");
        Ok(items)
    }

    async fn report(&self, item: &WorkItem, status: ItemStatus, comment: &str) -> Result<()> {
        let Some(number) = issue_number(item) else {
            return Err(AppError::Source(format!(
                "work item {} is not a github issue",
                item.id
            )));
        };
        let issue_url = format!("{}/repos/{}/issues/{number}", self.api_url, self.repo);

        if !comment.trim().is_empty() {
            self.send(
                self.client
                    .post(format!("{issue_url}/comments"))
                    .json(&json!({ "body": comment })),
            )
            .await?;
        }
        if status == ItemStatus::Done {
            self.send(self.client.patch(&issue_url).json(&json!({ "state": "closed" })))
                .await?;
            info!(number, "github issue closed");
        }
        Ok(())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<()> {
        let response = request
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|err| AppError::Source(format!("github request failed: {err}")))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AppError::Source(format!("github api error {status}")))
        }
    }
}

/// Issue number behind a work item produced by this source.
#[must_use]
pub fn issue_number(item: &WorkItem) -> Option<u64> {
    item.env
        .get("GITHUB_ISSUE")
        .map(String::as_str)
        .or_else(|| item.id.strip_prefix("gh-"))
        .and_then(|raw| raw.parse().ok())
}

impl WorkSource for GitHubSource {
    fn name(&self) -> &'static str {
        "github"
    }

    fn poll<'a>(&'a self) -> BoxFuture<'a, Result<Vec<WorkItem>>> {
        let span = info_span!("github_poll", repo = %self.repo, label = %self.label);
        Box::pin(self.fetch().instrument(span))
    }

    fn update_status<'a>(
        &'a self,
        item: &'a WorkItem,
        status: ItemStatus,
        comment: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        let span = info_span!("github_update", work_item_id = %item.id, ?status);
        Box::pin(self.report(item, status, comment).instrument(span))
    }
}
