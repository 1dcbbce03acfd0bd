//! Jira JQL search source.

use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, info_span, warn, Instrument};

use super::{extract_repo_url, repo_pattern, ItemStatus, WorkSource};
use crate::models::work_item::WorkItem;
use crate::{AppError, BoxFuture, Result};

/// JQL used when `source.jira_query` is not configured.
#[must_use]
pub fn default_query(label: &str) -> String {
    format!("labels = \"{label}\" AND statusCategory != Done ORDER BY created ASC")
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: String,
    #[serde(default)]
    fields: JiraFields,
}

#[derive(Debug, Default, Deserialize)]
struct JiraFields {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: Value,
    #[serde(default)]
    parent: Option<JiraParent>,
}

#[derive(Debug, Deserialize)]
struct JiraParent {
    key: String,
}

/// Plain text of a Jira description, either a string (API v2) or an
/// Atlassian document (API v3).
#[must_use]
pub fn description_text(description: &Value) -> String {
    match description {
        Value::String(text) => text.clone(),
        Value::Object(_) => {
            let mut out = String::new();
            collect_text(description, &mut out);
            out
        }
        _ => String::new(),
    }
}

fn collect_text(node: &Value, out: &mut String) {
    if let Some(text) = node.get("text").and_then(Value::as_str) {
        out.push_str(text);
    }
    if let Some(children) = node.get("content").and_then(Value::as_array) {
        for child in children {
            collect_text(child, out);
            if child.get("type").and_then(Value::as_str) == Some("paragraph") {
                out.push('\n');
            }
        }
    }
}

/// Issues matching a JQL query. Issues without a `Repo:` line are skipped.
#[derive(Debug, Clone)]
pub struct JiraSource {
    client: reqwest::Client,
    base_url: String,
    username: String,
    token: String,
    query: String,
    done_transition: String,
    repo_pattern: Regex,
}

impl JiraSource {
    /// Search `base_url` with `query`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be built.
    pub fn new(base_url: &str, username: &str, token: String, query: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            username: username.to_owned(),
            token,
            query,
            done_transition: "Done".into(),
            repo_pattern: repo_pattern()?,
        })
    }

    /// Transition applied when a ticket is delivered.
    #[must_use]
    pub fn with_done_transition(mut self, name: &str) -> Self {
        self.done_transition = name.to_owned();
        self
    }

    fn to_work_item(&self, issue: JiraIssue) -> Option<WorkItem> {
        let description = description_text(&issue.fields.description);
        let Some(repo_url) = extract_repo_url(&self.repo_pattern, &description) else {
            warn!(key = %issue.key, "jira issue has no Repo: line, skipping");
            return None;
        };
        let mut item = WorkItem::new(issue.key.clone(), issue.fields.summary)
            .with_description(description)
            .with_repo(repo_url);
        if let Some(parent) = issue.fields.parent {
            item = item.with_epic(parent.key);
        }
        item.env.insert("JIRA_TICKET".into(), issue.key);
        Some(item)
    }

    async fn fetch(&self) -> Result<Vec<WorkItem>> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/rest/api/3/search/jql", self.base_url),
            &[
                ("jql", self.query.as_str()),
                ("fields", "summary,description,status,labels,parent"),
            ],
        )
        .map_err(|err| AppError::Source(format!("invalid jira url: {err}")))?;

        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.token))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|err| AppError::Source(format!("jira request failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Source(format!("jira search failed with {status}")));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|err| AppError::Source(format!("invalid jira response: {err}")))?;
        let items: Vec<WorkItem> = parsed
            .issues
            .into_iter()
            .filter_map(|issue| self.to_work_item(issue))
            .collect();
        debug!(count = items.len(), "jira issues polled");
        Ok(items)
    }

    async fn report(&self, item: &WorkItem, status: ItemStatus, comment: &str) -> Result<()> {
        let issue_url = format!("{}/rest/api/3/issue/{}", self.base_url, item.id);

        if !comment.trim().is_empty() {
            self.send(
                self.client
                    .post(format!("{issue_url}/comment"))
                    .json(&comment_body(comment)),
            )
            .await?;
        }
        if status != ItemStatus::Done {
            return Ok(());
        }

        let response = self
            .send(self.client.get(format!("{issue_url}/transitions")))
            .await?;
        let available: Value = response
            .json()
            .await
            .map_err(|err| AppError::Source(format!("invalid jira transitions: {err}")))?;
        let Some(id) = done_transition_id(&available, &self.done_transition) else {
            return Err(AppError::Source(format!(
                "no transition to {} available for {}",
                self.done_transition, item.id
            )));
        };
        self.send(
            self.client
                .post(format!("{issue_url}/transitions"))
                .json(&json!({ "transition": { "id": id } })),
        )
        .await?;
        info!(key = %item.id, transition = %self.done_transition, "jira ticket transitioned");
        Ok(())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .basic_auth(&self.username, Some(&self.token))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|err| AppError::Source(format!("jira request failed: {err}")))?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(AppError::Source(format!("jira request failed with {status}")))
        }
    }
}

/// Id of the transition named `name`, or failing that the first one that
/// lands in the `done` status category.
#[must_use]
pub fn done_transition_id(transitions: &Value, name: &str) -> Option<String> {
    let list = transitions.get("transitions")?.as_array()?;
    let id_of = |t: &Value| t.get("id").and_then(Value::as_str).map(str::to_owned);
    list.iter()
        .find(|t| {
            t.get("name")
                .and_then(Value::as_str)
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
        .or_else(|| {
            list.iter().find(|t| {
                t.pointer("/to/statusCategory/key").and_then(Value::as_str) == Some("done")
            })
        })
        .and_then(id_of)
}

/// Atlassian document holding one paragraph per line of `text`.
#[must_use]
pub fn comment_body(text: &str) -> Value {
    let paragraphs: Vec<Value> = text
        .lines()
        .map(|line| {
            if line.is_empty() {
                json!({ "type": "paragraph", "content": [] })
            } else {
                json!({ "type": "paragraph", "content": [{ "type": "text", "text": line }] })
            }
        })
        .collect();
    json!({ "body": { "type": "doc", "version": 1, "content": paragraphs } })
}

impl WorkSource for JiraSource {
    fn name(&self) -> &'static str {
        "jira"
    }

    fn poll<'a>(&'a self) -> BoxFuture<'a, Result<Vec<WorkItem>>> {
        let span = info_span!("jira_poll");
        Box::pin(self.fetch().instrument(span))
    }

    fn update_status<'a>(
        &'a self,
        item: &'a WorkItem,
        status: ItemStatus,
        comment: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        let span = info_span!("jira_update", key = %item.id, ?status);
        Box::pin(self.report(item, status, comment).instrument(span))
    }
}
