//! OpenAI-compatible chat completions proposer.

use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, Instrument};

use super::parse::ResponseParser;
use super::prompts::{render_user_prompt, system_prompt};
use super::{ActionProposer, ProposalContext};
use crate::models::action::Proposal;
use crate::{AppError, BoxFuture, Result};

/// Known providers and their API base URLs.
#[must_use]
pub fn provider_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "openai" => Some("https://api.openai.com/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Proposer calling `<base_url>/chat/completions`.
#[derive(Debug, Clone)]
pub struct HttpProposer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    max_tokens: Option<u32>,
    parser: ResponseParser,
}

impl HttpProposer {
    /// Build a proposer for `provider`/`model`.
    ///
    /// `base_url` overrides the provider's default endpoint.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the provider is unknown and no base URL
    /// is given, or the HTTP client cannot be built.
    pub fn new(
        provider: &str,
        model: &str,
        base_url: Option<&str>,
        api_key: Option<String>,
        max_tokens: Option<u32>,
    ) -> Result<Self> {
        let base = base_url
            .or_else(|| provider_base_url(provider))
            .ok_or_else(|| {
                AppError::Config(format!(
                    "unknown provider {provider}; set proposer.base_url"
                ))
            })?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
            api_key,
            model: model.to_owned(),
            max_tokens,
            parser: ResponseParser::new()?,
        })
    }

    async fn complete(&self, ctx: ProposalContext<'_>) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: system_prompt(ctx.role),
                },
                ChatMessage {
                    role: "user".into(),
                    content: render_user_prompt(&ctx),
                },
            ],
            max_tokens: self.max_tokens,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| AppError::Proposer(format!("request failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(300).collect();
            return Err(AppError::Proposer(format!("{status}: {snippet}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| AppError::Proposer(format!("invalid response body: {err}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AppError::Proposer("response had no choices".into()))
    }
}

impl ActionProposer for HttpProposer {
    fn propose<'a>(&'a self, ctx: ProposalContext<'a>) -> BoxFuture<'a, Result<Proposal>> {
        let span = info_span!(
            "propose",
            role = ctx.role.as_str(),
            iteration = ctx.iteration,
            model = %self.model
        );
        Box::pin(
            async move {
                let reply = self.complete(ctx).await?;
                debug!(chars = reply.len(), "proposer replied");
                Ok(self.parser.parse(ctx.role, &reply))
            }
            .instrument(span),
        )
    }
}
