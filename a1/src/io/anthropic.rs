//! Anthropic Messages API client for tool-broker mode.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::broker::{ModelBlock, ModelClient, ModelRequest, ModelResponse};
use super::worker::WorkerUnavailableError;
use crate::core::events::Usage;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

impl From<MessagesResponse> for ModelResponse {
    fn from(raw: MessagesResponse) -> Self {
        let content = raw
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(ModelBlock::Text(text)),
                ResponseBlock::ToolUse { id, name, input } => {
                    Some(ModelBlock::ToolUse { id, name, input })
                }
                ResponseBlock::Other => None,
            })
            .collect();
        ModelResponse {
            content,
            stop_reason: raw.stop_reason,
            usage: raw.usage,
        }
    }
}

/// Blocking client for `POST /v1/messages`.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicClient {
    /// Fails with [`WorkerUnavailableError`] when no API key is configured.
    pub fn new(api_key: Option<String>, model: Option<String>) -> Result<Self> {
        let api_key = api_key.filter(|k| !k.trim().is_empty()).ok_or_else(|| {
            anyhow::Error::new(WorkerUnavailableError {
                reason: "no API key (set ANTHROPIC_API_KEY or api_key in .a1/config.toml)"
                    .to_string(),
            })
        })?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn body(&self, request: &ModelRequest<'_>) -> Value {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| json!({"name": t.name, "description": t.description, "input_schema": t.input_schema}))
            .collect();
        json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": request.system,
            "messages": request.messages,
            "tools": tools,
        })
    }
}

impl ModelClient for AnthropicClient {
    #[instrument(skip_all, fields(model = %self.model, messages = request.messages.len()))]
    fn complete(&self, request: &ModelRequest<'_>) -> Result<ModelResponse> {
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&self.body(request))
            .send()
            .map_err(|err| {
                if err.is_connect() {
                    anyhow::Error::new(WorkerUnavailableError {
                        reason: format!("cannot reach {}: {err}", self.base_url),
                    })
                } else {
                    anyhow!(err).context("send request to Anthropic API")
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(WorkerUnavailableError {
                reason: "Anthropic API rejected the API key".to_string(),
            }
            .into());
        }
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "failed to read error response".to_string());
            return Err(anyhow!("Anthropic API error {status}: {}", body.trim()));
        }

        let raw: MessagesResponse = response.json().context("parse Anthropic API response")?;
        debug!(stop_reason = ?raw.stop_reason, blocks = raw.content.len(), "model replied");
        Ok(raw.into())
    }
}
