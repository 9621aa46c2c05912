//! Chat completion backends.
//!
//! [`ChatClient`] talks to any endpoint that implements the OpenAI
//! `/chat/completions` API: OpenAI itself, a vLLM server, or Ollama's
//! OpenAI-compatible layer.

use amime_core::StepError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default OpenAI API base.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
/// Default model name.
pub const DEFAULT_MODEL: &str = "gpt-4o-2024-11-20";
/// Default completion budget.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
const VLLM_API_KEY: &str = "EMPTY";
const CONTENT_FILTER: &str = "content_filter";

/// Inference platform behind the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    /// api.openai.com or a compatible proxy.
    #[default]
    OpenAi,
    /// A vLLM server.
    Vllm,
    /// An Ollama server.
    Ollama,
}

impl Platform {
    /// Returns the platform name as accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::OpenAi => "openai",
            Platform::Vllm => "vllm",
            Platform::Ollama => "ollama",
        }
    }

    /// Environment variable consulted when no base URL is configured.
    pub fn base_url_env(self) -> Option<&'static str> {
        match self {
            Platform::OpenAi => None,
            Platform::Vllm => Some("OPEN_WEBUI_BASE_URL"),
            Platform::Ollama => Some("OLLAMA_BASE_URL"),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unsupported platform name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("platform '{0}' is not supported (expected openai, vllm or ollama)")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Platform::OpenAi),
            "vllm" => Ok(Platform::Vllm),
            "ollama" => Ok(Platform::Ollama),
            _ => Err(UnknownPlatform(s.to_string())),
        }
    }
}

/// Model and sampling settings for [`ChatClient`].
#[derive(Clone)]
pub struct ChatModelConfig {
    /// Inference platform.
    pub platform: Platform,
    /// Model name sent with each request.
    pub model: String,
    /// Maximum number of completion tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Stop sequences.
    pub stop: Vec<String>,
    /// API base, e.g. `http://localhost:8000/v1`. Falls back to the
    /// platform default or its environment variable.
    pub base_url: Option<String>,
    /// Bearer token. Falls back to `OPENAI_API_KEY` on OpenAI.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ChatModelConfig {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.0,
            top_p: 1.0,
            stop: Vec::new(),
            base_url: None,
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }
}

impl fmt::Debug for ChatModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatModelConfig")
            .field("platform", &self.platform)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("stop", &self.stop)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Author of a chat message. Only user turns are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The prompt author.
    User,
}

/// One message of a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote the message.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A backend that turns a conversation into a reply.
///
/// Implementations classify their failures: transient ones are returned as
/// retryable [`StepError`]s so callers can retry them.
#[async_trait]
pub trait ChatCompletion: Send + Sync + fmt::Debug {
    /// Returns the text of the model's reply.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, StepError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
    stream: bool,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ReplyMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Returns `true` for HTTP statuses worth retrying.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn extract_reply(response: ChatResponse) -> Result<String, StepError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| StepError::fatal("Reply contained no choices"))?;

    if choice.finish_reason.as_deref() == Some(CONTENT_FILTER) {
        return Err(StepError::fatal("Reply was blocked by the content filter"));
    }

    choice
        .message
        .content
        .ok_or_else(|| StepError::fatal("Reply message has no content"))
}

/// OpenAI-compatible HTTP client.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: Client,
    config: ChatModelConfig,
}

impl ChatClient {
    /// Creates a client with a fresh connection pool.
    pub fn new(config: ChatModelConfig) -> Self {
        Self::with_http_client(config, Client::new())
    }

    /// Creates a client that shares an existing connection pool.
    pub fn with_http_client(config: ChatModelConfig, http: Client) -> Self {
        Self { http, config }
    }

    /// Returns the client's settings.
    pub fn config(&self) -> &ChatModelConfig {
        &self.config
    }

    /// Returns the full `/chat/completions` URL.
    pub fn endpoint(&self) -> Result<String, StepError> {
        let base = match &self.config.base_url {
            Some(url) => url.clone(),
            None => match self.config.platform.base_url_env() {
                Some(var) => std::env::var(var).map_err(|_| {
                    StepError::fatal(format!(
                        "No base URL configured for {} and {var} is not set",
                        self.config.platform
                    ))
                })?,
                None => DEFAULT_OPENAI_BASE_URL.to_string(),
            },
        };

        let mut base = base.trim_end_matches('/').to_string();
        if self.config.platform == Platform::Ollama && !base.ends_with("/v1") {
            base.push_str("/v1");
        }
        Ok(format!("{base}/chat/completions"))
    }

    fn api_key(&self) -> Result<Option<String>, StepError> {
        if let Some(key) = &self.config.api_key {
            return Ok(Some(key.clone()));
        }
        match self.config.platform {
            Platform::OpenAi => std::env::var(OPENAI_API_KEY_ENV)
                .map(Some)
                .map_err(|_| StepError::fatal(format!("{OPENAI_API_KEY_ENV} is not set"))),
            Platform::Vllm => Ok(Some(VLLM_API_KEY.to_string())),
            Platform::Ollama => Ok(None),
        }
    }

    fn request_body<'a>(&'a self, messages: &'a [ChatMessage]) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            stop: &self.config.stop,
            stream: false,
        }
    }
}

#[async_trait]
impl ChatCompletion for ChatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, StepError> {
        let url = self.endpoint()?;
        let mut request = self
            .http
            .post(&url)
            .timeout(self.config.timeout)
            .json(&self.request_body(messages));
        if let Some(key) = self.api_key()? {
            request = request.bearer_auth(key);
        }

        debug!(
            platform = %self.config.platform,
            model = %self.config.model,
            messages = messages.len(),
            "Sending chat completion request"
        );
        let response = request
            .send()
            .await
            .map_err(|e| StepError::retryable(format!("Request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status} from {url}: {body}");
            return Err(if is_retryable_status(status) {
                StepError::retryable(message)
            } else {
                StepError::fatal(message)
            });
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| StepError::fatal(format!("Malformed reply from {url}: {e}")))?;
        extract_reply(reply)
    }
}
