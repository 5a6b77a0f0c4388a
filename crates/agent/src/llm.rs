use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use showroom_core::config::{LlmConfig, LlmProvider};
use thiserror::Error;
use tracing::warn;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_API_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 512;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: LlmRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: LlmRole::Assistant, content: content.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub messages: Vec<LlmMessage>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm client misconfigured: {0}")]
    Configuration(String),
    #[error("llm request timed out")]
    Timeout,
    #[error("llm transport error: {0}")]
    Transport(String),
    #[error("llm returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("llm response could not be parsed: {0}")]
    Parse(String),
}

impl LlmError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Status { status, .. } => matches!(*status, 408 | 429) || *status >= 500,
            Self::Configuration(_) | Self::Parse(_) => false,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError>;
}

/// Chat-completion client for OpenAI-compatible endpoints (OpenAI, Ollama) and
/// the Anthropic messages API.
pub struct HttpLlmClient {
    provider: LlmProvider,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    max_retries: u32,
    retry_backoff: Duration,
    client: Client,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = match (&config.base_url, config.provider) {
            (Some(url), _) if !url.trim().is_empty() => {
                url.trim().trim_end_matches('/').to_string()
            }
            (_, LlmProvider::OpenAi) => OPENAI_BASE_URL.to_string(),
            (_, LlmProvider::Anthropic) => ANTHROPIC_BASE_URL.to_string(),
            (_, LlmProvider::Ollama) => {
                return Err(LlmError::Configuration("ollama requires llm.base_url".to_string()))
            }
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| LlmError::Configuration(error.to_string()))?;

        Ok(Self {
            provider: config.provider,
            base_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(500),
            client,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn endpoint(&self) -> String {
        match self.provider {
            LlmProvider::OpenAi => format!("{}/chat/completions", self.base_url),
            LlmProvider::Ollama => format!("{}/v1/chat/completions", self.base_url),
            LlmProvider::Anthropic => format!("{}/v1/messages", self.base_url),
        }
    }

    async fn send_once(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let builder = self.client.post(self.endpoint());
        let builder = match self.provider {
            LlmProvider::OpenAi | LlmProvider::Ollama => {
                let builder = builder.json(&self.chat_body(request));
                match &self.api_key {
                    Some(key) => builder.bearer_auth(key.expose_secret()),
                    None => builder,
                }
            }
            LlmProvider::Anthropic => {
                let key = self.api_key.as_ref().ok_or_else(|| {
                    LlmError::Configuration("anthropic requires llm.api_key".to_string())
                })?;
                builder
                    .header("x-api-key", key.expose_secret())
                    .header("anthropic-version", ANTHROPIC_API_VERSION)
                    .json(&self.messages_body(request))
            }
        };

        let response = builder.send().await.map_err(map_transport_error)?;
        let response = check_status(response).await?;

        match self.provider {
            LlmProvider::OpenAi | LlmProvider::Ollama => {
                let body: ChatCompletionResponse = response
                    .json()
                    .await
                    .map_err(|error| LlmError::Parse(error.to_string()))?;
                body.choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .ok_or_else(|| LlmError::Parse("no choices in response".to_string()))
            }
            LlmProvider::Anthropic => {
                let body: MessagesResponse = response
                    .json()
                    .await
                    .map_err(|error| LlmError::Parse(error.to_string()))?;
                let text = body
                    .content
                    .into_iter()
                    .filter(|block| block.kind == "text")
                    .filter_map(|block| block.text)
                    .collect::<Vec<_>>()
                    .join("");
                if text.is_empty() {
                    Err(LlmError::Parse("no text content in response".to_string()))
                } else {
                    Ok(text)
                }
            }
        }
    }

    fn chat_body(&self, request: &LlmRequest) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(ChatMessage { role: "system", content: system.clone() });
        }
        messages.extend(request.messages.iter().map(|message| ChatMessage {
            role: match message.role {
                LlmRole::User => "user",
                LlmRole::Assistant => "assistant",
            },
            content: message.content.clone(),
        }));

        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            stream: false,
        }
    }

    fn messages_body(&self, request: &LlmRequest) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            system: request.system.clone(),
            messages: request.messages.clone(),
            temperature: self.temperature,
            max_tokens: ANTHROPIC_MAX_TOKENS,
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            match self.send_once(request).await {
                Ok(text) => return Ok(text),
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    warn!(
                        event_name = "llm.request_retry",
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %error,
                        "retrying llm request"
                    );
                    tokio::time::sleep(backoff_delay(self.retry_backoff, attempt)).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Doubles `base` per attempt, capped at 30 seconds.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

fn map_transport_error(error: reqwest::Error) -> LlmError {
    if error.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Transport(error.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(LlmError::Status { status: status.as_u16(), body })
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<LlmMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use showroom_core::config::{AppConfig, LlmProvider};

    use std::time::Duration;

    use super::{backoff_delay, HttpLlmClient, LlmError, LlmMessage, LlmRequest, MAX_BACKOFF};

    fn request() -> LlmRequest {
        LlmRequest {
            system: Some("extract slots".to_string()),
            messages: vec![LlmMessage::user("I want an SUV")],
        }
    }

    #[test]
    fn backoff_doubles_and_never_overflows() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0), base);
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 32), MAX_BACKOFF);
        assert_eq!(backoff_delay(base, u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn endpoints_follow_provider_conventions() {
        let mut config = AppConfig::default().llm;
        let ollama = HttpLlmClient::from_config(&config).expect("ollama client");
        assert_eq!(ollama.endpoint(), "http://localhost:11434/v1/chat/completions");

        config.provider = LlmProvider::OpenAi;
        config.base_url = None;
        config.api_key = Some(SecretString::from("sk-test".to_string()));
        let openai = HttpLlmClient::from_config(&config).expect("openai client");
        assert_eq!(openai.endpoint(), "https://api.openai.com/v1/chat/completions");

        config.provider = LlmProvider::Anthropic;
        let anthropic = HttpLlmClient::from_config(&config).expect("anthropic client");
        assert_eq!(anthropic.endpoint(), "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn chat_body_prepends_system_message() {
        let client = HttpLlmClient::from_config(&AppConfig::default().llm).expect("client");
        let body = serde_json::to_value(client.chat_body(&request())).expect("serialize");

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "I want an SUV");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn anthropic_body_keeps_system_separate() {
        let mut config = AppConfig::default().llm;
        config.provider = LlmProvider::Anthropic;
        config.api_key = Some(SecretString::from("key".to_string()));
        let client = HttpLlmClient::from_config(&config).expect("client");

        let body = serde_json::to_value(client.messages_body(&request())).expect("serialize");
        assert_eq!(body["system"], "extract slots");
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
        assert!(body["max_tokens"].as_u64().unwrap_or_default() > 0);
    }

    #[test]
    fn only_transient_failures_are_retried() {
        assert!(LlmError::Timeout.is_retryable());
        assert!(LlmError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(LlmError::Status { status: 502, body: String::new() }.is_retryable());
        assert!(!LlmError::Status { status: 401, body: String::new() }.is_retryable());
        assert!(!LlmError::Parse("bad".to_string()).is_retryable());
    }
}
