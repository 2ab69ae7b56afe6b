//! HTTP completion backends.
//!
//! `openai` speaks the chat-completions protocol (`POST {base}/chat/completions`
//! with a bearer token). `huggingface` speaks the hosted inference text
//! generation protocol (`POST {base}/models/{model}`).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use placebot_core::config::CompletionConfig;

use crate::{CompletionError, CompletionRequest, CompletionService};

/// Wire protocol of the completion endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    HuggingFace,
}

impl FromStr for Provider {
    type Err = CompletionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "huggingface" | "hf" => Ok(Provider::HuggingFace),
            other => Err(CompletionError::Config(format!(
                "unknown provider '{}', expected 'openai' or 'huggingface'",
                other
            ))),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::OpenAi => write!(f, "openai"),
            Provider::HuggingFace => write!(f, "huggingface"),
        }
    }
}

/// Completion client over reqwest.
pub struct HttpCompletionClient {
    client: reqwest::Client,
    provider: Provider,
    base_url: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
    timeout: Duration,
}

impl HttpCompletionClient {
    /// Build a client from configuration, reading the API key from the
    /// environment variable named by `api_key_env`.
    ///
    /// A missing key is reported on the first call, not here.
    pub fn from_config(config: &CompletionConfig) -> Result<Self, CompletionError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::new(config, api_key)
    }

    pub fn new(config: &CompletionConfig, api_key: Option<String>) -> Result<Self, CompletionError> {
        let provider: Provider = config.provider.parse()?;
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CompletionError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            provider,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            api_key_env: config.api_key_env.clone(),
            timeout,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Endpoint URL for the configured provider.
    pub fn endpoint(&self) -> String {
        match self.provider {
            Provider::OpenAi => format!("{}/chat/completions", self.base_url),
            Provider::HuggingFace => format!("{}/models/{}", self.base_url, self.model),
        }
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        match self.provider {
            Provider::OpenAi => openai_body(&self.model, request),
            Provider::HuggingFace => huggingface_body(request),
        }
    }

    fn map_send_error(&self, err: reqwest::Error) -> CompletionError {
        if err.is_timeout() {
            CompletionError::Timeout(self.timeout.as_secs())
        } else {
            CompletionError::Unavailable(err.to_string())
        }
    }
}

impl fmt::Debug for HttpCompletionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCompletionClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[async_trait]
impl CompletionService for HttpCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CompletionError::MissingApiKey(self.api_key_env.clone()))?;

        let url = self.endpoint();
        debug!(provider = %self.provider, url = %url, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_send_error(e))?;
        if !status.is_success() {
            return Err(CompletionError::Http {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| CompletionError::MalformedResponse(format!("invalid JSON: {}", e)))?;
        match self.provider {
            Provider::OpenAi => parse_openai(&value),
            Provider::HuggingFace => parse_huggingface(&value),
        }
    }

    fn name(&self) -> &str {
        match self.provider {
            Provider::OpenAi => "openai",
            Provider::HuggingFace => "huggingface",
        }
    }
}

/// Chat-completions request body with the prompt as a single user message.
pub fn openai_body(model: &str, request: &CompletionRequest) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "user", "content": request.prompt }
        ],
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
    })
}

/// Text-generation request body.
pub fn huggingface_body(request: &CompletionRequest) -> Value {
    json!({
        "inputs": request.prompt,
        "parameters": {
            "max_new_tokens": request.max_tokens,
            "temperature": request.temperature,
            "return_full_text": false,
        },
    })
}

/// Extract `choices[0].message.content`.
pub fn parse_openai(value: &Value) -> Result<String, CompletionError> {
    value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            CompletionError::MalformedResponse("missing choices[0].message.content".to_string())
        })
}

/// Extract `generated_text` from either `[{..}]` or `{..}`.
pub fn parse_huggingface(value: &Value) -> Result<String, CompletionError> {
    if let Some(err) = value.get("error").and_then(|e| e.as_str()) {
        return Err(CompletionError::MalformedResponse(format!(
            "service reported an error: {}",
            err
        )));
    }
    let item = match value {
        Value::Array(items) => items.first(),
        other => Some(other),
    };
    item.and_then(|i| i.get("generated_text"))
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .ok_or_else(|| CompletionError::MalformedResponse("missing generated_text".to_string()))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
