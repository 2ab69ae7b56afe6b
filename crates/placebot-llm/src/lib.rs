//! Placebot LLM crate - text-completion service seam.
//!
//! Provides a trait-based abstraction over the hosted model that turns a
//! prompt into SQL text, HTTP backends for OpenAI-compatible and Hugging
//! Face inference endpoints, and a scripted mock for tests.

pub mod http;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use placebot_core::error::PlacebotError;

pub use http::{HttpCompletionClient, Provider};

// =============================================================================
// Request
// =============================================================================

/// One completion call: the full prompt plus sampling bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Sampling temperature in (0, 1].
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
            temperature,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Failures talking to the completion service.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompletionError {
    /// Network failure before a response arrived.
    #[error("service unreachable: {0}")]
    Unavailable(String),
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// The response envelope could not be read.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// The environment variable holding the API key is unset.
    #[error("API key not set (expected in ${0})")]
    MissingApiKey(String),
    #[error("invalid completion configuration: {0}")]
    Config(String),
}

impl CompletionError {
    /// True when another attempt may succeed: network errors, timeouts,
    /// server errors and rate limiting.
    pub fn is_retryable(&self) -> bool {
        match self {
            CompletionError::Unavailable(_) | CompletionError::Timeout(_) => true,
            CompletionError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<CompletionError> for PlacebotError {
    fn from(err: CompletionError) -> Self {
        PlacebotError::Completion(err.to_string())
    }
}

// =============================================================================
// Trait
// =============================================================================

/// Service that turns a prompt into completion text.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Run one completion. Implementations make at most one outbound call.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;

    /// Short identifier for logs.
    fn name(&self) -> &str;
}

// =============================================================================
// Mock implementation
// =============================================================================

/// Scripted completion service.
///
/// Replies are handed out in order; once the script runs out the fallback
/// reply is used, or `Unavailable` when there is none. Every call is counted
/// and the last request kept for inspection.
#[derive(Debug, Default)]
pub struct MockCompletion {
    script: Mutex<VecDeque<Result<String, CompletionError>>>,
    fallback: Option<String>,
    calls: AtomicUsize,
    last_request: Mutex<Option<CompletionRequest>>,
}

impl MockCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock answering every call with the same text.
    pub fn always(reply: impl Into<String>) -> Self {
        Self {
            fallback: Some(reply.into()),
            ..Self::default()
        }
    }

    /// Mock replaying the given replies in order.
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    /// Mock replaying successes and failures in order.
    pub fn with_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = Result<String, CompletionError>>,
    {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Number of `complete` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.last_request.lock().ok().and_then(|g| g.clone())
    }
}

#[async_trait]
impl CompletionService for MockCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request.clone());
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(result) => result,
            None => match &self.fallback {
                Some(reply) => Ok(reply.clone()),
                None => Err(CompletionError::Unavailable(
                    "mock script exhausted".to_string(),
                )),
            },
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// =============================================================================
// Tests
// =============================================================================
