//! Query generation: prompt in, raw completion text out.
//!
//! Each attempt is bounded by the configured timeout. Only unavailability
//! (network errors, timeouts, 5xx, 429) is retried, at most
//! `max_attempts - 1` times with a linear backoff.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use placebot_core::config::CompletionConfig;
use placebot_llm::{CompletionError, CompletionRequest, CompletionService};

/// Base delay between attempts; attempt `n` waits `n * RETRY_BACKOFF`.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

pub struct QueryGenerator {
    service: Arc<dyn CompletionService>,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    max_attempts: u32,
    backoff: Duration,
}

impl QueryGenerator {
    pub fn new(service: Arc<dyn CompletionService>, config: &CompletionConfig) -> Self {
        Self {
            service,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
            max_attempts: config.max_attempts.max(1),
            backoff: RETRY_BACKOFF,
        }
    }

    /// Override the retry backoff base.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Generate the raw completion for `prompt`.
    pub async fn generate(&self, prompt: &str) -> Result<String, CompletionError> {
        let request = CompletionRequest::new(prompt, self.max_tokens, self.temperature);
        let mut attempt = 1;

        loop {
            debug!(
                attempt,
                service = self.service.name(),
                prompt_chars = prompt.len(),
                "Requesting completion"
            );
            let result = match tokio::time::timeout(self.timeout, self.service.complete(&request)).await
            {
                Ok(result) => result,
                Err(_) => Err(CompletionError::Timeout(self.timeout.as_secs())),
            };

            match result {
                Ok(text) => return Ok(text),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Completion attempt failed, retrying"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl std::fmt::Debug for QueryGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryGenerator")
            .field("service", &self.service.name())
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use placebot_llm::MockCompletion;

    struct StalledCompletion;

    #[async_trait::async_trait]
    impl CompletionService for StalledCompletion {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, CompletionError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("SELECT 1;".to_string())
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    fn generator(mock: Arc<MockCompletion>, max_attempts: u32) -> QueryGenerator {
        let config = CompletionConfig {
            max_attempts,
            ..CompletionConfig::default()
        };
        QueryGenerator::new(mock, &config).with_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_generate_returns_raw_text() {
        let mock = Arc::new(MockCompletion::always(" SELECT COUNT(*) FROM students; "));
        let gen = generator(mock.clone(), 2);
        let text = gen.generate("prompt").await.unwrap();
        assert_eq!(text, " SELECT COUNT(*) FROM students; ");
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_generate_passes_sampling_bounds() {
        let mock = Arc::new(MockCompletion::always("SELECT 1;"));
        let gen = generator(mock.clone(), 1);
        gen.generate("the prompt").await.unwrap();

        let req = mock.last_request().unwrap();
        assert_eq!(req.prompt, "the prompt");
        assert_eq!(req.max_tokens, 512);
        assert!((req.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_retries_unavailable_then_succeeds() {
        let mock = Arc::new(MockCompletion::with_results(vec![
            Err(CompletionError::Unavailable("connection refused".into())),
            Ok("SELECT 1;".to_string()),
        ]));
        let gen = generator(mock.clone(), 2);
        assert_eq!(gen.generate("p").await.unwrap(), "SELECT 1;");
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_retries_bounded_by_max_attempts() {
        let mock = Arc::new(MockCompletion::with_results(vec![
            Err(CompletionError::Http {
                status: 503,
                body: "loading".into(),
            }),
            Err(CompletionError::Http {
                status: 503,
                body: "loading".into(),
            }),
            Err(CompletionError::Http {
                status: 503,
                body: "loading".into(),
            }),
            Ok("SELECT 1;".to_string()),
        ]));
        let gen = generator(mock.clone(), 3);
        let err = gen.generate("p").await.unwrap_err();
        assert!(matches!(err, CompletionError::Http { status: 503, .. }));
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let mock = Arc::new(MockCompletion::with_results(vec![
            Err(CompletionError::Http {
                status: 401,
                body: "bad token".into(),
            }),
            Ok("SELECT 1;".to_string()),
        ]));
        let gen = generator(mock.clone(), 5);
        let err = gen.generate("p").await.unwrap_err();
        assert!(matches!(err, CompletionError::Http { status: 401, .. }));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_response_not_retried() {
        let mock = Arc::new(MockCompletion::with_results(vec![Err(
            CompletionError::MalformedResponse("no choices".into()),
        )]));
        let gen = generator(mock.clone(), 3);
        assert!(gen.generate("p").await.is_err());
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_service_times_out() {
        let config = CompletionConfig {
            timeout_secs: 5,
            max_attempts: 2,
            ..CompletionConfig::default()
        };
        let gen = QueryGenerator::new(Arc::new(StalledCompletion), &config);
        let err = gen.generate("p").await.unwrap_err();
        assert_eq!(err, CompletionError::Timeout(5));
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let mock = Arc::new(MockCompletion::always("x"));
        let config = CompletionConfig {
            max_attempts: 0,
            ..CompletionConfig::default()
        };
        let gen = QueryGenerator::new(mock, &config);
        assert_eq!(gen.max_attempts, 1);
    }
}
