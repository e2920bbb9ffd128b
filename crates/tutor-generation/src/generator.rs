use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

use tutor_core::{ChatGenerator, ChatMessage, GeneratorChunk, GeneratorError, RetryConfig};

/// Wraps a `ChatGenerator` collaborator with the retry/backoff policy and
/// fallback substitution of spec §4.8.
pub struct Generator {
    backend: Arc<dyn ChatGenerator>,
    retry: RetryConfig,
}

impl Generator {
    pub fn new(backend: Arc<dyn ChatGenerator>, retry: RetryConfig) -> Self {
        Self { backend, retry }
    }

    /// Exponential backoff (base `initial_delay_ms`, factor
    /// `backoff_factor`, capped at `max_delay_ms`), applied only to
    /// retryable error kinds. Non-retryable kinds fail immediately.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GeneratorError> {
        let mut attempt = 0u32;
        loop {
            match self.backend.complete(messages).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    warn!(attempt, error = %e, "generator request failed, retrying");
                    tokio::time::sleep(self.backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<Result<GeneratorChunk, GeneratorError>>, GeneratorError> {
        let mut attempt = 0u32;
        loop {
            match self.backend.stream_complete(messages).await {
                Ok(rx) => return Ok(rx),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    warn!(attempt, error = %e, "generator stream open failed, retrying");
                    tokio::time::sleep(self.backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Blocking completion with fallback substitution: errors are trapped
    /// and replaced with a user-friendly message keyed by error kind.
    pub async fn complete_with_fallback(&self, messages: &[ChatMessage]) -> String {
        match self.complete(messages).await {
            Ok(text) => text,
            Err(e) => e.fallback_message().to_string(),
        }
    }

    /// Forwards to the underlying backend's health check (spec §6).
    pub async fn health(&self) -> bool {
        self.backend.health().await
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry.initial_delay_ms as f64;
        let factor = self.retry.backoff_factor.powi(attempt as i32);
        let ms = (base * factor).min(self.retry.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tutor_core::FinishReason;

    struct FlakyThenOk {
        calls: AtomicU32,
        fail_times: u32,
    }

    #[async_trait]
    impl ChatGenerator for FlakyThenOk {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, GeneratorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(GeneratorError::ServiceUnavailable("down".into()))
            } else {
                Ok("the answer".into())
            }
        }

        async fn stream_complete(
            &self,
            _messages: &[ChatMessage],
        ) -> Result<mpsc::Receiver<Result<GeneratorChunk, GeneratorError>>, GeneratorError> {
            let (tx, rx) = mpsc::channel(4);
            tx.send(Ok(GeneratorChunk {
                delta: "hi".into(),
                finish_reason: Some(FinishReason::Stop),
            }))
            .await
            .ok();
            Ok(rx)
        }

        async fn health(&self) -> bool {
            true
        }
    }

    struct AlwaysNonRetryable;

    #[async_trait]
    impl ChatGenerator for AlwaysNonRetryable {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, GeneratorError> {
            Err(GeneratorError::ModelNotFound("gpt-nope".into()))
        }
        async fn stream_complete(
            &self,
            _messages: &[ChatMessage],
        ) -> Result<mpsc::Receiver<Result<GeneratorChunk, GeneratorError>>, GeneratorError> {
            Err(GeneratorError::ModelNotFound("gpt-nope".into()))
        }
        async fn health(&self) -> bool {
            false
        }
    }

    fn fast_retry_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_factor: 2.0,
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let backend = Arc::new(FlakyThenOk {
            calls: AtomicU32::new(0),
            fail_times: 1,
        });
        let generator = Generator::new(backend, fast_retry_config());
        let result = generator.complete(&[]).await.unwrap();
        assert_eq!(result, "the answer");
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let backend = Arc::new(AlwaysNonRetryable);
        let generator = Generator::new(backend, fast_retry_config());
        let err = generator.complete(&[]).await.unwrap_err();
        assert_eq!(err, GeneratorError::ModelNotFound("gpt-nope".into()));
    }

    #[tokio::test]
    async fn fallback_substitutes_friendly_message_on_exhaustion() {
        let backend = Arc::new(FlakyThenOk {
            calls: AtomicU32::new(0),
            fail_times: 100,
        });
        let generator = Generator::new(backend, fast_retry_config());
        let text = generator.complete_with_fallback(&[]).await;
        assert_eq!(text, GeneratorError::ServiceUnavailable(String::new()).fallback_message());
    }
}
