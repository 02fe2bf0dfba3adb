//! External text generation: the [`TextGenerator`] seam, an OpenRouter
//! implementation over rig, bounded retry, and strict parsing of structured
//! output.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rig::{client::CompletionClient, completion::Prompt, providers::openrouter};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::{GenerationConfig, RetryPolicy};
use crate::error::{BoardError, BoardResult, GenerationError, MalformedOutput};

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Complete `prompt` under the role-specific `system` text.
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, GenerationError>;
}

pub struct OpenRouterGenerator {
    client: openrouter::Client,
    model: String,
    temperature: f64,
    timeout: Duration,
}

impl OpenRouterGenerator {
    pub fn new(config: &GenerationConfig) -> BoardResult<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| BoardError::Config("OPENROUTER_API_KEY not set".into()))?;
        Ok(Self {
            client: openrouter::Client::new(api_key),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenRouterGenerator {
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, GenerationError> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(system)
            .temperature(self.temperature)
            .build();

        match tokio::time::timeout(self.timeout, agent.prompt(prompt)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(classify_failure(&e.to_string())),
            Err(_) => Err(GenerationError::Transient(format!(
                "request timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// Credential and configuration problems are fatal; everything else
/// (rate limits, timeouts, 5xx, dropped connections) is worth retrying.
pub fn classify_failure(message: &str) -> GenerationError {
    let lower = message.to_ascii_lowercase();
    let fatal = ["401", "403", "unauthorized", "forbidden", "api key", "invalid model"]
        .iter()
        .any(|marker| lower.contains(marker));
    if fatal {
        GenerationError::Fatal(message.to_string())
    } else {
        GenerationError::Transient(message.to_string())
    }
}

/// Retries transient failures with exponential backoff. Fatal failures and
/// the last transient failure are returned as-is.
pub struct RetryingGenerator {
    inner: Arc<dyn TextGenerator>,
    policy: RetryPolicy,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn TextGenerator>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl TextGenerator for RetryingGenerator {
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, GenerationError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.complete(prompt, system).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(attempt, ?delay, error = %e, "transient generation failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// The production generator: OpenRouter behind the configured retry policy.
pub fn build_generator(config: &GenerationConfig) -> BoardResult<Arc<dyn TextGenerator>> {
    let inner: Arc<dyn TextGenerator> = Arc::new(OpenRouterGenerator::new(config)?);
    Ok(Arc::new(RetryingGenerator::new(inner, config.retry.clone())))
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse generated JSON into `T`. A surrounding markdown code fence is
/// tolerated; anything else that is not exactly the expected shape is a
/// [`MalformedOutput`].
pub fn parse_structured<T: DeserializeOwned>(
    raw: &str,
    expected: &'static str,
) -> Result<T, MalformedOutput> {
    let cleaned = strip_code_fence(raw);
    serde_json::from_str(cleaned).map_err(|e| {
        debug!(raw = %raw, "structured output rejected");
        MalformedOutput {
            expected,
            reason: e.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<Result<String, GenerationError>>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<String, GenerationError>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn complete(&self, _: &str, _: &str) -> Result<String, GenerationError> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(GenerationError::Fatal("script exhausted".into())))
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
            multiplier: 2.0,
            max_delay_ms: 4,
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let inner = Arc::new(Scripted::new(vec![
            Err(GenerationError::Transient("429".into())),
            Err(GenerationError::Transient("timeout".into())),
            Ok("done".into()),
        ]));
        let generator = RetryingGenerator::new(inner.clone(), fast_policy());
        assert_eq!(generator.complete("p", "s").await.unwrap(), "done");
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let inner = Arc::new(Scripted::new(vec![
            Err(GenerationError::Transient("a".into())),
            Err(GenerationError::Transient("b".into())),
            Err(GenerationError::Transient("c".into())),
            Ok("never".into()),
        ]));
        let generator = RetryingGenerator::new(inner.clone(), fast_policy());
        let err = generator.complete("p", "s").await.unwrap_err();
        assert_eq!(err, GenerationError::Transient("c".into()));
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn fatal_failures_are_not_retried() {
        let inner = Arc::new(Scripted::new(vec![
            Err(GenerationError::Fatal("401 Unauthorized".into())),
            Ok("never".into()),
        ]));
        let generator = RetryingGenerator::new(inner.clone(), fast_policy());
        assert!(!generator.complete("p", "s").await.unwrap_err().is_transient());
        assert_eq!(inner.calls(), 1);
    }

    #[test]
    fn failure_classification() {
        assert!(!classify_failure("HTTP 401: invalid API key").is_transient());
        assert!(classify_failure("HTTP 429 Too Many Requests").is_transient());
        assert!(classify_failure("connection reset by peer").is_transient());
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        passed: bool,
    }

    #[test]
    fn fenced_and_bare_json_parse() {
        let fenced: Verdict = parse_structured("```json\n{\"passed\": true}\n```", "verdict").unwrap();
        let bare: Verdict = parse_structured(" {\"passed\": false} ", "verdict").unwrap();
        assert!(fenced.passed);
        assert!(!bare.passed);
    }

    #[test]
    fn prose_around_json_is_malformed() {
        let err = parse_structured::<Verdict>("Sure! {\"passed\": true}", "verdict").unwrap_err();
        assert_eq!(err.expected, "verdict");
    }
}
