//! Structured-data request: send the prompt to a generative-text model.
//!
//! The model sits behind [`TextGenerator`]; [`LlmTextGenerator`] adapts any
//! `edgequake_llm` provider (Gemini, OpenAI, Anthropic, Ollama, …). All
//! prompt wording lives in [`crate::prompts`].
//!
//! ## Retry Strategy
//!
//! Each attempt is bounded by `api_timeout_secs`. Transient failures and
//! timeouts are retried with exponential backoff (`retry_backoff_ms * 2^n`:
//! 500 ms → 1 s → 2 s by default, never more than [`MAX_BACKOFF_MS`]).
//! Authentication failures are permanent and returned immediately.

use crate::config::IntakeConfig;
use crate::error::{DocumentError, Stage};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Upper bound on a single backoff sleep.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// A model reply plus token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Failure of a single generation attempt.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// Worth retrying (network blip, 429, 5xx).
    #[error("{0}")]
    Transient(String),
    /// Retrying cannot help (bad key, malformed request).
    #[error("{0}")]
    Permanent(String),
}

/// A generative-text capability: prompt in, unstructured text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Generation, GenerationError>;
}

/// [`TextGenerator`] backed by an `edgequake_llm` provider.
pub struct LlmTextGenerator {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmTextGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &IntakeConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }
}

#[async_trait]
impl TextGenerator for LlmTextGenerator {
    async fn generate(&self, prompt: &str) -> Result<Generation, GenerationError> {
        let messages = vec![ChatMessage::user(prompt)];
        match self.provider.chat(&messages, Some(&self.options)).await {
            Ok(response) => Ok(Generation {
                text: response.content,
                input_tokens: response.prompt_tokens,
                output_tokens: response.completion_tokens,
            }),
            Err(e) => {
                let msg = e.to_string();
                if is_permanent(&msg) {
                    Err(GenerationError::Permanent(msg))
                } else {
                    Err(GenerationError::Transient(msg))
                }
            }
        }
    }
}

/// Authentication and request-shape errors never succeed on retry.
fn is_permanent(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    ["401", "403", "unauthorized", "forbidden", "invalid api key", "api key not valid"]
        .iter()
        .any(|needle| m.contains(needle))
}

/// Build `CompletionOptions` from the run config.
fn build_options(config: &IntakeConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Delay before retry number `attempt` (1-based), saturating at
/// [`MAX_BACKOFF_MS`].
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms
        .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
        .min(MAX_BACKOFF_MS)
}

/// Send `prompt` with bounded retry, timeout and backoff.
///
/// Never panics and never aborts the batch: every failure is folded into a
/// [`DocumentError`] naming `doc_name`.
pub async fn request(
    generator: &Arc<dyn TextGenerator>,
    doc_name: &str,
    prompt: &str,
    config: &IntakeConfig,
) -> Result<Generation, DocumentError> {
    let start = Instant::now();
    let per_call = Duration::from_secs(config.api_timeout_secs);
    let mut last_err: Option<String> = None;
    let mut timed_out_every_attempt = true;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                doc_name, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(per_call, generator.generate(prompt)).await {
            Ok(Ok(generation)) => {
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    doc_name,
                    generation.input_tokens,
                    generation.output_tokens,
                    start.elapsed()
                );
                return Ok(generation);
            }
            Ok(Err(GenerationError::Permanent(msg))) => {
                warn!("{}: permanent LLM error, not retrying: {}", doc_name, msg);
                return Err(DocumentError::RequestFailed {
                    name: doc_name.to_string(),
                    retries: attempt,
                    detail: msg,
                });
            }
            Ok(Err(GenerationError::Transient(msg))) => {
                warn!("{}: attempt {} failed: {}", doc_name, attempt + 1, msg);
                timed_out_every_attempt = false;
                last_err = Some(msg);
            }
            Err(_) => {
                warn!(
                    "{}: attempt {} timed out after {}s",
                    doc_name,
                    attempt + 1,
                    config.api_timeout_secs
                );
                last_err = Some(format!("timed out after {}s", config.api_timeout_secs));
            }
        }
    }

    if timed_out_every_attempt {
        return Err(DocumentError::Timeout {
            name: doc_name.to_string(),
            stage: Stage::Request,
            secs: config.api_timeout_secs,
        });
    }

    Err(DocumentError::RequestFailed {
        name: doc_name.to_string(),
        retries: config.max_retries,
        detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}
