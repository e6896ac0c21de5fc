/// Model Client: the single point of entry for every model call.
///
/// No other module talks to a completion backend directly. Each attempt is
/// bounded by a timeout; transient failures are retried with exponential
/// backoff up to a fixed number of total attempts, after which the caller
/// gets `BackendUnavailable`.
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod anthropic;
pub mod backend;
pub mod openai;

pub use backend::{BackendError, CompletionBackend};

use crate::config::{ModelConfig, ModelProvider};
use crate::errors::ErrorKind;
use crate::prompt::PromptPayload;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model backend unavailable after {attempts} attempt(s): {last}")]
    Unavailable { attempts: u32, last: String },
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::BackendUnavailable
    }
}

/// Raw model text plus how many attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResponse {
    pub text: String,
    pub attempts: u32,
}

#[derive(Clone)]
pub struct ModelClient {
    backend: Arc<dyn CompletionBackend>,
    timeout: Duration,
    max_attempts: u32,
    backoff_base: Duration,
}

impl ModelClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: &ModelConfig) -> Self {
        Self {
            backend,
            timeout: config.timeout,
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base,
        }
    }

    /// Builds the HTTP backend named by the configured provider.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let backend: Arc<dyn CompletionBackend> = match config.provider {
            ModelProvider::OpenAi => Arc::new(openai::OpenAiBackend::new(client, config)),
            ModelProvider::Anthropic => Arc::new(anthropic::AnthropicBackend::new(client, config)),
        };
        info!(
            "Model client: backend={} model={} endpoint={}",
            backend.name(),
            config.model,
            config.endpoint
        );
        Ok(Self::new(backend, config))
    }

    /// Sends the payload, retrying transient failures. Never returns a partial response.
    pub async fn complete(&self, payload: &PromptPayload) -> Result<ModelResponse, LlmError> {
        let mut last_error = String::new();

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                // Exponential backoff: base, 2x base, 4x base, ...
                let delay = self.backoff_base.saturating_mul(1 << (attempt - 1).min(16));
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(self.timeout, self.backend.complete(payload)).await {
                Ok(Ok(text)) => {
                    debug!(
                        "LLM call succeeded on attempt {} ({} chars in, {} chars out)",
                        attempt + 1,
                        payload.total_chars(),
                        text.chars().count()
                    );
                    return Ok(ModelResponse {
                        text,
                        attempts: attempt + 1,
                    });
                }
                Ok(Err(e)) if e.is_transient() => {
                    warn!("LLM backend {} failed: {}", self.backend.name(), e);
                    last_error = e.to_string();
                }
                Ok(Err(e)) => {
                    warn!("LLM backend {} failed permanently: {}", self.backend.name(), e);
                    return Err(LlmError::Unavailable {
                        attempts: attempt + 1,
                        last: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(
                        "LLM backend {} timed out after {}ms",
                        self.backend.name(),
                        self.timeout.as_millis()
                    );
                    last_error = format!("timed out after {}ms", self.timeout.as_millis());
                }
            }
        }

        Err(LlmError::Unavailable {
            attempts: self.max_attempts,
            last: last_error,
        })
    }
}

/// Scripted backend for tests across the crate.
#[cfg(test)]
pub(crate) mod fake {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::backend::{BackendError, CompletionBackend};
    use crate::prompt::PromptPayload;

    pub enum Step {
        Reply(String),
        Fail(BackendError),
        Hang,
    }

    /// Plays `steps` in order, then repeats `fallback` forever.
    pub struct ScriptedBackend {
        steps: Mutex<VecDeque<Step>>,
        fallback: fn() -> Step,
        calls: AtomicU32,
        pub last_payload: Mutex<Option<PromptPayload>>,
    }

    impl ScriptedBackend {
        pub fn new(steps: Vec<Step>, fallback: fn() -> Step) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                fallback,
                calls: AtomicU32::new(0),
                last_payload: Mutex::new(None),
            }
        }

        pub fn replying(text: &str) -> Self {
            Self::new(vec![Step::Reply(text.to_string())], || Step::Hang)
        }

        pub fn hanging() -> Self {
            Self::new(Vec::new(), || Step::Hang)
        }

        pub fn push(&self, step: Step) {
            self.steps.lock().unwrap().push_back(step);
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(&self, payload: &PromptPayload) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_payload.lock().unwrap() = Some(payload.clone());
            let step = self
                .steps
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(self.fallback);
            match step {
                Step::Reply(text) => Ok(text),
                Step::Fail(e) => Err(e),
                Step::Hang => std::future::pending().await,
            }
        }
    }
}
