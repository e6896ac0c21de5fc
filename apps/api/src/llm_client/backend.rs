use async_trait::async_trait;
use thiserror::Error;

use crate::prompt::PromptPayload;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed backend response: {0}")]
    Malformed(String),

    #[error("LLM returned empty content")]
    EmptyContent,
}

impl BackendError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Http(e) => !e.is_builder(),
            BackendError::Api { status, .. } => matches!(*status, 408 | 429) || *status >= 500,
            BackendError::Malformed(_) => false,
            BackendError::EmptyContent => true,
        }
    }
}

/// A chat-completion backend. One call is one attempt; retries, timeouts and
/// backoff belong to `ModelClient`.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the raw text of the first completion choice.
    async fn complete(&self, payload: &PromptPayload) -> Result<String, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let api = |status| BackendError::Api {
            status,
            message: String::new(),
        };
        assert!(api(429).is_transient());
        assert!(api(408).is_transient());
        assert!(api(503).is_transient());
        assert!(!api(401).is_transient());
        assert!(!api(400).is_transient());
        assert!(BackendError::EmptyContent.is_transient());
        assert!(!BackendError::Malformed("x".into()).is_transient());
    }
}
