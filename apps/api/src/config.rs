use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

/// Application configuration loaded from environment variables.
/// Every value has a default so a local, unauthenticated backend works out of the box.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    pub max_upload_bytes: usize,
    pub model: ModelConfig,
    pub sanitizer: SanitizerConfig,
    pub prompt: PromptConfig,
    pub session: SessionConfig,
    pub ocr: OcrConfig,
}

/// Which wire protocol the completion backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelProvider {
    /// OpenAI-compatible `/chat/completions` (Groq, OpenAI, Ollama, vLLM, ...).
    OpenAi,
    Anthropic,
}

impl FromStr for ModelProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "groq" => Ok(ModelProvider::OpenAi),
            "anthropic" => Ok(ModelProvider::Anthropic),
            other => bail!("unknown LLM provider '{other}' (expected 'openai' or 'anthropic')"),
        }
    }
}

impl ModelProvider {
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            ModelProvider::OpenAi => "https://api.groq.com/openai/v1/chat/completions",
            ModelProvider::Anthropic => "https://api.anthropic.com/v1/messages",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ModelProvider::OpenAi => "llama-3.1-8b-instant",
            ModelProvider::Anthropic => "claude-sonnet-4-5",
        }
    }
}

/// Generation parameters and call policy for the model backend.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub provider: ModelProvider,
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    /// Total attempts, including the first call.
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let provider = ModelProvider::OpenAi;
        Self {
            provider,
            endpoint: provider.default_endpoint().to_string(),
            model: provider.default_model().to_string(),
            api_key: None,
            temperature: 0.3,
            max_tokens: 2048,
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            backoff_base: Duration::from_millis(1000),
        }
    }
}

/// Denylist extension and per-role length caps (in characters).
#[derive(Debug, Clone)]
pub struct SanitizerConfig {
    pub placeholder: String,
    pub extra_patterns: Vec<String>,
    pub max_resume_chars: usize,
    pub max_job_description_chars: usize,
    pub max_question_chars: usize,
    pub max_model_field_chars: usize,
    pub max_bullet_description_chars: usize,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            placeholder: "[removed]".to_string(),
            extra_patterns: Vec::new(),
            max_resume_chars: 12_000,
            max_job_description_chars: 6_000,
            max_question_chars: 1_000,
            max_model_field_chars: 4_000,
            max_bullet_description_chars: 1_500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptConfig {
    pub max_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self { max_chars: 32_000 }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub history_max_turns: usize,
    pub history_max_chars: usize,
    pub idle_ttl: Duration,
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_max_turns: 10,
            history_max_chars: 16_000,
            idle_ttl: Duration::from_secs(3600),
            max_sessions: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub tesseract_bin: String,
    pub pdftoppm_bin: String,
    pub language: String,
    pub dpi: u32,
    pub max_pages: u32,
    pub timeout: Duration,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_bin: "tesseract".to_string(),
            pdftoppm_bin: "pdftoppm".to_string(),
            language: "eng".to_string(),
            dpi: 300,
            max_pages: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let provider: ModelProvider = env_or("LLM_PROVIDER", ModelProvider::OpenAi)?;
        let model_defaults = ModelConfig::default();
        let model = ModelConfig {
            provider,
            endpoint: optional_env("LLM_ENDPOINT")
                .unwrap_or_else(|| provider.default_endpoint().to_string()),
            model: optional_env("LLM_MODEL")
                .unwrap_or_else(|| provider.default_model().to_string()),
            api_key: optional_env("LLM_API_KEY"),
            temperature: env_or("LLM_TEMPERATURE", model_defaults.temperature)?,
            max_tokens: env_or("LLM_MAX_TOKENS", model_defaults.max_tokens)?,
            timeout: Duration::from_secs(env_or("LLM_TIMEOUT_SECS", 60u64)?),
            max_attempts: env_or("LLM_MAX_ATTEMPTS", model_defaults.max_attempts)?,
            backoff_base: Duration::from_millis(env_or("LLM_BACKOFF_MS", 1000u64)?),
        };
        if model.max_attempts == 0 {
            bail!("LLM_MAX_ATTEMPTS must be at least 1");
        }

        let s = SanitizerConfig::default();
        let sanitizer = SanitizerConfig {
            placeholder: optional_env("SANITIZER_PLACEHOLDER").unwrap_or(s.placeholder),
            extra_patterns: optional_env("SANITIZER_EXTRA_PATTERNS")
                .map(|raw| split_patterns(&raw))
                .unwrap_or_default(),
            max_resume_chars: env_or("MAX_RESUME_CHARS", s.max_resume_chars)?,
            max_job_description_chars: env_or(
                "MAX_JOB_DESCRIPTION_CHARS",
                s.max_job_description_chars,
            )?,
            max_question_chars: env_or("MAX_QUESTION_CHARS", s.max_question_chars)?,
            max_model_field_chars: env_or("MAX_MODEL_FIELD_CHARS", s.max_model_field_chars)?,
            max_bullet_description_chars: env_or(
                "MAX_BULLET_DESCRIPTION_CHARS",
                s.max_bullet_description_chars,
            )?,
        };

        let sess = SessionConfig::default();
        let session = SessionConfig {
            history_max_turns: env_or("HISTORY_MAX_TURNS", sess.history_max_turns)?,
            history_max_chars: env_or("HISTORY_MAX_CHARS", sess.history_max_chars)?,
            idle_ttl: Duration::from_secs(env_or("SESSION_IDLE_TTL_SECS", 3600u64)?),
            max_sessions: env_or("MAX_SESSIONS", sess.max_sessions)?,
        };

        let o = OcrConfig::default();
        let ocr = OcrConfig {
            tesseract_bin: optional_env("OCR_TESSERACT_BIN").unwrap_or(o.tesseract_bin),
            pdftoppm_bin: optional_env("OCR_PDFTOPPM_BIN").unwrap_or(o.pdftoppm_bin),
            language: optional_env("OCR_LANGUAGE").unwrap_or(o.language),
            dpi: env_or("OCR_DPI", o.dpi)?,
            max_pages: env_or("OCR_MAX_PAGES", o.max_pages)?,
            timeout: Duration::from_secs(env_or("OCR_TIMEOUT_SECS", 60u64)?),
        };

        Ok(Config {
            port: env_or("PORT", 8080u16).context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 10 * 1024 * 1024usize)?,
            model,
            sanitizer,
            prompt: PromptConfig {
                max_chars: env_or("PROMPT_MAX_CHARS", PromptConfig::default().max_chars)?,
            },
            session,
            ocr,
        })
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match optional_env(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow!("Environment variable '{key}' has an invalid value '{raw}': {e}")),
        None => Ok(default),
    }
}

/// Splits a `;;`-separated list of regex sources, dropping blanks.
fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(";;")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!("openai".parse::<ModelProvider>().unwrap(), ModelProvider::OpenAi);
        assert_eq!("Groq".parse::<ModelProvider>().unwrap(), ModelProvider::OpenAi);
        assert_eq!(
            "anthropic".parse::<ModelProvider>().unwrap(),
            ModelProvider::Anthropic
        );
        assert!("bard".parse::<ModelProvider>().is_err());
    }

    #[test]
    fn test_split_patterns_drops_blanks() {
        let patterns = split_patterns(r"(?i)foo;; ;;bar\s+baz;;");
        assert_eq!(patterns, vec![r"(?i)foo".to_string(), r"bar\s+baz".to_string()]);
    }

    #[test]
    fn test_defaults_are_sane() {
        let model = ModelConfig::default();
        assert_eq!(model.max_attempts, 3);
        assert_eq!(model.provider, ModelProvider::OpenAi);
        let s = SanitizerConfig::default();
        assert!(s.max_question_chars < s.max_job_description_chars);
        assert!(s.max_job_description_chars < s.max_resume_chars);
        assert!(PromptConfig::default().max_chars > s.max_resume_chars + s.max_job_description_chars);
    }
}
