//! Response Validator: turns raw model text into a `FeedbackResult`.
//!
//! Parsing gets one repair attempt (the outermost `{...}` block, which drops
//! prose around it). Field extraction is lenient about shape but strict about
//! keys: unknown keys are dropped, missing keys default to empty. Every string
//! that survives is re-screened by the sanitizer as model output.

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::errors::ErrorKind;
use crate::feedback::schema::{FeedbackResult, SectionCritique, SuggestedBullet};
use crate::llm_client::ModelResponse;
use crate::sanitizer::{Advisory, InputRole, Sanitizer};

/// Hard bound on list lengths taken from the model.
const MAX_ITEMS_PER_FIELD: usize = 20;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("model output contains no JSON object")]
    NoStructuredBlock,

    #[error("model output is not valid JSON after repair: {0}")]
    Unparsable(#[from] serde_json::Error),

    #[error("model output is JSON but not an object")]
    NotAnObject,

    #[error("model output contains no \\item lines")]
    NoBullets,
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::SchemaViolation
    }
}

/// A validated value plus advisories for any field the sanitizer touched.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated<T> {
    pub value: T,
    pub advisories: Vec<Advisory>,
}

#[derive(Clone)]
pub struct ResponseValidator {
    sanitizer: Arc<Sanitizer>,
}

impl ResponseValidator {
    pub fn new(sanitizer: Arc<Sanitizer>) -> Self {
        Self { sanitizer }
    }

    /// Parses and screens a feedback response.
    pub fn validate(&self, raw: &ModelResponse) -> Result<Validated<FeedbackResult>, ValidationError> {
        let object = parse_object(&raw.text)?;
        let mut screen = Screen::new(&self.sanitizer);

        let dropped: Vec<&String> = object
            .keys()
            .filter(|k| !crate::feedback::schema::FEEDBACK_FIELDS.contains(&k.as_str()))
            .collect();
        if !dropped.is_empty() {
            debug!("Dropping unexpected feedback keys: {:?}", dropped);
        }

        let feedback = FeedbackResult {
            strengths: screen.list("strengths", string_items(object.get("strengths"))),
            weaknesses: screen.list("weaknesses", string_items(object.get("weaknesses"))),
            section_critiques: critique_items(object.get("section_critiques"))
                .into_iter()
                .filter_map(|(section, critique)| {
                    let critique = screen.text("section_critiques", &critique)?;
                    Some(SectionCritique {
                        section: screen.text("section_critiques", &section).unwrap_or_default(),
                        critique,
                    })
                })
                .take(MAX_ITEMS_PER_FIELD)
                .collect(),
            ats_notes: screen.list("ats_notes", string_items(object.get("ats_notes"))),
            suggested_bullets: bullet_items(object.get("suggested_bullets"))
                .into_iter()
                .filter_map(|(original, suggestion)| {
                    let suggestion = screen.text("suggested_bullets", &suggestion)?;
                    Some(SuggestedBullet {
                        original: screen.text("suggested_bullets", &original).unwrap_or_default(),
                        suggestion,
                    })
                })
                .take(MAX_ITEMS_PER_FIELD)
                .collect(),
            answer: screen
                .text("answer", &answer_text(object.get("answer")))
                .unwrap_or_default(),
        };

        Ok(Validated {
            value: feedback,
            advisories: screen.finish(),
        })
    }

    /// Parses and screens a LaTeX bullet response: keeps only `\item` lines,
    /// at most `max_items` of them.
    pub fn validate_latex_bullets(
        &self,
        raw: &ModelResponse,
        max_items: usize,
    ) -> Result<Validated<Vec<String>>, ValidationError> {
        let text = strip_json_fences(&raw.text);
        let mut screen = Screen::new(&self.sanitizer);
        let items: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with(r"\item"))
            .filter_map(|line| screen.text("bullets", line))
            .filter(|line| !line.is_empty())
            .take(max_items)
            .collect();

        if items.is_empty() {
            warn!("Bullet response had no \\item lines");
            return Err(ValidationError::NoBullets);
        }
        Ok(Validated {
            value: items,
            advisories: screen.finish(),
        })
    }
}

/// Collects sanitized field values and merges advisories per field.
struct Screen<'a> {
    sanitizer: &'a Sanitizer,
    advisories: Vec<Advisory>,
}

impl<'a> Screen<'a> {
    fn new(sanitizer: &'a Sanitizer) -> Self {
        Self {
            sanitizer,
            advisories: Vec::new(),
        }
    }

    /// Screens one model value. `None` means the sanitizer discarded a
    /// non-empty value; values it left untouched come back exactly as sent.
    fn text(&mut self, field: &str, value: &str) -> Option<String> {
        let sanitized = self.sanitizer.sanitize(value, InputRole::ModelOutput);
        if let Some(advisory) = sanitized.advisory(&format!("model_output.{field}")) {
            match self.advisories.iter_mut().find(|a| a.source == advisory.source) {
                Some(existing) => existing.merge(advisory),
                None => self.advisories.push(advisory),
            }
        }
        if sanitized.is_empty() && !value.trim().is_empty() {
            return None;
        }
        if !sanitized.flagged && !sanitized.truncated && sanitized.text == value.trim() {
            return Some(value.to_string());
        }
        Some(sanitized.text)
    }

    fn list(&mut self, field: &str, values: Vec<String>) -> Vec<String> {
        values
            .iter()
            .filter_map(|v| self.text(field, v))
            .take(MAX_ITEMS_PER_FIELD)
            .collect()
    }

    fn finish(self) -> Vec<Advisory> {
        self.advisories
    }
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, ValidationError> {
    let value = match serde_json::from_str::<Value>(strip_json_fences(raw)) {
        Ok(value) => value,
        Err(_) => {
            let block = outermost_object(raw).ok_or(ValidationError::NoStructuredBlock)?;
            debug!("Repairing model output by trimming surrounding prose");
            serde_json::from_str::<Value>(block)?
        }
    };
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ValidationError::NotAnObject),
    }
}

/// The span from the first `{` to the last `}`, if any.
fn outermost_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => map.get("text").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}

/// A list of strings; a bare string becomes a one-item list.
fn string_items(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn str_field(map: &Map<String, Value>, key: &str) -> String {
    map.get(key).and_then(scalar_text).unwrap_or_default()
}

/// `[{"section", "critique"}]`, also accepting bare strings and a
/// `{"Section": "critique"}` map.
fn critique_items(value: Option<&Value>) -> Vec<(String, String)> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some((str_field(map, "section"), str_field(map, "critique"))),
                other => scalar_text(other).map(|c| (String::new(), c)),
            })
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(section, critique)| scalar_text(critique).map(|c| (section.clone(), c)))
            .collect(),
        Some(Value::String(s)) => vec![(String::new(), s.clone())],
        _ => Vec::new(),
    }
}

/// `[{"original", "suggestion"}]`, also accepting bare strings as suggestions.
fn bullet_items(value: Option<&Value>) -> Vec<(String, String)> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(map) => {
                    Some((str_field(map, "original"), str_field(map, "suggestion")))
                }
                other => scalar_text(other).map(|s| (String::new(), s)),
            })
            .collect(),
        Some(Value::String(s)) => vec![(String::new(), s.clone())],
        _ => Vec::new(),
    }
}

fn answer_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(scalar_text)
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => scalar_text(other).unwrap_or_default(),
        None => String::new(),
    }
}
