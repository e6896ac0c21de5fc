//! Input Sanitizer: screens untrusted text before it reaches the model, and the
//! model's own output before it reaches the user.
//!
//! Layers, applied in order until the text stops changing:
//! 1. normalisation (NFKC folding, invisible/bidi control characters, line endings)
//! 2. structural stripping of anything that mimics the prompt's segment delimiters
//! 3. the injection denylist
//! 4. directive-leak screening (model output only)
//! 5. role-specific length truncation
//!
//! Matched spans are replaced with a placeholder, never deleted. Sanitizing is
//! idempotent on the cleaned text and never fails: the worst case is an empty,
//! flagged result.

pub mod patterns;

use regex::{Captures, Regex};
use unicode_normalization::UnicodeNormalization;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::SanitizerConfig;
use patterns::{leak_fragment_pattern, leak_fragments, DEFAULT_DENYLIST, STRUCTURAL_PATTERNS};

/// Upper bound on replace rounds within one pass. Replacement inserts a barrier,
/// so real input settles in one or two rounds.
const MAX_REPLACE_ROUNDS: usize = 8;
/// Upper bound on replace→truncate cycles.
const MAX_PASSES: usize = 4;

#[derive(Debug, Error)]
pub enum SanitizerError {
    #[error("invalid pattern '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("pattern '{0}' matches the empty string")]
    MatchesEmpty(String),

    #[error("the denylist is empty")]
    EmptyDenylist,

    #[error("placeholder must be non-empty and must not match any pattern (matched '{0}')")]
    UnsafePlaceholder(String),
}

/// Where a piece of text came from. Drives the length cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputRole {
    Resume,
    JobDescription,
    FollowupQuestion,
    BulletDescription,
    ModelOutput,
}

/// Which defense layer produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLayer {
    Structural,
    Denylist,
    DirectiveLeak,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern: String,
    pub layer: MatchLayer,
}

/// Text after screening. `matches` records one entry per replaced span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizedText {
    pub text: String,
    pub role: InputRole,
    pub flagged: bool,
    pub matches: Vec<PatternMatch>,
    pub truncated: bool,
}

impl SanitizedText {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Distinct pattern names, in first-seen order.
    pub fn pattern_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for m in &self.matches {
            if !names.contains(&m.pattern) {
                names.push(m.pattern.clone());
            }
        }
        names
    }

    /// A user-facing note when screening changed the text, `None` otherwise.
    pub fn advisory(&self, source: &str) -> Option<Advisory> {
        (self.flagged || self.truncated).then(|| Advisory {
            source: source.to_string(),
            role: self.role,
            patterns: self.pattern_names(),
            truncated: self.truncated,
        })
    }
}

/// Tells the caller that part of their input (or of the model's output) was
/// neutralised or cut. Only pattern names are reported, never matched text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub source: String,
    pub role: InputRole,
    pub patterns: Vec<String>,
    pub truncated: bool,
}

impl Advisory {
    pub fn merge(&mut self, other: Advisory) {
        for pattern in other.patterns {
            if !self.patterns.contains(&pattern) {
                self.patterns.push(pattern);
            }
        }
        self.truncated |= other.truncated;
    }
}

/// Per-role maximum length, in characters.
#[derive(Debug, Clone, Copy)]
pub struct RoleCaps {
    pub resume: usize,
    pub job_description: usize,
    pub followup_question: usize,
    pub bullet_description: usize,
    pub model_output: usize,
}

impl RoleCaps {
    pub fn for_role(&self, role: InputRole) -> usize {
        match role {
            InputRole::Resume => self.resume,
            InputRole::JobDescription => self.job_description,
            InputRole::FollowupQuestion => self.followup_question,
            InputRole::BulletDescription => self.bullet_description,
            InputRole::ModelOutput => self.model_output,
        }
    }
}

impl From<&SanitizerConfig> for RoleCaps {
    fn from(config: &SanitizerConfig) -> Self {
        Self {
            resume: config.max_resume_chars,
            job_description: config.max_job_description_chars,
            followup_question: config.max_question_chars,
            bullet_description: config.max_bullet_description_chars,
            model_output: config.max_model_field_chars,
        }
    }
}

#[derive(Debug)]
struct NamedPattern {
    name: String,
    layer: MatchLayer,
    regex: Regex,
}

impl NamedPattern {
    fn compile(name: &str, source: &str, layer: MatchLayer) -> Result<Self, SanitizerError> {
        let regex = Regex::new(source).map_err(|source| SanitizerError::InvalidPattern {
            name: name.to_string(),
            source,
        })?;
        if regex.is_match("") {
            return Err(SanitizerError::MatchesEmpty(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            layer,
            regex,
        })
    }
}

/// Stateless, shareable sanitizer. Build once at start-up.
#[derive(Debug)]
pub struct Sanitizer {
    structural: Vec<NamedPattern>,
    denylist: Vec<NamedPattern>,
    leaks: Vec<NamedPattern>,
    placeholder: String,
    caps: RoleCaps,
}

impl Sanitizer {
    /// Builds a sanitizer from the default pattern sets plus configured extras.
    /// `protected_directives` is static prompt text the model must never echo back.
    pub fn new(config: &SanitizerConfig, protected_directives: &[&str]) -> Result<Self, SanitizerError> {
        let mut denylist: Vec<(String, String)> = DEFAULT_DENYLIST
            .iter()
            .map(|(n, p)| (n.to_string(), p.to_string()))
            .collect();
        denylist.extend(
            config
                .extra_patterns
                .iter()
                .enumerate()
                .map(|(i, p)| (format!("custom_{}", i + 1), p.clone())),
        );
        Self::with_patterns(config, denylist, protected_directives)
    }

    /// Builds a sanitizer with an explicit denylist (structural patterns always apply).
    pub fn with_patterns(
        config: &SanitizerConfig,
        denylist: Vec<(String, String)>,
        protected_directives: &[&str],
    ) -> Result<Self, SanitizerError> {
        if denylist.is_empty() {
            return Err(SanitizerError::EmptyDenylist);
        }

        let structural = STRUCTURAL_PATTERNS
            .iter()
            .map(|(n, p)| NamedPattern::compile(n, p, MatchLayer::Structural))
            .collect::<Result<Vec<_>, _>>()?;
        let denylist = denylist
            .iter()
            .map(|(n, p)| NamedPattern::compile(n, p, MatchLayer::Denylist))
            .collect::<Result<Vec<_>, _>>()?;

        let mut leaks = Vec::new();
        for directive in protected_directives {
            for fragment in leak_fragments(directive) {
                leaks.push(NamedPattern::compile(
                    "directive_leak",
                    &leak_fragment_pattern(&fragment),
                    MatchLayer::DirectiveLeak,
                )?);
            }
        }

        let placeholder = config.placeholder.trim().to_string();
        if placeholder.is_empty() {
            return Err(SanitizerError::UnsafePlaceholder(String::new()));
        }
        if let Some(hit) = structural
            .iter()
            .chain(&denylist)
            .chain(&leaks)
            .find(|p| p.regex.is_match(&placeholder))
        {
            return Err(SanitizerError::UnsafePlaceholder(hit.name.clone()));
        }

        Ok(Self {
            structural,
            denylist,
            leaks,
            placeholder,
            caps: RoleCaps::from(config),
        })
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    pub fn cap_for(&self, role: InputRole) -> usize {
        self.caps.for_role(role)
    }

    /// Screens `text` for the given role. Never fails.
    pub fn sanitize(&self, text: &str, role: InputRole) -> SanitizedText {
        let cap = self.caps.for_role(role);
        let mut current = normalize(text);
        let mut matches = Vec::new();
        let mut truncated = false;

        for _ in 0..MAX_PASSES {
            current = match self.replace_until_stable(&current, role, &mut matches) {
                Some(next) => next,
                None => break,
            };

            if current.chars().count() <= cap {
                if !matches.is_empty() {
                    warn!(
                        role = ?role,
                        patterns = ?dedup_names(&matches),
                        "Sanitizer replaced {} suspicious span(s)",
                        matches.len()
                    );
                }
                return SanitizedText {
                    flagged: !matches.is_empty(),
                    text: current,
                    role,
                    matches,
                    truncated,
                };
            }

            current = truncate_at_boundary(&current, cap);
            truncated = true;
        }

        warn!(role = ?role, "Sanitizer did not reach a stable result; discarding text");
        SanitizedText {
            text: String::new(),
            role,
            flagged: true,
            matches,
            truncated,
        }
    }

    /// Replaces every pattern hit with the placeholder until no pattern matches.
    /// Returns `None` if the text is still changing after the round limit.
    fn replace_until_stable(
        &self,
        text: &str,
        role: InputRole,
        matches: &mut Vec<PatternMatch>,
    ) -> Option<String> {
        let leaks: &[NamedPattern] = if role == InputRole::ModelOutput {
            &self.leaks
        } else {
            &[]
        };

        let mut current = text.to_string();
        for _ in 0..MAX_REPLACE_ROUNDS {
            let mut changed = false;
            for pattern in self.structural.iter().chain(&self.denylist).chain(leaks) {
                let hits = pattern
                    .regex
                    .captures_iter(&current)
                    .filter(|caps| !is_kept(caps))
                    .count();
                if hits == 0 {
                    continue;
                }
                matches.extend((0..hits).map(|_| PatternMatch {
                    pattern: pattern.name.clone(),
                    layer: pattern.layer,
                }));
                current = pattern
                    .regex
                    .replace_all(&current, |caps: &Captures| {
                        if is_kept(caps) {
                            caps[0].to_string()
                        } else {
                            self.placeholder.clone()
                        }
                    })
                    .into_owned();
                changed = true;
            }
            if !changed {
                return Some(current);
            }
        }
        None
    }
}

/// A hit on a pattern's `keep` group is benign text the pattern must not touch.
fn is_kept(caps: &Captures) -> bool {
    caps.name("keep").is_some()
}

fn dedup_names(matches: &[PatternMatch]) -> Vec<&str> {
    let mut names: Vec<&str> = matches.iter().map(|m| m.pattern.as_str()).collect();
    names.dedup();
    names
}

fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{2069}'
            | '\u{FEFF}'
    )
}

/// Folds compatibility forms (NFKC, so fullwidth and styled letters become
/// plain ones), drops invisible formatting characters and control characters
/// (except newline and tab), unifies line endings and trims.
fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let cleaned: String = unified
        .nfkc()
        .filter(|&c| !is_invisible(c))
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect();
    cleaned.trim().to_string()
}

/// Cuts to at most `cap` characters, preferring the last whitespace boundary so
/// no word is split.
fn truncate_at_boundary(text: &str, cap: usize) -> String {
    let Some((cut, next)) = text.char_indices().nth(cap) else {
        return text.to_string();
    };
    let head = &text[..cut];
    let head = if next.is_whitespace() {
        head
    } else {
        match head.rfind(char::is_whitespace) {
            Some(pos) => &head[..pos],
            None => head,
        }
    };
    head.trim_end().to_string()
}
