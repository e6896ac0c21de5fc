use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::feedback::schema::FeedbackResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    Analysis,
    Tailoring,
    Followup,
}

/// One completed exchange. `question` is the sanitized follow-up text, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub kind: TurnKind,
    pub question: Option<String>,
    pub feedback: FeedbackResult,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn new(kind: TurnKind, question: Option<String>, feedback: FeedbackResult) -> Self {
        Self {
            kind,
            question,
            feedback,
            at: Utc::now(),
        }
    }

    fn char_len(&self) -> usize {
        self.question.as_deref().map_or(0, |q| q.chars().count()) + self.feedback.char_len()
    }
}

/// Bounded conversation history. Only validated turns are ever pushed; the
/// oldest turns are evicted first when either bound is exceeded.
#[derive(Debug, Clone)]
pub struct ConversationState {
    turns: VecDeque<Turn>,
    max_turns: usize,
    max_chars: usize,
    chars: usize,
}

impl ConversationState {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns: config.history_max_turns.max(1),
            max_chars: config.history_max_chars,
            chars: 0,
        }
    }

    /// Appends a turn, evicting from the front until both bounds hold. The
    /// newest turn is always kept.
    pub fn push(&mut self, turn: Turn) {
        self.chars += turn.char_len();
        self.turns.push_back(turn);
        while self.turns.len() > 1
            && (self.turns.len() > self.max_turns || self.chars > self.max_chars)
        {
            if let Some(evicted) = self.turns.pop_front() {
                self.chars -= evicted.char_len();
            }
        }
    }

    /// Oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.back()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.chars = 0;
    }
}
