use serde::{Deserialize, Serialize};

/// Keys of the feedback object, in output-contract order.
pub const FEEDBACK_FIELDS: [&str; 6] = [
    "strengths",
    "weaknesses",
    "section_critiques",
    "ats_notes",
    "suggested_bullets",
    "answer",
];

/// Validated, schema-conforming feedback for one turn.
///
/// Every field is always present; sections the model omitted are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackResult {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub section_critiques: Vec<SectionCritique>,
    pub ats_notes: Vec<String>,
    pub suggested_bullets: Vec<SuggestedBullet>,
    /// Answer to a follow-up question; empty on analysis and tailoring turns.
    pub answer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionCritique {
    pub section: String,
    pub critique: String,
}

/// A rewritten bullet. `original` is empty when the suggestion is new material.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedBullet {
    pub original: String,
    pub suggestion: String,
}

impl FeedbackResult {
    pub fn is_empty(&self) -> bool {
        self.strengths.is_empty()
            && self.weaknesses.is_empty()
            && self.section_critiques.is_empty()
            && self.ats_notes.is_empty()
            && self.suggested_bullets.is_empty()
            && self.answer.is_empty()
    }

    /// Rough rendered size, used to bound conversation history.
    pub fn char_len(&self) -> usize {
        let lists: usize = self
            .strengths
            .iter()
            .chain(&self.weaknesses)
            .chain(&self.ats_notes)
            .map(|s| s.chars().count())
            .sum();
        let critiques: usize = self
            .section_critiques
            .iter()
            .map(|c| c.section.chars().count() + c.critique.chars().count())
            .sum();
        let bullets: usize = self
            .suggested_bullets
            .iter()
            .map(|b| b.original.chars().count() + b.suggestion.chars().count())
            .sum();
        lists + critiques + bullets + self.answer.chars().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_keys_match_contract() {
        let json = serde_json::to_value(FeedbackResult::default()).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        let mut expected = FEEDBACK_FIELDS.to_vec();
        expected.sort_unstable();
        let mut actual = keys.clone();
        actual.sort_unstable();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_char_len_counts_every_field() {
        let feedback = FeedbackResult {
            strengths: vec!["ab".into()],
            weaknesses: vec!["c".into()],
            section_critiques: vec![SectionCritique {
                section: "de".into(),
                critique: "f".into(),
            }],
            ats_notes: vec!["g".into()],
            suggested_bullets: vec![SuggestedBullet {
                original: "h".into(),
                suggestion: "ij".into(),
            }],
            answer: "k".into(),
        };
        assert_eq!(feedback.char_len(), 11);
        assert!(!feedback.is_empty());
        assert!(FeedbackResult::default().is_empty());
    }
}
