use serde::Serialize;

use crate::errors::ErrorKind;
use crate::feedback::schema::FeedbackResult;

/// Pipeline step a turn can fail in, and the step a retry resumes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extracting,
    Sanitizing,
    Assembling,
    AwaitingModel,
    Validating,
}

/// Session lifecycle:
/// `Idle → Extracting → Sanitizing → Assembling → AwaitingModel → Validating → Ready`,
/// with `Ready → AnsweringFollowup → Assembling → … → Ready` for follow-ups and
/// `Failed` reachable from every step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Extracting,
    Sanitizing,
    Assembling,
    AwaitingModel,
    Validating,
    Ready { feedback: FeedbackResult },
    AnsweringFollowup,
    Failed {
        kind: ErrorKind,
        failed_at: Stage,
        /// Where a retry picks up; `None` means the caller must supply new input.
        retry_from: Option<Stage>,
    },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Extracting => "extracting",
            SessionState::Sanitizing => "sanitizing",
            SessionState::Assembling => "assembling",
            SessionState::AwaitingModel => "awaiting_model",
            SessionState::Validating => "validating",
            SessionState::Ready { .. } => "ready",
            SessionState::AnsweringFollowup => "answering_followup",
            SessionState::Failed { .. } => "failed",
        }
    }

    /// A turn was started and never reached `Ready` or `Failed` (the caller went away).
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            SessionState::Extracting
                | SessionState::Sanitizing
                | SessionState::Assembling
                | SessionState::AwaitingModel
                | SessionState::Validating
                | SessionState::AnsweringFollowup
        )
    }

    pub fn failure_for(kind: ErrorKind, failed_at: Stage) -> Self {
        let retry_from = match kind {
            ErrorKind::BackendUnavailable | ErrorKind::SchemaViolation => Some(Stage::Assembling),
            _ => None,
        };
        SessionState::Failed {
            kind,
            failed_at,
            retry_from,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_failures_retry_from_assembly() {
        let state = SessionState::failure_for(ErrorKind::BackendUnavailable, Stage::AwaitingModel);
        assert!(matches!(
            state,
            SessionState::Failed {
                retry_from: Some(Stage::Assembling),
                ..
            }
        ));
        let state = SessionState::failure_for(ErrorKind::EmptyDocument, Stage::Extracting);
        assert!(matches!(state, SessionState::Failed { retry_from: None, .. }));
    }

    #[test]
    fn test_serializes_with_state_tag() {
        let json = serde_json::to_value(SessionState::failure_for(
            ErrorKind::SchemaViolation,
            Stage::Validating,
        ))
        .unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["kind"], "SCHEMA_VIOLATION");
        assert_eq!(json["failed_at"], "validating");
        assert_eq!(serde_json::to_value(SessionState::Idle).unwrap()["state"], "idle");
        assert!(SessionState::AwaitingModel.is_in_flight());
        assert!(!SessionState::Idle.is_in_flight());
    }
}
