//! Axum route handlers for the Session API.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::conversation::{Turn, TurnKind};
use super::orchestrator::{JobDescriptionInput, Session, TurnOutcome};
use super::state::SessionState;
use crate::errors::{AppError, ErrorKind};
use crate::extraction::{Document, ExtractionError};
use crate::feedback::FeedbackResult;
use crate::sanitizer::Advisory;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub session_id: Uuid,
    pub state: &'static str,
    pub kind: TurnKind,
    pub feedback: FeedbackResult,
    pub advisories: Vec<Advisory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    pub attempts: u32,
}

impl TurnResponse {
    fn new(session: &Session, outcome: TurnOutcome) -> Self {
        let notice = outcome
            .advisories
            .iter()
            .any(|a| !a.patterns.is_empty())
            .then(|| ErrorKind::InjectionDetected.to_string());
        Self {
            session_id: session.id(),
            state: session.state().name(),
            kind: outcome.kind,
            feedback: outcome.feedback,
            advisories: outcome.advisories,
            notice,
            attempts: outcome.attempts,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub state: SessionState,
    pub has_resume: bool,
    pub turn_count: usize,
    pub advisories: Vec<Advisory>,
    pub history: Vec<Turn>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionRequest {
    pub question: String,
}

/// One multipart part: a file or a plain text field.
struct Part {
    bytes: Bytes,
    content_type: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

async fn find_session(state: &AppState, id: Uuid) -> Result<Arc<Mutex<Session>>, AppError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Session {id} not found")))
}

async fn read_parts(mut multipart: Multipart) -> Result<HashMap<String, Part>, AppError> {
    let mut parts = HashMap::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read upload: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Failed to read field '{name}': {e}")))?;
        parts.insert(
            name,
            Part {
                bytes,
                content_type,
            },
        );
    }
    Ok(parts)
}

fn to_document(part: Part) -> Result<Document, AppError> {
    Document::from_upload(part.bytes, part.content_type.as_deref()).map_err(|e| match e {
        ExtractionError::UnsupportedFormat => AppError::Validation(
            "unsupported document type (upload a PDF, PNG, JPEG or plain-text file)".to_string(),
        ),
        other => AppError::Pipeline(other.kind()),
    })
}

fn text_part(part: &Part) -> Option<String> {
    std::str::from_utf8(&part.bytes)
        .ok()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
}

/// A job description from either a file part or a text part.
fn job_description(
    parts: &mut HashMap<String, Part>,
    file_field: &str,
    text_field: &str,
) -> Result<Option<JobDescriptionInput>, AppError> {
    if let Some(part) = parts.remove(file_field).filter(|p| !p.bytes.is_empty()) {
        return Ok(Some(JobDescriptionInput::Document(to_document(part)?)));
    }
    Ok(parts
        .get(text_field)
        .and_then(text_part)
        .map(JobDescriptionInput::Text))
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/sessions
pub async fn handle_create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), AppError> {
    let session_id = state
        .sessions
        .create()
        .await
        .map_err(|e| AppError::Unavailable(format!("{e}; try again later")))?;
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_id })))
}

/// GET /api/v1/sessions/:id
pub async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let session = find_session(&state, id).await?;
    let session = session.lock().await;
    Ok(Json(SessionView {
        session_id: session.id(),
        state: session.state().clone(),
        has_resume: session.has_resume(),
        turn_count: session.history().len(),
        advisories: session.last_advisories().to_vec(),
        history: session.history().turns().cloned().collect(),
    }))
}

/// DELETE /api/v1/sessions/:id
pub async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.sessions.remove(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Session {id} not found")))
    }
}

/// POST /api/v1/sessions/:id/resume
///
/// Multipart: `file` (required), plus an optional `job_description_file` or
/// `job_description` text. Runs the initial analysis (or tailoring) turn.
pub async fn handle_upload_resume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<TurnResponse>, AppError> {
    let session = find_session(&state, id).await?;
    let mut parts = read_parts(multipart).await?;

    let resume = parts
        .remove("file")
        .ok_or_else(|| AppError::Validation("A resume 'file' field is required".to_string()))?;
    let resume = to_document(resume)?;
    let jd = job_description(&mut parts, "job_description_file", "job_description")?;

    let mut session = session.lock().await;
    let outcome = session.analyze(resume, jd).await?;
    Ok(Json(TurnResponse::new(&session, outcome)))
}

/// POST /api/v1/sessions/:id/job-description
///
/// Multipart: `file` or `text`. Runs a tailoring turn against the stored resume.
pub async fn handle_add_job_description(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<TurnResponse>, AppError> {
    let session = find_session(&state, id).await?;
    let mut parts = read_parts(multipart).await?;
    let jd = job_description(&mut parts, "file", "text")?.ok_or_else(|| {
        AppError::Validation("Provide a job description as 'file' or 'text'".to_string())
    })?;

    let mut session = session.lock().await;
    let outcome = session.tailor(jd).await?;
    Ok(Json(TurnResponse::new(&session, outcome)))
}

/// POST /api/v1/sessions/:id/questions
pub async fn handle_ask_question(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<QuestionRequest>,
) -> Result<Json<TurnResponse>, AppError> {
    if request.question.trim().is_empty() {
        return Err(AppError::Validation("question cannot be empty".to_string()));
    }
    let session = find_session(&state, id).await?;
    let mut session = session.lock().await;
    let outcome = session.ask(&request.question).await?;
    Ok(Json(TurnResponse::new(&session, outcome)))
}

/// POST /api/v1/sessions/:id/retry
///
/// Re-runs the last failed turn from assembly; the upload is not re-read.
pub async fn handle_retry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TurnResponse>, AppError> {
    let session = find_session(&state, id).await?;
    let mut session = session.lock().await;
    let outcome = session.retry().await?;
    Ok(Json(TurnResponse::new(&session, outcome)))
}
