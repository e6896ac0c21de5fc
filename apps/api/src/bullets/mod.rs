//! LaTeX bullet generator: rewrites a free-text accomplishment into `\item`
//! lines. Same defenses as a feedback turn, without any session state.

pub mod handlers;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::errors::{AppError, ErrorKind};
use crate::prompt::assembler::AssembleError;
use crate::sanitizer::{Advisory, InputRole};
use crate::session::Pipeline;

/// Bullets requested from the model and the most kept from its answer.
pub const MAX_BULLETS: usize = 3;

#[derive(Debug, Error)]
pub enum BulletError {
    #[error("Describe an accomplishment to turn into bullets")]
    EmptyDescription,

    #[error("bullet generation failed: {0:?}")]
    Failed(ErrorKind),
}

impl From<BulletError> for AppError {
    fn from(err: BulletError) -> Self {
        match err {
            BulletError::EmptyDescription => AppError::Validation(err.to_string()),
            BulletError::Failed(kind) => AppError::Pipeline(kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatexBullets {
    pub items: Vec<String>,
    /// `items` joined with newlines, ready to paste inside an `itemize`.
    pub latex: String,
    pub advisories: Vec<Advisory>,
}

pub async fn generate_latex_bullets(
    pipeline: &Pipeline,
    description: &str,
) -> Result<LatexBullets, BulletError> {
    let description = pipeline
        .sanitizer
        .sanitize(description, InputRole::BulletDescription);
    if description.is_empty() {
        return Err(BulletError::EmptyDescription);
    }

    let payload = pipeline
        .assembler
        .assemble_bullets(&description)
        .map_err(|e| match e {
            AssembleError::PayloadTooLarge { .. } => BulletError::Failed(ErrorKind::PayloadTooLarge),
            AssembleError::Serialize(_) => BulletError::Failed(ErrorKind::SchemaViolation),
        })?;

    let response = pipeline.client.complete(&payload).await.map_err(|e| {
        warn!("Bullet generation: {e}");
        BulletError::Failed(e.kind())
    })?;

    let validated = pipeline
        .validator
        .validate_latex_bullets(&response, MAX_BULLETS)
        .map_err(|e| {
            warn!("Bullet generation: model output rejected: {e}");
            BulletError::Failed(e.kind())
        })?;

    let mut advisories: Vec<Advisory> = description.advisory("bullet_description").into_iter().collect();
    advisories.extend(validated.advisories);
    info!(
        "Generated {} LaTeX bullet(s) after {} attempt(s)",
        validated.value.len(),
        response.attempts
    );

    Ok(LatexBullets {
        latex: validated.value.join("\n"),
        items: validated.value,
        advisories,
    })
}
