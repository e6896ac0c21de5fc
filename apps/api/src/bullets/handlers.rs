use axum::{extract::State, Json};
use serde::Deserialize;

use super::{generate_latex_bullets, LatexBullets};
use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BulletRequest {
    pub description: String,
}

/// POST /api/v1/bullets
///
/// Rewrites a described accomplishment into up to three LaTeX `\item` lines.
pub async fn handle_generate_bullets(
    State(state): State<AppState>,
    Json(request): Json<BulletRequest>,
) -> Result<Json<LatexBullets>, AppError> {
    let bullets = generate_latex_bullets(&state.pipeline, &request.description).await?;
    Ok(Json(bullets))
}
