pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::bullets::handlers::handle_generate_bullets;
use crate::session::handlers;
use crate::state::AppState;
use crate::template::handle_get_template;

pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Session API
        .route("/api/v1/sessions", post(handlers::handle_create_session))
        .route(
            "/api/v1/sessions/:id",
            get(handlers::handle_get_session).delete(handlers::handle_delete_session),
        )
        .route(
            "/api/v1/sessions/:id/resume",
            post(handlers::handle_upload_resume),
        )
        .route(
            "/api/v1/sessions/:id/job-description",
            post(handlers::handle_add_job_description),
        )
        .route(
            "/api/v1/sessions/:id/questions",
            post(handlers::handle_ask_question),
        )
        .route("/api/v1/sessions/:id/retry", post(handlers::handle_retry))
        // Stateless tools
        .route("/api/v1/bullets", post(handle_generate_bullets))
        .route("/api/v1/template", get(handle_get_template))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}
