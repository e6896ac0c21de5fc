use axum::{
    http::header,
    response::{IntoResponse, Response},
};

/// Classic single-column LaTeX resume template, served byte-for-byte.
pub const RESUME_TEMPLATE: &str = include_str!("../../assets/resume_template.tex");

const FILENAME: &str = "resume_template.tex";

/// GET /api/v1/template
pub async fn handle_get_template() -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/x-tex; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{FILENAME}\""),
            ),
        ],
        RESUME_TEMPLATE,
    )
        .into_response()
}
