use std::sync::Arc;

use crate::session::{Pipeline, SessionStore};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    /// The stateless toolchain, also used directly by the bullet generator.
    pub pipeline: Arc<Pipeline>,
}
