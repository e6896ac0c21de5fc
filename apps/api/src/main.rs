mod bullets;
mod config;
mod errors;
mod extraction;
mod feedback;
mod llm_client;
mod prompt;
mod routes;
mod sanitizer;
mod session;
mod state;
mod template;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::extraction::DocumentExtractor;
use crate::feedback::ResponseValidator;
use crate::llm_client::ModelClient;
use crate::prompt::{protected_directives, PromptAssembler};
use crate::routes::build_router;
use crate::sanitizer::{InputRole, Sanitizer};
use crate::session::{Pipeline, SessionStore};
use crate::state::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Weaver API v{}", env!("CARGO_PKG_VERSION"));

    // The sanitizer also screens model output for echoes of these directives.
    let sanitizer = Arc::new(
        Sanitizer::new(&config.sanitizer, &protected_directives())
            .context("Invalid sanitizer configuration")?,
    );
    info!(
        "Sanitizer ready ({} extra pattern(s), placeholder {:?}, resume cap {} chars)",
        config.sanitizer.extra_patterns.len(),
        sanitizer.placeholder(),
        sanitizer.cap_for(InputRole::Resume)
    );

    let client = ModelClient::from_config(&config.model)?;

    let assembler = PromptAssembler::new(&config.prompt);
    info!("Prompt budget: {} chars", assembler.max_chars());

    let pipeline = Arc::new(Pipeline {
        extractor: Arc::new(DocumentExtractor::from_config(&config.ocr)),
        sanitizer: sanitizer.clone(),
        assembler,
        client,
        validator: ResponseValidator::new(sanitizer),
    });

    let sessions = Arc::new(SessionStore::new(pipeline.clone(), config.session.clone()));
    let _sweeper = sessions.spawn_sweeper(SWEEP_INTERVAL);
    info!(
        "Session store: idle TTL {}s, max {} sessions",
        config.session.idle_ttl.as_secs(),
        config.session.max_sessions
    );

    let state = AppState { sessions, pipeline };

    let app = build_router(state, config.max_upload_bytes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the web client's host is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
