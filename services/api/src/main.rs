mod config;
mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use viva_core::engine::{EngineConfig, VivaEngine};
use viva_core::openai::OpenAiProvider;
use viva_core::store::MemoryStore;

use crate::config::Config;
use crate::routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    let provider = OpenAiProvider::new(config.openai_api_key.clone(), config.chat_model.clone());
    let engine = VivaEngine::new(
        provider,
        MemoryStore::new(),
        EngineConfig::new(config.max_questions, config.provider_timeout),
    );
    let state: AppState = Arc::new(engine);

    // Permissive CORS so a separate frontend can reach the API.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/viva/sessions", post(routes::create_session))
        .route("/api/v1/viva/sessions/{id}", get(routes::get_session))
        .route(
            "/api/v1/viva/sessions/{id}/start",
            post(routes::start_session),
        )
        .route(
            "/api/v1/viva/sessions/{id}/respond",
            post(routes::submit_response),
        )
        .route(
            "/api/v1/viva/sessions/{id}/media",
            put(routes::attach_media),
        )
        .route(
            "/api/v1/viva/sessions/{id}/turns/{index}/transcript",
            put(routes::attach_transcript),
        )
        .route(
            "/api/v1/viva/practice-questions",
            post(routes::practice_questions),
        )
        .layer(cors)
        .with_state(state);

    info!("Starting viva API server, listening on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
