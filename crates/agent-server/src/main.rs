//! Chat agent HTTP Server
//!
//! Axum-based server exposing the streaming chat protocol. Replies are
//! produced by the reasoning loop over the configured LLM provider, with the
//! math tools (Add, Subtract, Multiply, Divide) available to the model.

mod config;
mod handlers;
mod state;
mod stream;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{LlmProvider, ToolRegistry, math::register_math_tools};
use agent_runtime::{OllamaProvider, OpenAiProvider};

use crate::config::{ProviderKind, ServerConfig};
use crate::handlers::{chat_handler, chat_stream_handler, health_check, list_models};
use crate::state::AppState;

/// Routes and middleware; shared by `main` and the handler tests
pub(crate) fn build_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health_check))
        .route("/api/models", get(list_models))
        // Chat protocol
        .route("/agent/chat", post(chat_handler))
        .route("/agent/chat/stream", post(chat_stream_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();
    let config = ServerConfig::from_env()?;

    // Initialize LLM provider
    let provider: Arc<dyn LlmProvider> = match config.provider {
        ProviderKind::Ollama => Arc::new(OllamaProvider::from_env()),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::from_env()?),
    };

    match provider.health_check().await {
        Ok(true) => {
            tracing::info!(provider = ?config.provider, model = %config.model, "✓ Provider reachable");
        }
        Ok(false) | Err(_) => {
            tracing::warn!(provider = ?config.provider, "⚠ Provider not reachable - chat requests will fail");
        }
    }

    // Initialize tools
    let mut tools = ToolRegistry::new().with_timeout(config.tool_timeout);
    register_math_tools(&mut tools)?;

    tracing::info!("Registered {} tools:", tools.len());
    for name in tools.names() {
        tracing::info!("  • {}", name);
    }

    let orchestrator = config
        .agent_builder()
        .provider(provider)
        .tools(Arc::new(tools))
        .build()?;

    let app = build_router(AppState::new(orchestrator));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 chat agent running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  POST /agent/chat/stream - Streaming chat (application/jsonl)");
    tracing::info!("  POST /agent/chat        - Chat, single JSON reply");
    tracing::info!("  GET  /health            - Health check");
    tracing::info!("  GET  /api/models        - List available models");

    axum::serve(listener, app).await?;

    Ok(())
}
