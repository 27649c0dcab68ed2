//! WebSocket gateway for kbchat.
//!
//! Exposes:
//!
//! - `GET /ws`: one streamed chat exchange per connection
//! - `GET /health`: liveness check
//!
//! Built on Axum. Everything a connection needs is assembled once at
//! start-up and shared through [`GatewayState`].

pub mod encoder;
pub mod persist;
pub mod ws;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, header};
use axum::{Router, response::Json, routing::get};
use kbchat_agent::{AgentConfig, AgentLoop, build_system_prompt};
use kbchat_config::AppConfig;
use kbchat_core::error::Error;
use kbchat_core::services::{StaticTokenVerifier, TokenVerifier};
use kbchat_core::session::SessionStore;
use kbchat_tools::{Collaborators, build_registry};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub agent: AgentLoop,
    /// `None` disables persistence
    pub sessions: Option<Arc<dyn SessionStore>>,
    pub verifier: Arc<dyn TokenVerifier>,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Assemble the per-process state from configuration: provider, tools,
/// system prompt, session store and token check.
pub async fn build_state(config: &AppConfig) -> Result<GatewayState, Error> {
    let provider = kbchat_providers::build_provider(&config.provider)?;
    let collaborators = Collaborators::from_config(config)?;
    let registry = build_registry(&collaborators);
    let adapter =
        kbchat_providers::build_adapter(provider, &config.provider, registry.definitions());

    let base_prompt = config.base_system_prompt().map_err(|e| Error::Config {
        message: e.to_string(),
    })?;
    let system_prompt = build_system_prompt(&base_prompt, collaborators.metadata.as_deref()).await;

    let agent_config = AgentConfig::new(system_prompt, adapter, Arc::new(registry))
        .with_settings(&config.agent);
    info!(
        model = %config.provider.model,
        tools = ?agent_config.tools.names(),
        max_iterations = agent_config.max_iterations,
        "Agent configured"
    );

    let sessions = if config.gateway.persist_sessions {
        Some(kbchat_memory::open_store(&config.sessions).await?)
    } else {
        None
    };

    Ok(GatewayState {
        agent: AgentLoop::new(Arc::new(agent_config)),
        sessions,
        verifier: Arc::new(StaticTokenVerifier::new(config.gateway.bearer_tokens.clone())),
    })
}

/// Serve the gateway on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, state: SharedState) -> Result<(), Error> {
    let app = build_router(state);
    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Internal(format!("server error: {e}")))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Error> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(build_state(&config).await?);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Internal(format!("cannot bind {addr}: {e}")))?;
    info!(addr = %addr, "Gateway listening");
    serve(listener, state).await
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use kbchat_core::tool::ToolRegistry;
    use kbchat_providers::{ModelAdapter, ScriptedProvider};
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let adapter = ModelAdapter::new(Arc::new(ScriptedProvider::new(vec![])), "test");
        let config = AgentConfig::new("prompt", adapter, Arc::new(ToolRegistry::new()));
        Arc::new(GatewayState {
            agent: AgentLoop::new(Arc::new(config)),
            sessions: None,
            verifier: Arc::new(StaticTokenVerifier::new(vec![])),
        })
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state());
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let app = build_router(test_state());
        let req = Request::builder().uri("/v1/chat").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn build_state_requires_api_key() {
        let config = AppConfig::default();
        assert!(build_state(&config).await.is_err());
    }
}
