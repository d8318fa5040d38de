//! HTTP gateway for PowerNode.
//!
//! Exposes the chat endpoint, conversation read endpoints, the tool
//! catalog, a tool server connectivity test, and a health check.
//!
//! Built on Axum for high performance async HTTP. All collaborators
//! (provider, tool engine, store) are constructed once at startup and
//! shared via [`GatewayState`]; request handlers never build clients.

pub mod api;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware::{self, Next},
    response::Json,
    routing::get,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use powernode_agent::AgentService;
use powernode_config::AppConfig;
use powernode_core::provider::Provider;
use powernode_providers::AnthropicProvider;
use powernode_storage::{ConversationStore, store_from_config};
use powernode_telemetry::PricingTable;
use powernode_tools::ToolEngine;

/// Shared application state for the gateway. Immutable after startup;
/// the store and tool engine handle their own interior state.
pub struct GatewayState {
    pub agent: Arc<AgentService>,
    pub engine: Arc<ToolEngine>,
    pub store: Arc<dyn ConversationStore>,
    pub http: reqwest::Client,
    pub provider_name: String,
    pub auth_token: Option<String>,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
///
/// Security layers applied:
/// - Optional bearer token authentication (all routes except /health)
/// - CORS open to any origin (the API is consumed cross-origin)
/// - Request body size limit (2 MB — chat bodies carry history)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api::api_router(state.clone()))
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(middleware::from_fn_with_state(state, auth_middleware))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server and run it until ctrl-c.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = build_state(&config).await?;

    info!(
        addr = %addr,
        model = %config.provider.model,
        storage = %state.store.name(),
        tool_servers = state.engine.server_count(),
        "PowerNode gateway starting"
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wire up every component from the configuration. One HTTP client is
/// shared by the provider, the tool servers, and the Graph calls.
async fn build_state(config: &AppConfig) -> Result<SharedState, powernode_core::Error> {
    if !config.provider.enabled {
        return Err(powernode_core::Error::config(
            "provider is disabled in configuration",
        ));
    }
    let api_key = config.provider.api_key.clone().ok_or_else(|| {
        powernode_core::Error::config(
            "no AI provider is configured — set ANTHROPIC_API_KEY or provider.api_key",
        )
    })?;

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .map_err(|e| powernode_core::Error::Internal(format!("failed to build HTTP client: {e}")))?;

    let mut anthropic = AnthropicProvider::new(api_key).with_client(http.clone());
    if let Some(base) = &config.provider.base_url {
        anthropic = anthropic.with_base_url(base);
    }
    let provider: Arc<dyn Provider> = Arc::new(anthropic);

    let engine = Arc::new(ToolEngine::new(
        http.clone(),
        &config.tool_servers,
        &config.onedrive,
        config.limits,
    ));

    let agent = Arc::new(AgentService::new(
        provider.clone(),
        engine.clone(),
        Arc::new(PricingTable::with_defaults()),
        &config.provider,
        &config.limits,
    ));

    let store = store_from_config(&config.storage).await?;
    info!(backend = %store.name(), "Conversation store ready");

    Ok(Arc::new(GatewayState {
        agent,
        engine,
        store,
        http,
        provider_name: provider.name().to_string(),
        auth_token: config.server.auth_token.clone(),
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received, stopping gateway");
}

/// Bearer token authentication.
///
/// Active only when `server.auth_token` is configured. The /health
/// endpoint stays open so monitoring can poll it.
async fn auth_middleware(
    State(state): State<SharedState>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    let Some(expected) = state.auth_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let provided = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(next.run(req).await),
        _ => {
            warn!(path = %req.uri().path(), "Unauthorized request — missing or invalid bearer token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "powernode",
        version: env!("CARGO_PKG_VERSION"),
    })
}
