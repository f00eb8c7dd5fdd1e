//! HTTP gateway for promptgate.
//!
//! Wires the pipeline collaborators from configuration and exposes them over
//! Axum. Layers, outermost first:
//!
//! - HTTP trace logging
//! - CORS (configured origins, any when none are listed)
//! - Admission control keyed on the peer address (exempt paths bypass it)
//! - Request body limit
//! - Bearer-token principal resolution on `/api/v1`

pub mod admission;
pub mod api;
pub mod auth;
pub mod error;
pub mod sse;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post};
use axum::{Router, middleware};
use promptgate_admission::AdmissionController;
use promptgate_cache::FingerprintCache;
use promptgate_config::{AppConfig, GatewayConfig};
use promptgate_core::error::StoreError;
use promptgate_pipeline::Orchestrator;
use promptgate_providers::OpenAiCompatClient;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

pub use auth::{PrincipalResolver, StaticTokenResolver};
pub use error::ApiError;
pub use sse::StreamEmitter;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
    pub admission: Arc<AdmissionController>,
    pub principals: Arc<dyn PrincipalResolver>,
    /// Paths that bypass admission control
    pub exempt_paths: Vec<String>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// Connect every collaborator named by `config`.
    ///
    /// An unreachable cache or shared admission store degrades the service;
    /// an unreachable durable store fails startup.
    pub async fn from_config(config: &AppConfig) -> Result<Self, StoreError> {
        if !config.has_api_key() {
            warn!("No API key configured, completion calls will be rejected upstream");
        }

        let client = Arc::new(OpenAiCompatClient::from_config(config));
        let store = promptgate_store::open(&config.store).await?;
        let cache = FingerprintCache::open(&config.cache).await;
        let admission = AdmissionController::open(&config.rate_limit).await;

        info!(
            store = store.name(),
            cache = cache.backend_name(),
            admission = admission.backend_name(),
            model = %config.default_model,
            "Pipeline collaborators ready"
        );

        let orchestrator = Orchestrator::from_config(config, client, store, cache);
        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            admission: Arc::new(admission),
            principals: Arc::new(StaticTokenResolver::new(&config.gateway.tokens)),
            exempt_paths: config.rate_limit.exempt_paths.clone(),
        })
    }
}

/// Build the router with every route and layer.
pub fn build_router(state: SharedState, config: &GatewayConfig) -> Router {
    let v1 = Router::new()
        .route("/inference/complete", post(api::complete_handler))
        .route("/conversations", get(api::list_conversations_handler))
        .route(
            "/conversations/{id}/messages",
            get(api::conversation_messages_handler),
        )
        .route(
            "/conversation-messages",
            get(api::conversation_messages_by_query_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(api::health_handler))
        .nest("/api/v1", v1)
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(middleware::from_fn_with_state(
            state,
            admission::admission_middleware,
        ))
        .layer(cors_layer(&config.cors_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600))
}

/// Start the gateway HTTP server and run until Ctrl-C or SIGTERM.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(GatewayState::from_config(&config).await?);
    let app = build_router(state, &config.gateway);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining connections");
}
