//! Route handlers.
//!
//! - `GET  /health`
//! - `POST /api/v1/inference/complete`
//! - `GET  /api/v1/conversations`
//! - `GET  /api/v1/conversations/{id}/messages`
//! - `GET  /api/v1/conversation-messages?conversation_id=<uuid>`

use std::str::FromStr;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use promptgate_cache::CacheHealth;
use promptgate_core::{ConversationId, PipelineError, PrincipalId};
use promptgate_pipeline::PipelineRequest;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::SharedState;
use crate::error::ApiError;
use crate::sse::StreamEmitter;

/// Frames buffered between the pipeline task and the response body.
const STREAM_BUFFER: usize = 32;

// ── Health ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub cache: String,
}

pub async fn health_handler(
    State(state): State<SharedState>,
) -> (StatusCode, Json<HealthResponse>) {
    let database = match state.orchestrator.store().ping().await {
        Ok(()) => "up",
        Err(e) => {
            warn!(error = %e, "Database health check failed");
            "down"
        }
    };
    let cache = state.orchestrator.cache().health().await;

    let degraded = database == "down" || cache == CacheHealth::Down;
    let (code, status) = if degraded {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (StatusCode::OK, "ok")
    };
    (
        code,
        Json(HealthResponse {
            status: status.into(),
            version: env!("CARGO_PKG_VERSION").into(),
            database: database.into(),
            cache: cache.as_str().into(),
        }),
    )
}

// ── Inference ─────────────────────────────────────────────────────────────

/// `POST /api/v1/inference/complete`. JSON for single-shot requests, an SSE
/// stream when `stream` is set.
pub async fn complete_handler(
    State(state): State<SharedState>,
    Extension(principal): Extension<PrincipalId>,
    body: Result<Json<PipelineRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
                .into_response();
        }
        Err(rejection) => {
            warn!(error = %rejection, "Rejected inference body");
            return ApiError::bad_request("invalid request body").into_response();
        }
    };

    if request.stream {
        // Reject before the SSE response commits to a 200 status.
        if let Err(e) = state.orchestrator.validate(&request) {
            return ApiError::from(e).into_response();
        }
        return stream_response(state, principal, request);
    }

    match state.orchestrator.complete(&principal, &request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            if e.status_code() >= 500 {
                error!(principal = %principal, error = %e, "Inference failed");
            }
            ApiError::from(e).into_response()
        }
    }
}

/// Run the streaming pipeline on its own task. Client disconnect drops the
/// pipeline future, which aborts the upstream exchange.
fn stream_response(
    state: SharedState,
    principal: PrincipalId,
    request: PipelineRequest,
) -> Response {
    let (mut emitter, response) = StreamEmitter::open(STREAM_BUFFER);

    tokio::spawn(async move {
        let disconnected = emitter.disconnected();
        tokio::select! {
            result = state.orchestrator.stream(&principal, &request, &mut emitter) => {
                match result {
                    Ok(conversation_id) => {
                        info!(conversation_id = %conversation_id, "Stream finished");
                    }
                    Err(PipelineError::Cancelled) => {}
                    Err(e) => {
                        if e.status_code() >= 500 {
                            error!(principal = %principal, error = %e, "Streaming inference failed");
                        }
                        emitter.write_error(&e.client_message()).await;
                    }
                }
            }
            _ = disconnected => {
                info!(principal = %principal, "Client disconnected mid-stream");
            }
        }
        emitter.done().await;
    });

    response
}

// ── Conversations ─────────────────────────────────────────────────────────

pub async fn list_conversations_handler(
    State(state): State<SharedState>,
    Extension(principal): Extension<PrincipalId>,
) -> Response {
    match state.orchestrator.list_conversations(&principal).await {
        Ok(conversations) => Json(conversations).into_response(),
        Err(e) => {
            error!(principal = %principal, error = %e, "Failed to list conversations");
            ApiError::from(e).into_response()
        }
    }
}

pub async fn conversation_messages_handler(
    State(state): State<SharedState>,
    Extension(principal): Extension<PrincipalId>,
    Path(raw_id): Path<String>,
) -> Response {
    messages_response(&state, &principal, &raw_id).await
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default)]
    conversation_id: Option<String>,
}

/// Query-string form of the messages route, for clients that cannot build
/// path parameters.
pub async fn conversation_messages_by_query_handler(
    State(state): State<SharedState>,
    Extension(principal): Extension<PrincipalId>,
    Query(query): Query<MessagesQuery>,
) -> Response {
    match query.conversation_id.as_deref().filter(|id| !id.is_empty()) {
        Some(raw_id) => messages_response(&state, &principal, raw_id).await,
        None => ApiError::bad_request("conversation_id is required").into_response(),
    }
}

async fn messages_response(state: &SharedState, principal: &PrincipalId, raw_id: &str) -> Response {
    let Ok(conversation_id) = ConversationId::from_str(raw_id) else {
        return ApiError::bad_request("invalid conversation id").into_response();
    };

    match state
        .orchestrator
        .list_messages(principal, conversation_id)
        .await
    {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => {
            if e.status_code() >= 500 {
                error!(conversation_id = %conversation_id, error = %e, "Failed to list messages");
            }
            ApiError::from(e).into_response()
        }
    }
}
