//! Admission middleware: one sliding-window check per request, keyed on
//! the transport peer address. Forwarding headers are never consulted.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use promptgate_admission::{AdmissionDecision, client_key};
use promptgate_core::PipelineError;
use tracing::{debug, warn};

use crate::SharedState;
use crate::error::ApiError;

pub async fn admission_middleware(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if state.exempt_paths.iter().any(|p| p == path) {
        return next.run(req).await;
    }

    let key = match req.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => client_key(addr.ip()),
        None => {
            debug!("No peer address on request, using shared window");
            "rl:unknown".to_string()
        }
    };

    let decision = state.admission.allow(&key).await;
    if !decision.admitted {
        warn!(client = %key, path = %path, "Rate limit exceeded");
        let retry_after_secs = decision.retry_after.map_or(0, |d| d.as_secs());
        let mut response =
            ApiError::from(PipelineError::AdmissionDenied { retry_after_secs }).into_response();
        set_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(req).await;
    set_headers(response.headers_mut(), &decision);
    response
}

fn set_headers(headers: &mut HeaderMap, decision: &AdmissionDecision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    if let Some(retry_after) = decision.retry_after {
        headers.insert("retry-after", HeaderValue::from(retry_after.as_secs()));
    }
}
