//! Principal resolution.
//!
//! Credential verification lives outside the pipeline. The gateway only
//! maps `Authorization: Bearer <token>` to a principal id through a
//! [`PrincipalResolver`] and stores it in the request extensions.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use promptgate_core::PrincipalId;
use tracing::warn;

use crate::SharedState;
use crate::error::ApiError;

#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    fn name(&self) -> &str;

    /// The principal a bearer token belongs to, if any.
    async fn resolve(&self, token: &str) -> Option<PrincipalId>;
}

/// Fixed token table, usually from `[gateway.tokens]`.
pub struct StaticTokenResolver {
    tokens: HashMap<String, PrincipalId>,
}

impl StaticTokenResolver {
    pub fn new(tokens: &HashMap<String, String>) -> Self {
        Self {
            tokens: tokens
                .iter()
                .map(|(token, principal)| (token.clone(), PrincipalId::new(principal)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl PrincipalResolver for StaticTokenResolver {
    fn name(&self) -> &str {
        "static"
    }

    async fn resolve(&self, token: &str) -> Option<PrincipalId> {
        self.tokens.get(token).cloned()
    }
}

/// Rejects requests without a resolvable bearer token (401).
pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Response {
    let header = match req.headers().get("Authorization") {
        Some(value) => value.to_str().unwrap_or_default(),
        None => return ApiError::unauthorized("missing authorization header").into_response(),
    };
    let Some(token) = header.strip_prefix("Bearer ") else {
        return ApiError::unauthorized("invalid authorization format").into_response();
    };

    let principal = state.principals.resolve(token.trim()).await;
    match principal {
        Some(principal) => {
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        None => {
            warn!(path = %req.uri().path(), "Unknown bearer token");
            ApiError::unauthorized("invalid or expired token").into_response()
        }
    }
}
