//! Error types for the promptgate domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator has its own error enum; [`PipelineError`] is the
//! user-visible taxonomy that the gateway maps onto HTTP statuses.
//!
//! Degradation policy differs per collaborator: cache and admission-store
//! failures are absorbed where they happen, ownership failures are
//! authoritative, and persistence failures are logged after the response
//! has been produced. Only the pipeline-level variants ever reach a client.

use thiserror::Error;

/// The user-visible error type for a single pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    AdmissionDenied { retry_after_secs: u64 },

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Not authorized to access conversation {0}")]
    ConversationForbidden(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Upstream failure: {0}")]
    Upstream(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Request cancelled")]
    Cancelled,
}

impl PipelineError {
    /// The HTTP status class this error surfaces as.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::AdmissionDenied { .. } => 429,
            Self::ConversationNotFound(_) => 404,
            Self::ConversationForbidden(_) => 403,
            Self::InvalidRequest(_) => 400,
            Self::Upstream(_) => 502,
            Self::Store(_) => 500,
            // Client is gone; nobody reads this status.
            Self::Cancelled => 499,
        }
    }

    /// Short client-facing message. Upstream and store details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::AdmissionDenied { .. } => "rate limit exceeded".into(),
            Self::ConversationNotFound(_) => "conversation not found".into(),
            Self::ConversationForbidden(_) => "forbidden".into(),
            Self::InvalidRequest(msg) => msg.clone(),
            Self::Upstream(e) => format!("inference failed: {e}"),
            Self::Store(_) => "internal error".into(),
            Self::Cancelled => "request cancelled".into(),
        }
    }
}

/// Result type alias using [`PipelineError`].
pub type Result<T> = std::result::Result<T, PipelineError>;

// --- Collaborator errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Non-2xx response; `body` is truncated to the configured snippet size.
    #[error("API request failed (status: {status_code}): {body}")]
    Api { status_code: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Backend returned no choices")]
    EmptyResponse,

    /// The chunk consumer stopped the stream.
    #[error("Stream aborted by consumer: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of the shared admission window store. Never surfaced: the
/// controller admits the request and logs a warning.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Window store unavailable: {0}")]
    Backend(String),
}
