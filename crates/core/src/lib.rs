//! # promptgate core
//!
//! Domain types, traits, and error definitions for the promptgate inference
//! pipeline. This crate performs **no I/O**. It defines the domain model and
//! the collaborator seams that every other crate implements against.
//!
//! ## Collaborators
//!
//! The pipeline coordinates independently-failing collaborators, each defined
//! here as a trait:
//! - [`CompletionClient`]: the remote completion backend
//! - [`ConversationStore`]: the durable conversation/message store
//! - [`ContextInjector`]: prepends injected turns (system instructions, retrieved context)
//!
//! The cache and admission stores live in their own crates because their
//! failure policy (fail-open) differs from the store's.

pub mod context;
pub mod error;
pub mod message;
pub mod provider;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use context::{ContextInjector, NoopInjector};
pub use error::{AdmissionError, CacheError, PipelineError, ProviderError, Result, StoreError};
pub use message::{Conversation, ConversationId, Message, PrincipalId, Role, Turn};
pub use provider::{
    ChunkSink, CompletionClient, CompletionParams, CompletionRequest, CompletionResponse,
    StreamChunk, Usage,
};
pub use store::ConversationStore;
