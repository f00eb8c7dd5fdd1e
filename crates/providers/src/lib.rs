//! Completion backend implementations for promptgate.
//!
//! All clients implement the `promptgate_core::CompletionClient` trait.

pub mod openai_compat;
pub mod sse;

pub use openai_compat::{ClientLimits, OpenAiCompatClient};
