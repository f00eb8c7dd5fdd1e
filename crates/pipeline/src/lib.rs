//! # promptgate pipeline
//!
//! The inference orchestration pipeline. An [`Orchestrator`] conducts each
//! request through conversation resolution, context assembly, the response
//! cache (single-shot only), the completion backend and persistence.
//!
//! Streaming output is pushed frame by frame into a [`FrameSink`]; the
//! gateway's SSE emitter is one, a `Vec<StreamFrame>` is another.

pub mod context;
pub mod orchestrator;
pub mod stream;
pub mod validate;

pub use context::{ContextAssembler, SystemPromptInjector};
pub use orchestrator::{InferenceResponse, Orchestrator, PipelineRequest};
pub use stream::{FrameSink, StreamFrame};
pub use validate::validate_prompt;
