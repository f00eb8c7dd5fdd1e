//! ContextInjector trait.
//!
//! Given an ordered turn sequence, an injector returns a superset of it with
//! injected turns only at the front. Injection must be idempotent: a sequence
//! that already starts with an injected turn is returned unchanged.

use async_trait::async_trait;

use crate::message::Turn;

#[async_trait]
pub trait ContextInjector: Send + Sync {
    fn name(&self) -> &str;

    async fn inject(&self, turns: Vec<Turn>) -> Vec<Turn>;
}

/// Pass-through injector.
pub struct NoopInjector;

#[async_trait]
impl ContextInjector for NoopInjector {
    fn name(&self) -> &str {
        "noop"
    }

    async fn inject(&self, turns: Vec<Turn>) -> Vec<Turn> {
        turns
    }
}
