//! Server-sent event emitter.
//!
//! The emitter feeds an axum [`Sse`] response through a bounded channel.
//! Every event is flushed as soon as the body is polled. The response
//! always ends with `data: [DONE]`, written by [`StreamEmitter::done`].

use std::convert::Infallible;
use std::future::Future;

use async_trait::async_trait;
use axum::http::{HeaderName, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use promptgate_core::ProviderError;
use promptgate_pipeline::{FrameSink, StreamFrame};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Terminal marker payload.
pub const DONE: &str = "[DONE]";

pub struct StreamEmitter {
    tx: mpsc::Sender<Result<Event, Infallible>>,
}

impl StreamEmitter {
    /// Create an emitter and the streaming response it writes into.
    pub fn open(buffer: usize) -> (Self, Response) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let response = (
            [
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
                (HeaderName::from_static("x-accel-buffering"), "no"),
            ],
            Sse::new(ReceiverStream::new(rx)),
        )
            .into_response();
        (Self { tx }, response)
    }

    /// Write one `data:` event, optionally named.
    pub async fn write_event<T: Serialize + Sync>(
        &self,
        name: Option<&str>,
        payload: &T,
    ) -> Result<(), ProviderError> {
        let data =
            serde_json::to_string(payload).map_err(|e| ProviderError::Decode(e.to_string()))?;
        let mut event = Event::default();
        if let Some(name) = name {
            event = event.event(name);
        }
        self.send(event.data(data)).await
    }

    /// Write an `error` event. A vanished client is ignored.
    pub async fn write_error(&self, message: &str) {
        let _ = self
            .write_event(Some("error"), &serde_json::json!({ "error": message }))
            .await;
    }

    /// Write the terminal marker and close the stream.
    pub async fn done(self) {
        let _ = self.send(Event::default().data(DONE)).await;
    }

    /// Resolves once the client has gone away.
    pub fn disconnected(&self) -> impl Future<Output = ()> + Send + 'static {
        let tx = self.tx.clone();
        async move { tx.closed().await }
    }

    async fn send(&self, event: Event) -> Result<(), ProviderError> {
        self.tx
            .send(Ok(event))
            .await
            .map_err(|_| ProviderError::Aborted("client disconnected".into()))
    }
}

#[async_trait]
impl FrameSink for StreamEmitter {
    async fn send_frame(&mut self, frame: StreamFrame) -> Result<(), ProviderError> {
        self.write_event(None, &frame).await
    }
}
