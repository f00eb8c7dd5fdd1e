//! Stream frames: what the client sees for each upstream chunk.

use async_trait::async_trait;
use promptgate_core::{ConversationId, ProviderError};
use serde::{Deserialize, Serialize};

/// One data frame of a streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    /// Upstream chunk id
    pub id: String,

    pub conversation_id: ConversationId,

    pub delta: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Consumer of stream frames, called in arrival order.
///
/// An error stops the upstream stream; the pipeline then reports the run
/// as cancelled and persists nothing.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: StreamFrame) -> Result<(), ProviderError>;
}

#[async_trait]
impl FrameSink for Vec<StreamFrame> {
    async fn send_frame(&mut self, frame: StreamFrame) -> Result<(), ProviderError> {
        self.push(frame);
        Ok(())
    }
}

/// Frames forwarded over a channel to a writer task. A closed channel means
/// the reader is gone.
#[async_trait]
impl FrameSink for tokio::sync::mpsc::Sender<StreamFrame> {
    async fn send_frame(&mut self, frame: StreamFrame) -> Result<(), ProviderError> {
        self.send(frame)
            .await
            .map_err(|_| ProviderError::Aborted("frame receiver dropped".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_omitted() {
        let frame = StreamFrame {
            id: "c1".into(),
            conversation_id: ConversationId::new(),
            delta: "Hel".into(),
            finish_reason: None,
            model: None,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["delta"], "Hel");
        assert!(json.get("finish_reason").is_none());
        assert!(json.get("model").is_none());
    }

    #[tokio::test]
    async fn closed_channel_aborts() {
        let (mut tx, rx) = tokio::sync::mpsc::channel::<StreamFrame>(1);
        drop(rx);
        let frame = StreamFrame {
            id: "c1".into(),
            conversation_id: ConversationId::new(),
            delta: "x".into(),
            finish_reason: Some("stop".into()),
            model: Some("m".into()),
        };
        let err = tx.send_frame(frame).await.unwrap_err();
        assert!(matches!(err, ProviderError::Aborted(_)));
    }
}
