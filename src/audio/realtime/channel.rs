//! Control channel: JSON client events over the peer data channel.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::transport::{ChannelState, DataChannel};
use crate::error::RealtalkError;

/// Label of the control data channel.
pub const CONTROL_CHANNEL_LABEL: &str = "realtime-channel";

/// Outbound client events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Partial session update applied mid-session.
    #[serde(rename = "session.update")]
    SessionUpdate { session: Value },

    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: Value },

    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },

    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// A user text message added to the conversation.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            item: serde_json::json!({
                "type": "message",
                "role": "user",
                "content": [{ "type": "input_text", "text": text.into() }],
            }),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::InputAudioBufferCommit => "input_audio_buffer.commit",
            Self::InputAudioBufferClear => "input_audio_buffer.clear",
            Self::ConversationItemCreate { .. } => "conversation.item.create",
            Self::ResponseCreate { .. } => "response.create",
            Self::ResponseCancel => "response.cancel",
        }
    }
}

/// Best-effort, at-most-once sender over the control data channel.
///
/// Messages sent while the channel is not open are dropped, never queued.
#[derive(Clone)]
pub struct ControlChannel {
    inner: Arc<dyn DataChannel>,
}

impl ControlChannel {
    pub fn new(inner: Arc<dyn DataChannel>) -> Self {
        Self { inner }
    }

    pub fn label(&self) -> &str {
        self.inner.label()
    }

    pub fn is_open(&self) -> bool {
        self.inner.ready_state() == ChannelState::Open
    }

    /// Serialize and transmit `message` if the channel is open.
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), RealtalkError> {
        let state = self.inner.ready_state();
        if state != ChannelState::Open {
            tracing::warn!(channel = %self.label(), %state, "Cannot send message: data channel not ready");
            return Err(RealtalkError::ChannelNotReady(format!(
                "channel '{}' is {state}",
                self.label()
            )));
        }

        let text = serde_json::to_string(message)?;
        self.inner.send_text(text).await
    }

    /// Send a typed client event.
    pub async fn send_event(&self, event: &ClientEvent) -> Result<(), RealtalkError> {
        self.send(event).await?;
        tracing::debug!(event_type = event.event_type(), "Sent message");
        Ok(())
    }

    pub async fn close(&self) {
        if let Err(error) = self.inner.close().await {
            tracing::debug!(%error, "Data channel close failed");
        }
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("label", &self.inner.label())
            .field("state", &self.inner.ready_state())
            .finish()
    }
}
