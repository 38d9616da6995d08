//! Server event vocabulary.
//!
//! The remote service adds event types over time, so every payload struct
//! is lenient: all fields are optional and required ones are checked by the
//! handler that needs them.

use serde::Deserialize;
use serde_json::Value;
use strum::EnumIter;

/// Server event types with a built-in handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum ServerEventKind {
    SessionCreated,
    SessionUpdated,
    ConversationItemCreated,
    SpeechStarted,
    SpeechStopped,
    InputTranscriptionCompleted,
    AssistantTranscriptDelta,
    AssistantTranscriptDone,
    ResponseDone,
    Error,
}

/// Older tag for the assistant transcript delta, still emitted by some
/// server versions.
pub const LEGACY_TRANSCRIPT_DELTA_TAG: &str = "response.audio.transcript.delta";

impl ServerEventKind {
    /// Wire `type` tag.
    pub fn tag(self) -> &'static str {
        match self {
            Self::SessionCreated => "session.created",
            Self::SessionUpdated => "session.updated",
            Self::ConversationItemCreated => "conversation.item.created",
            Self::SpeechStarted => "input_audio_buffer.speech_started",
            Self::SpeechStopped => "input_audio_buffer.speech_stopped",
            Self::InputTranscriptionCompleted => {
                "conversation.item.input_audio_transcription.completed"
            }
            Self::AssistantTranscriptDelta => "response.audio_transcript.delta",
            Self::AssistantTranscriptDone => "response.audio_transcript.done",
            Self::ResponseDone => "response.done",
            Self::Error => "error",
        }
    }
}

/// Read the `type` tag of a raw server event.
pub fn event_type(payload: &Value) -> Option<&str> {
    payload.get("type").and_then(Value::as_str)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionEnvelope {
    pub session: Option<SessionSummary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionSummary {
    pub id: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationItemCreated {
    pub item: Option<ConversationItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationItem {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub role: Option<String>,
}

impl ConversationItem {
    pub fn is_user_message(&self) -> bool {
        self.kind.as_deref() == Some("message") && self.role.as_deref() == Some("user")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputTranscriptionCompleted {
    pub transcript: Option<String>,
    pub item_id: Option<String>,
    pub content_index: Option<u32>,
    pub event_id: Option<String>,
    pub usage: Option<TranscriptionUsage>,
}

/// Token usage attached to a transcription event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionUsage {
    pub total_tokens: Option<u64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub input_token_details: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantTranscriptDelta {
    pub delta: Option<String>,
    pub response_id: Option<String>,
    pub item_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantTranscriptDone {
    pub transcript: Option<String>,
    pub response_id: Option<String>,
    pub item_id: Option<String>,
    pub output_index: Option<u32>,
    pub content_index: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerErrorEvent {
    pub error: Option<ServerErrorDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerErrorDetail {
    pub message: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub code: Option<Value>,
}

/// Fallback shown when an `error` event carries no message.
pub const GENERIC_SERVER_ERROR: &str = "Unknown server error";

impl ServerErrorEvent {
    pub fn message(&self) -> String {
        self.error
            .as_ref()
            .and_then(|detail| detail.message.as_deref())
            .filter(|message| !message.trim().is_empty())
            .unwrap_or(GENERIC_SERVER_ERROR)
            .to_string()
    }
}
