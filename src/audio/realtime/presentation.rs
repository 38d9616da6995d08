//! Presentation callbacks and the session transcript.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Callbacks the session core invokes on the UI.
///
/// Implementations must not block; the core calls these from the task that
/// processes transport events.
pub trait Presentation: Send + Sync {
    fn on_session_connected(&self);

    fn on_session_disconnected(&self);

    fn on_session_error(&self, message: &str);

    fn show_typing_indicator(&self);

    fn remove_typing_indicator(&self);

    fn add_user_transcription(&self, text: &str);

    fn add_assistant_transcription(&self, text: &str);

    fn add_system_message(&self, _text: &str) {}

    /// Partial assistant transcript; only called when delta accumulation is on.
    fn update_assistant_transcription(&self, _partial: &str) {}
}

/// Presentation that only logs.
#[derive(Debug, Default)]
pub struct LogPresentation;

impl Presentation for LogPresentation {
    fn on_session_connected(&self) {
        tracing::info!("Session connected");
    }

    fn on_session_disconnected(&self) {
        tracing::info!("Session disconnected");
    }

    fn on_session_error(&self, message: &str) {
        tracing::error!(%message, "Session error");
    }

    fn show_typing_indicator(&self) {}

    fn remove_typing_indicator(&self) {}

    fn add_user_transcription(&self, text: &str) {
        tracing::info!(%text, "user");
    }

    fn add_assistant_transcription(&self, text: &str) {
        tracing::info!(%text, "assistant");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only transcript scoped to the current session.
///
/// Cloning shares the same entries.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Arc<Mutex<Vec<TranscriptEntry>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, role: Role, text: impl Into<String>) {
        self.entries.lock().push(TranscriptEntry {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_entries() {
        let transcript = Transcript::new();
        let view = transcript.clone();
        transcript.push(Role::User, "hello");
        transcript.push(Role::Assistant, "hi there");

        let entries = view.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[1].text, "hi there");
        assert!(entries[0].timestamp <= entries[1].timestamp);

        view.clear();
        assert!(transcript.is_empty());
    }
}
