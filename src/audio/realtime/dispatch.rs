//! Server event dispatch.
//!
//! Inbound control-channel payloads are classified by their `type` tag and
//! routed through a table of handlers. Nothing here can fail the session:
//! malformed, untyped and unknown events are logged and discarded.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use strum::IntoEnumIterator;

use super::events::{
    event_type, AssistantTranscriptDelta, AssistantTranscriptDone, ConversationItemCreated,
    InputTranscriptionCompleted, ServerErrorEvent, ServerEventKind, SessionEnvelope,
    LEGACY_TRANSCRIPT_DELTA_TAG,
};
use super::presentation::{Presentation, Role, Transcript};

/// Why an inbound payload was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    InvalidJson(String),
    MissingType,
    Malformed { event_type: String, detail: String },
}

/// Classification of one inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled(String),
    Unrecognized(String),
    Discarded(DiscardReason),
}

impl DispatchOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled(_))
    }
}

/// A required field was missing or had the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEvent(pub String);

impl MalformedEvent {
    fn missing(field: &str) -> Self {
        Self(format!("missing {field} field"))
    }
}

/// State a handler can act on.
pub struct DispatchContext<'a> {
    pub presentation: &'a dyn Presentation,
    pub transcript: &'a Transcript,
    pub accumulate_deltas: bool,
    assistant_partial: &'a Mutex<String>,
}

impl DispatchContext<'_> {
    /// Append to the in-progress assistant transcript and return the total.
    pub fn append_assistant_partial(&self, delta: &str) -> String {
        let mut partial = self.assistant_partial.lock();
        partial.push_str(delta);
        partial.clone()
    }

    pub fn reset_assistant_partial(&self) {
        self.assistant_partial.lock().clear();
    }
}

pub type Handler =
    Arc<dyn Fn(&DispatchContext<'_>, &Value) -> Result<(), MalformedEvent> + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler_fn<F>(f: F) -> Handler
where
    F: Fn(&DispatchContext<'_>, &Value) -> Result<(), MalformedEvent> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherOptions {
    /// Render assistant transcript deltas as they stream in.
    pub accumulate_deltas: bool,
}

/// Routes server events to handlers by `type` tag.
pub struct EventDispatcher {
    handlers: HashMap<String, Handler>,
    presentation: Arc<dyn Presentation>,
    transcript: Transcript,
    options: DispatcherOptions,
    assistant_partial: Mutex<String>,
}

impl EventDispatcher {
    /// Dispatcher with every built-in handler registered.
    pub fn new(
        presentation: Arc<dyn Presentation>,
        transcript: Transcript,
        options: DispatcherOptions,
    ) -> Self {
        let mut dispatcher = Self {
            handlers: HashMap::new(),
            presentation,
            transcript,
            options,
            assistant_partial: Mutex::new(String::new()),
        };
        for kind in ServerEventKind::iter() {
            dispatcher.register(kind.tag(), builtin_handler(kind));
        }
        dispatcher.register(
            LEGACY_TRANSCRIPT_DELTA_TAG,
            builtin_handler(ServerEventKind::AssistantTranscriptDelta),
        );
        dispatcher
    }

    /// Add or replace the handler for `tag`.
    pub fn register(&mut self, tag: impl Into<String>, handler: Handler) {
        self.handlers.insert(tag.into(), handler);
    }

    pub fn handles(&self, tag: &str) -> bool {
        self.handlers.contains_key(tag)
    }

    /// Forget any partially accumulated assistant transcript.
    pub fn reset(&self) {
        self.assistant_partial.lock().clear();
    }

    /// Parse and route one raw payload.
    pub fn dispatch(&self, raw: &str) -> DispatchOutcome {
        let payload: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(%error, "Error parsing server message");
                return DispatchOutcome::Discarded(DiscardReason::InvalidJson(error.to_string()));
            }
        };
        self.dispatch_value(&payload)
    }

    /// Route an already-parsed payload.
    pub fn dispatch_value(&self, payload: &Value) -> DispatchOutcome {
        let Some(tag) = event_type(payload) else {
            tracing::warn!("Received message without type field");
            return DispatchOutcome::Discarded(DiscardReason::MissingType);
        };

        let Some(handler) = self.handlers.get(tag) else {
            tracing::debug!(event_type = tag, "Unhandled message type");
            return DispatchOutcome::Unrecognized(tag.to_string());
        };

        tracing::trace!(event_type = tag, "Received server message");
        let context = DispatchContext {
            presentation: self.presentation.as_ref(),
            transcript: &self.transcript,
            accumulate_deltas: self.options.accumulate_deltas,
            assistant_partial: &self.assistant_partial,
        };
        match handler(&context, payload) {
            Ok(()) => DispatchOutcome::Handled(tag.to_string()),
            Err(MalformedEvent(detail)) => {
                tracing::warn!(event_type = tag, %detail, "Discarding malformed server event");
                DispatchOutcome::Discarded(DiscardReason::Malformed {
                    event_type: tag.to_string(),
                    detail,
                })
            }
        }
    }
}

fn parse<T: DeserializeOwned>(payload: &Value) -> Result<T, MalformedEvent> {
    T::deserialize(payload).map_err(|error| MalformedEvent(error.to_string()))
}

fn required_text(value: Option<String>, field: &str) -> Result<String, MalformedEvent> {
    value
        .filter(|text| !text.is_empty())
        .ok_or_else(|| MalformedEvent::missing(field))
}

/// Handler for a built-in event kind. The match keeps the table exhaustive.
fn builtin_handler(kind: ServerEventKind) -> Handler {
    match kind {
        ServerEventKind::SessionCreated | ServerEventKind::SessionUpdated => {
            handler_fn(move |_, payload| {
                let envelope: SessionEnvelope = parse(payload)?;
                let session_id = envelope.session.and_then(|session| session.id);
                tracing::info!(event_type = kind.tag(), session_id = ?session_id, "Session event");
                Ok(())
            })
        }
        ServerEventKind::ConversationItemCreated => handler_fn(|ctx, payload| {
            let event: ConversationItemCreated = parse(payload)?;
            tracing::debug!("Conversation item created");
            if event.item.is_some_and(|item| item.is_user_message()) {
                ctx.presentation.show_typing_indicator();
            }
            Ok(())
        }),
        ServerEventKind::SpeechStarted => handler_fn(|ctx, _| {
            tracing::debug!("User started speaking");
            ctx.presentation.show_typing_indicator();
            Ok(())
        }),
        ServerEventKind::SpeechStopped => handler_fn(|_, _| {
            tracing::debug!("User stopped speaking");
            Ok(())
        }),
        ServerEventKind::InputTranscriptionCompleted => handler_fn(|ctx, payload| {
            let event: InputTranscriptionCompleted = parse(payload)?;
            let transcript = required_text(event.transcript, "transcript")?;

            ctx.transcript.push(Role::User, transcript.clone());
            ctx.presentation.add_user_transcription(&transcript);
            tracing::debug!(
                item_id = ?event.item_id,
                content_index = ?event.content_index,
                event_id = ?event.event_id,
                "User transcription completed"
            );
            if let Some(usage) = event.usage {
                tracing::debug!(
                    total_tokens = ?usage.total_tokens,
                    input_tokens = ?usage.input_tokens,
                    output_tokens = ?usage.output_tokens,
                    input_token_details = ?usage.input_token_details,
                    "Transcription usage"
                );
            }
            Ok(())
        }),
        ServerEventKind::AssistantTranscriptDelta => handler_fn(|ctx, payload| {
            let event: AssistantTranscriptDelta = parse(payload)?;
            let delta = event.delta.ok_or_else(|| MalformedEvent::missing("delta"))?;
            if ctx.accumulate_deltas {
                let partial = ctx.append_assistant_partial(&delta);
                ctx.presentation.update_assistant_transcription(&partial);
            } else {
                tracing::trace!(response_id = ?event.response_id, "Assistant transcript delta");
            }
            Ok(())
        }),
        ServerEventKind::AssistantTranscriptDone => handler_fn(|ctx, payload| {
            let event: AssistantTranscriptDone = parse(payload)?;
            ctx.reset_assistant_partial();
            let transcript = required_text(event.transcript, "transcript")?;

            ctx.transcript.push(Role::Assistant, transcript.clone());
            ctx.presentation.add_assistant_transcription(&transcript);
            tracing::debug!(
                response_id = ?event.response_id,
                item_id = ?event.item_id,
                output_index = ?event.output_index,
                content_index = ?event.content_index,
                "Assistant transcript completed"
            );
            Ok(())
        }),
        ServerEventKind::ResponseDone => handler_fn(|ctx, _| {
            tracing::debug!("Response completed");
            ctx.presentation.remove_typing_indicator();
            Ok(())
        }),
        ServerEventKind::Error => handler_fn(|ctx, payload| {
            let event: ServerErrorEvent = parse(payload).unwrap_or_default();
            let message = event.message();
            tracing::warn!(%message, "Server error");
            ctx.presentation.on_session_error(&message);
            ctx.presentation.remove_typing_indicator();
            Ok(())
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().push(call);
        }
    }

    impl Presentation for Recorder {
        fn on_session_connected(&self) {
            self.record("connected".into());
        }
        fn on_session_disconnected(&self) {
            self.record("disconnected".into());
        }
        fn on_session_error(&self, message: &str) {
            self.record(format!("error:{message}"));
        }
        fn show_typing_indicator(&self) {
            self.record("typing".into());
        }
        fn remove_typing_indicator(&self) {
            self.record("typing-off".into());
        }
        fn add_user_transcription(&self, text: &str) {
            self.record(format!("user:{text}"));
        }
        fn add_assistant_transcription(&self, text: &str) {
            self.record(format!("assistant:{text}"));
        }
        fn update_assistant_transcription(&self, partial: &str) {
            self.record(format!("partial:{partial}"));
        }
    }

    fn dispatcher(options: DispatcherOptions) -> (EventDispatcher, Arc<Recorder>, Transcript) {
        let recorder = Arc::new(Recorder::default());
        let transcript = Transcript::new();
        let dispatcher = EventDispatcher::new(recorder.clone(), transcript.clone(), options);
        (dispatcher, recorder, transcript)
    }

    #[test]
    fn delta_accumulation_is_opt_in() {
        let (plain, recorder, _) = dispatcher(DispatcherOptions::default());
        plain.dispatch_value(&json!({"type": "response.audio_transcript.delta", "delta": "Hel"}));
        assert!(recorder.calls().is_empty());

        let (streaming, recorder, transcript) = dispatcher(DispatcherOptions {
            accumulate_deltas: true,
        });
        streaming.dispatch_value(&json!({"type": "response.audio_transcript.delta", "delta": "Hel"}));
        streaming.dispatch_value(&json!({"type": LEGACY_TRANSCRIPT_DELTA_TAG, "delta": "lo"}));
        streaming.dispatch_value(&json!({"type": "response.audio_transcript.done", "transcript": "Hello"}));
        streaming.dispatch_value(&json!({"type": "response.audio_transcript.delta", "delta": "Next"}));

        assert_eq!(
            recorder.calls(),
            vec!["partial:Hel", "partial:Hello", "assistant:Hello", "partial:Next"]
        );
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn every_builtin_kind_is_registered() {
        let (dispatcher, _, _) = dispatcher(DispatcherOptions::default());
        for kind in ServerEventKind::iter() {
            assert!(dispatcher.handles(kind.tag()), "{kind:?} has no handler");
        }
        assert!(dispatcher.handles(LEGACY_TRANSCRIPT_DELTA_TAG));
        assert!(!dispatcher.handles("rate_limits.updated"));
    }

    #[test]
    fn registered_handler_overrides_unknown_tag() {
        let (mut dispatcher, recorder, _) = dispatcher(DispatcherOptions::default());
        assert_eq!(
            dispatcher.dispatch_value(&json!({"type": "rate_limits.updated"})),
            DispatchOutcome::Unrecognized("rate_limits.updated".into())
        );

        dispatcher.register(
            "rate_limits.updated",
            handler_fn(|ctx, _| {
                ctx.presentation.add_system_message("rate limits");
                Ok(())
            }),
        );
        assert!(dispatcher
            .dispatch_value(&json!({"type": "rate_limits.updated"}))
            .is_handled());
        assert!(recorder.calls().is_empty());
    }
}
