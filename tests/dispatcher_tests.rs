mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use realtalk::audio::realtime::{
    DiscardReason, DispatchOutcome, DispatcherOptions, EventDispatcher, Role, Transcript,
};
use serde_json::json;

use common::RecordingPresentation;

fn dispatcher() -> (EventDispatcher, Arc<RecordingPresentation>, Transcript) {
    let presentation = RecordingPresentation::new();
    let transcript = Transcript::new();
    let dispatcher = EventDispatcher::new(
        presentation.clone(),
        transcript.clone(),
        DispatcherOptions::default(),
    );
    (dispatcher, presentation, transcript)
}

#[test]
fn user_transcription_is_appended_and_shown() {
    let (dispatcher, presentation, transcript) = dispatcher();

    let outcome = dispatcher.dispatch_value(&json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "item_id": "item_1",
        "content_index": 0,
        "transcript": "What's the weather like?",
        "usage": {"total_tokens": 12, "input_tokens": 8, "output_tokens": 4}
    }));

    assert!(outcome.is_handled());
    assert_eq!(presentation.calls(), vec!["user:What's the weather like?"]);
    let entries = transcript.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].role, Role::User);
    assert_eq!(entries[0].text, "What's the weather like?");
}

#[test]
fn assistant_transcript_done_is_appended_and_shown() {
    let (dispatcher, presentation, transcript) = dispatcher();

    dispatcher.dispatch_value(&json!({
        "type": "response.audio_transcript.done",
        "response_id": "resp_1",
        "transcript": "Sunny and mild."
    }));

    assert_eq!(presentation.calls(), vec!["assistant:Sunny and mild."]);
    assert_eq!(transcript.entries()[0].role, Role::Assistant);
}

#[test]
fn transcription_without_text_is_discarded() {
    let (dispatcher, presentation, transcript) = dispatcher();

    let missing = dispatcher.dispatch_value(&json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "item_id": "item_1"
    }));
    let empty = dispatcher.dispatch_value(&json!({
        "type": "response.audio_transcript.done",
        "transcript": ""
    }));

    assert!(matches!(
        missing,
        DispatchOutcome::Discarded(DiscardReason::Malformed { ref event_type, .. })
            if event_type == "conversation.item.input_audio_transcription.completed"
    ));
    assert!(matches!(
        empty,
        DispatchOutcome::Discarded(DiscardReason::Malformed { .. })
    ));
    assert!(transcript.is_empty());
    assert!(presentation.calls().is_empty());
}

#[test]
fn wrongly_typed_field_is_discarded() {
    let (dispatcher, presentation, _) = dispatcher();

    let outcome = dispatcher.dispatch_value(&json!({
        "type": "response.audio_transcript.done",
        "transcript": 42
    }));

    assert!(matches!(
        outcome,
        DispatchOutcome::Discarded(DiscardReason::Malformed { .. })
    ));
    assert!(presentation.calls().is_empty());
}

#[test]
fn untyped_and_invalid_payloads_are_dropped() {
    let (dispatcher, presentation, _) = dispatcher();

    assert_eq!(
        dispatcher.dispatch(r#"{"transcript": "hello"}"#),
        DispatchOutcome::Discarded(DiscardReason::MissingType)
    );
    assert_eq!(
        dispatcher.dispatch_value(&json!({"type": 7})),
        DispatchOutcome::Discarded(DiscardReason::MissingType)
    );
    assert!(matches!(
        dispatcher.dispatch("not json"),
        DispatchOutcome::Discarded(DiscardReason::InvalidJson(_))
    ));
    assert!(presentation.calls().is_empty());
}

#[test]
fn unknown_tags_are_reported_but_harmless() {
    let (dispatcher, presentation, transcript) = dispatcher();

    assert_eq!(
        dispatcher.dispatch(r#"{"type": "rate_limits.updated", "rate_limits": []}"#),
        DispatchOutcome::Unrecognized("rate_limits.updated".into())
    );
    assert!(!dispatcher.handles("rate_limits.updated"));
    assert!(presentation.calls().is_empty());
    assert!(transcript.is_empty());
}

#[test]
fn server_error_without_message_uses_fallback() {
    let (dispatcher, presentation, _) = dispatcher();

    dispatcher.dispatch_value(&json!({"type": "error"}));
    dispatcher.dispatch_value(&json!({
        "type": "error",
        "error": {"type": "invalid_request_error", "code": "bad_voice", "message": "Voice not supported"}
    }));

    assert_eq!(
        presentation.calls(),
        vec![
            "error:Unknown server error",
            "typing-off",
            "error:Voice not supported",
            "typing-off",
        ]
    );
}

#[test]
fn typing_indicator_follows_the_turn() {
    let (dispatcher, presentation, _) = dispatcher();

    dispatcher.dispatch_value(&json!({"type": "input_audio_buffer.speech_started"}));
    dispatcher.dispatch_value(&json!({"type": "input_audio_buffer.speech_stopped"}));
    dispatcher.dispatch_value(&json!({
        "type": "conversation.item.created",
        "item": {"id": "item_1", "type": "message", "role": "user"}
    }));
    dispatcher.dispatch_value(&json!({
        "type": "conversation.item.created",
        "item": {"id": "item_2", "type": "message", "role": "assistant"}
    }));
    dispatcher.dispatch_value(&json!({"type": "response.done", "response": {"status": "completed"}}));

    assert_eq!(presentation.calls(), vec!["typing", "typing", "typing-off"]);
}

#[test]
fn session_lifecycle_events_only_log() {
    let (dispatcher, presentation, transcript) = dispatcher();

    assert!(dispatcher
        .dispatch_value(&json!({"type": "session.created", "session": {"id": "sess_1"}}))
        .is_handled());
    assert!(dispatcher
        .dispatch_value(&json!({"type": "session.updated"}))
        .is_handled());

    assert!(presentation.calls().is_empty());
    assert!(transcript.is_empty());
}
