use std::time::Duration;

use docstream_core::models::{
    ApplyOutcome, ContentBlock, Conversation, Message, Role, SessionState, StreamEvent,
    StreamReconciler,
};
use docstream_core::repositories::{ConversationRepository, InMemoryConversationRepository};
use docstream_core::services::relay_service::decode_provider_stream;
use docstream_core::services::subscribe;
use futures::StreamExt;
use futures::stream;
use tokio::sync::mpsc;
use tokio::time::Instant;

fn reconciler() -> StreamReconciler {
    StreamReconciler::new(Conversation::new("conv-1", "Quote", "claude-3-5-sonnet"))
}

fn assert_streaming_slot(r: &StreamReconciler) {
    let last = r.conversation().last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    let in_progress = r.conversation().messages().iter().filter(|m| m.streaming).count();
    assert!(in_progress <= 1, "at most one in-progress assistant message");
}

#[test]
fn deltas_then_complete_leave_one_assistant_message() {
    let mut r = reconciler();
    let handle = r
        .begin_send(Message::user_text("Quote for a hatchback?"), "claude-3-5-sonnet")
        .unwrap();
    let id = handle.session_id;

    r.apply(id, &StreamEvent::start());
    assert_streaming_slot(&r);
    for text in ["The", "The premium", "The premium is 420 EUR"] {
        assert_eq!(
            r.apply(id, &StreamEvent::delta(vec![ContentBlock::text(text)])),
            ApplyOutcome::Updated
        );
        assert_streaming_slot(&r);
        assert!(r.conversation().last().unwrap().streaming);
    }

    let final_message = Message::assistant_text("The premium is 420 EUR per year.");
    assert_eq!(
        r.apply(id, &StreamEvent::complete(final_message.clone())),
        ApplyOutcome::Finished(SessionState::Complete)
    );

    let messages = r.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages.iter().filter(|m| m.role == Role::Assistant).count(), 1);
    assert_eq!(messages[1], final_message);
    assert!(!messages[1].streaming);
    assert!(!r.is_streaming());
    assert!(handle.is_cancelled(), "listener detached after terminal event");
}

#[test]
fn error_before_any_delta_replaces_placeholder() {
    let mut r = reconciler();
    let handle = r.begin_send(Message::user_text("hi"), "claude-3-5-sonnet").unwrap();

    r.apply(handle.session_id, &StreamEvent::start());
    let outcome = r.apply(
        handle.session_id,
        &StreamEvent::error("Could not reach the model provider"),
    );

    assert_eq!(outcome, ApplyOutcome::Finished(SessionState::Error));
    let messages = r.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].text(), "Error: Could not reach the model provider");
    assert!(!messages[1].streaming);

    // Terminal: nothing else from this session lands.
    assert_eq!(
        r.apply(handle.session_id, &StreamEvent::delta(vec![ContentBlock::text("late")])),
        ApplyOutcome::Stale
    );
    assert_eq!(r.conversation().message_count(), 2);
}

#[tokio::test]
async fn malformed_frame_is_skipped_end_to_end() {
    let frames = [
        r#"data: {"type":"message_start","message":{"id":"msg_1"}}"#,
        r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Your quote "}}"#,
        r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_del"#,
        r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"is ready."}}"#,
        r#"data: {"type":"message_stop"}"#,
    ];
    let body: String = frames.iter().map(|f| format!("{f}\n\n")).collect();
    let chunks: Vec<Result<Vec<u8>, std::io::Error>> = body
        .as_bytes()
        .chunks(23)
        .map(|c| Ok(c.to_vec()))
        .collect();

    let mut r = reconciler();
    let handle = r.begin_send(Message::user_text("quote please"), "claude-3-5-sonnet").unwrap();

    let events = decode_provider_stream(
        stream::iter(chunks),
        Instant::now() + Duration::from_secs(5),
        Duration::from_secs(5),
    );
    let with_start = stream::iter(vec![StreamEvent::start()]).chain(events).boxed();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = subscribe(&handle, with_start, tx);

    let mut outcome = ApplyOutcome::Updated;
    while let Some(envelope) = rx.recv().await {
        outcome = r.apply(envelope.session_id, &envelope.event);
        if r.is_streaming() {
            assert_streaming_slot(&r);
        }
    }

    assert_eq!(outcome, ApplyOutcome::Finished(SessionState::Complete));
    assert_eq!(r.conversation().last().unwrap().text(), "Your quote is ready.");
    assert_eq!(r.conversation().message_count(), 2);
}

#[test]
fn abandoned_session_cannot_touch_new_conversation() {
    let mut r = reconciler();
    let old = r.begin_send(Message::user_text("first"), "claude-3-5-sonnet").unwrap();
    r.apply(old.session_id, &StreamEvent::start());
    r.apply(old.session_id, &StreamEvent::delta(vec![ContentBlock::text("partial")]));

    let previous =
        r.start_new_conversation(Conversation::new("conv-2", "New", "claude-3-5-sonnet"));
    assert!(old.is_cancelled());
    assert_eq!(previous.last().unwrap().text(), "partial");

    let outcome = r.apply(old.session_id, &StreamEvent::complete(Message::assistant_text("stale")));
    assert_eq!(outcome, ApplyOutcome::Stale);
    assert_eq!(r.conversation().message_count(), 0);
}

#[tokio::test]
async fn finished_conversation_round_trips_through_store() {
    let mut r = reconciler();
    let handle = r.begin_send(Message::user_text("hi"), "claude-3-5-sonnet").unwrap();
    r.apply(handle.session_id, &StreamEvent::start());
    r.apply(handle.session_id, &StreamEvent::complete(Message::assistant_text("hello")));

    let repo = InMemoryConversationRepository::new();
    let data = r.conversation().to_data().unwrap();
    repo.save(r.conversation().id(), data).await.unwrap();

    let stored = repo.load_one("conv-1").await.unwrap().unwrap();
    let restored = Conversation::from_data(stored).unwrap();
    assert_eq!(restored.messages(), r.conversation().messages());
}
