use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};
use uuid::Uuid;

use super::content::{ContentBlock, EMPTY_RESPONSE_FALLBACK, Message, Role};
use super::conversation::Conversation;
use super::stream_event::StreamEvent;
use super::stream_session::{SessionState, StreamSession};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("a response is still being generated; wait for it to finish before sending")]
    AlreadyStreaming,
}

/// Identity and cancellation token handed to whoever delivers events for a session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub cancel_flag: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }
}

/// Result of applying one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The in-progress assistant message was updated.
    Updated,
    /// The session reached a terminal state and was released.
    Finished(SessionState),
    /// The event belonged to a detached, finished or unknown session and was dropped.
    Stale,
}

struct ActiveStream {
    session: StreamSession,
    cancel_flag: Arc<AtomicBool>,
}

/// Client-side merge of relay events into a conversation.
///
/// While a session is active the last message of the conversation is always the
/// assistant message being streamed into. Deltas and completion replace that slot in
/// place; only a missing `stream-start` or an error without a slot ever appends.
pub struct StreamReconciler {
    conversation: Conversation,
    active: Option<ActiveStream>,
}

impl StreamReconciler {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            active: None,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn into_conversation(mut self) -> Conversation {
        self.cancel();
        self.conversation
    }

    /// Mirrors the disabled submit control: true while a session is live.
    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.active.as_ref().map(|a| a.session.state())
    }

    pub fn active_session_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|a| a.session.id())
    }

    /// Record the user's message and open a session for the reply.
    ///
    /// Rejected while another session is live; sends are never queued.
    pub fn begin_send(
        &mut self,
        user_message: Message,
        model: &str,
    ) -> Result<SessionHandle, ReconcileError> {
        if self.active.is_some() {
            return Err(ReconcileError::AlreadyStreaming);
        }

        self.conversation.push(user_message);

        let session = StreamSession::new(model);
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let handle = SessionHandle {
            session_id: session.id(),
            cancel_flag: cancel_flag.clone(),
        };
        debug!(session_id = %handle.session_id, model = %model, "Stream session opened");

        self.active = Some(ActiveStream {
            session,
            cancel_flag,
        });
        Ok(handle)
    }

    /// Apply one relay event belonging to `session_id`.
    pub fn apply(&mut self, session_id: Uuid, event: &StreamEvent) -> ApplyOutcome {
        let Some(active) = self.active.as_mut() else {
            debug!(
                session_id = %session_id,
                event = event.name(),
                "Dropping event: no active session"
            );
            return ApplyOutcome::Stale;
        };
        if active.session.id() != session_id || active.cancel_flag.load(Ordering::Relaxed) {
            debug!(
                session_id = %session_id,
                event = event.name(),
                "Dropping event from detached session"
            );
            return ApplyOutcome::Stale;
        }

        // A lost `stream-start` must not stall the session.
        if active.session.state() == SessionState::Idle
            && matches!(event, StreamEvent::Delta(_) | StreamEvent::Complete(_))
            && let Err(e) = active.session.transition(SessionState::Started)
        {
            warn!(error = %e, "Could not recover missing stream start");
        }

        if let Err(e) = active.session.observe(event) {
            warn!(session_id = %session_id, error = %e, "Ignoring out-of-order stream event");
            return ApplyOutcome::Stale;
        }

        match event {
            StreamEvent::Start(_) => {
                self.in_progress_slot();
                ApplyOutcome::Updated
            }
            StreamEvent::Delta(delta) => {
                let slot = self.in_progress_slot();
                if !delta.message_content.is_empty() {
                    // Replaced wholesale with an owned copy; the transport may reuse its buffer.
                    slot.content = delta.message_content.clone();
                }
                slot.streaming = true;
                ApplyOutcome::Updated
            }
            StreamEvent::Complete(message) => {
                let replacement = if message.has_content() {
                    let content = message
                        .content
                        .iter()
                        .filter(|block| block.has_content())
                        .cloned()
                        .collect();
                    Message::new(Role::Assistant, content)
                } else {
                    warn!(
                        session_id = %session_id,
                        "Final response had no content, showing fallback"
                    );
                    Message::assistant_text(EMPTY_RESPONSE_FALLBACK)
                };
                *self.in_progress_slot() = replacement;
                self.finish(SessionState::Complete)
            }
            StreamEvent::Error(payload) => {
                let error_text = format!("Error: {}", payload.error);
                let has_slot = self
                    .conversation
                    .last()
                    .is_some_and(Message::is_in_progress);
                if has_slot {
                    let slot = self.in_progress_slot();
                    slot.streaming = false;
                    if slot.is_placeholder() || !slot.has_content() {
                        slot.content = vec![ContentBlock::text(error_text)];
                    } else {
                        // Streamed text settles as-is; the error follows as its own message.
                        self.conversation.push(Message::assistant_text(error_text));
                    }
                } else {
                    self.conversation.push(Message::assistant_text(error_text));
                }
                self.finish(SessionState::Error)
            }
        }
    }

    /// Detach the live session, if any. Later events for it are dropped.
    ///
    /// Partially streamed text stays in the conversation; a bare placeholder is removed.
    pub fn cancel(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel_flag.store(true, Ordering::Relaxed);
        debug!(session_id = %active.session.id(), "Stream session cancelled");

        let placeholder_only = self
            .conversation
            .last()
            .is_some_and(|m| m.is_in_progress() && m.is_placeholder());
        if placeholder_only {
            self.conversation.messages_mut().pop();
        } else if let Some(last) = self.conversation.last_mut()
            && last.is_in_progress()
        {
            last.streaming = false;
        }
    }

    /// Cancel whatever is in flight and switch to another conversation.
    pub fn start_new_conversation(&mut self, conversation: Conversation) -> Conversation {
        self.cancel();
        std::mem::replace(&mut self.conversation, conversation)
    }

    fn finish(&mut self, state: SessionState) -> ApplyOutcome {
        if let Some(active) = self.active.take() {
            active.cancel_flag.store(true, Ordering::Relaxed);
            debug!(session_id = %active.session.id(), state = ?state, "Stream session finished");
        }
        self.conversation.touch();
        ApplyOutcome::Finished(state)
    }

    /// The assistant message currently being streamed into, appended if absent.
    fn in_progress_slot(&mut self) -> &mut Message {
        let messages = self.conversation.messages_mut();
        if !messages.last().is_some_and(Message::is_in_progress) {
            messages.push(Message::placeholder());
        }
        let last = messages.len() - 1;
        &mut messages[last]
    }
}
