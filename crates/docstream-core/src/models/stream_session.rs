use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::stream_event::StreamEvent;

/// Lifecycle of a single streamed request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Started,
    Streaming,
    Complete,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Error)
    }

    /// Whether `self -> next` is a legal edge of the session state machine.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (_, Error) => !self.is_terminal(),
            (Idle, Started) => true,
            (Started, Streaming) | (Streaming, Streaming) => true,
            (Started, Complete) | (Streaming, Complete) => true,
            (Idle, _) | (Started, _) | (Streaming, _) => false,
            (Complete, _) | (Error, _) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("illegal stream transition from {from:?} to {to:?}")]
    IllegalTransition { from: SessionState, to: SessionState },
}

/// Transient state of one in-flight streamed request. Never persisted.
#[derive(Clone, Debug)]
pub struct StreamSession {
    id: Uuid,
    model: String,
    started_at: DateTime<Utc>,
    state: SessionState,
    accumulated_text: String,
}

impl StreamSession {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            model: model.into(),
            started_at: Utc::now(),
            state: SessionState::Idle,
            accumulated_text: String::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(session_id = %self.id, from = ?self.state, to = ?next, "Stream session transition");
        self.state = next;
        Ok(())
    }

    /// Advance the state machine for an event and refresh the accumulated text.
    pub fn observe(&mut self, event: &StreamEvent) -> Result<(), SessionError> {
        match event {
            StreamEvent::Start(_) => self.transition(SessionState::Started),
            StreamEvent::Delta(delta) => {
                self.transition(SessionState::Streaming)?;
                self.accumulated_text = join_text(&delta.message_content);
                Ok(())
            }
            StreamEvent::Complete(message) => {
                self.transition(SessionState::Complete)?;
                self.accumulated_text = message.text();
                Ok(())
            }
            StreamEvent::Error(_) => self.transition(SessionState::Error),
        }
    }
}

fn join_text(blocks: &[super::content::ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| b.as_text())
        .collect::<Vec<_>>()
        .join("\n")
}
