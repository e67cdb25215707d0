use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::relay_service::EventStream;
use crate::models::{SessionHandle, StreamEvent};

/// A relay event tagged with the session it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionEnvelope {
    pub session_id: Uuid,
    pub event: StreamEvent,
}

/// Listener forwarding one session's events into the UI loop.
///
/// Detaching, or dropping the subscription, stops delivery immediately. The task also
/// ends on its own after forwarding a terminal event.
pub struct Subscription {
    session_id: Uuid,
    cancel_flag: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Forward `events` for `handle`'s session into `sender`.
pub fn subscribe(
    handle: &SessionHandle,
    events: EventStream,
    sender: UnboundedSender<SessionEnvelope>,
) -> Subscription {
    let session_id = handle.session_id;
    let cancel_flag = handle.cancel_flag.clone();
    let flag = cancel_flag.clone();

    let task = tokio::spawn(async move {
        let mut events = events;
        while let Some(event) = events.next().await {
            if flag.load(Ordering::Relaxed) {
                debug!(session_id = %session_id, "Listener detached, dropping remaining events");
                break;
            }
            let terminal = event.is_terminal();
            if sender.send(SessionEnvelope { session_id, event }).is_err() {
                break;
            }
            if terminal {
                break;
            }
        }
    });

    Subscription {
        session_id,
        cancel_flag,
        task,
    }
}

impl Subscription {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn detach(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
