use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// Server-side single-flight: at most one live stream per conversation id.
#[derive(Clone, Debug, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

/// Held for the lifetime of a stream; releases the conversation on drop.
#[derive(Debug)]
pub struct SessionGuard {
    registry: SessionRegistry,
    conversation_id: String,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `conversation_id`, or `None` if a stream for it is already live.
    pub fn try_acquire(&self, conversation_id: &str) -> Option<SessionGuard> {
        let inserted = self.active.lock().insert(conversation_id.to_string());
        if !inserted {
            return None;
        }
        debug!(conversation_id = %conversation_id, "Conversation stream registered");
        Some(SessionGuard {
            registry: self.clone(),
            conversation_id: conversation_id.to_string(),
        })
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.active.lock().contains(conversation_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

impl SessionGuard {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.active.lock().remove(&self.conversation_id);
        debug!(conversation_id = %self.conversation_id, "Conversation stream released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_rejected_until_release() {
        let registry = SessionRegistry::new();
        let guard = registry.try_acquire("conv-1").unwrap();
        assert!(registry.try_acquire("conv-1").is_none());
        assert!(registry.try_acquire("conv-2").is_some());
        assert!(registry.is_active("conv-1"));

        drop(guard);
        assert!(!registry.is_active("conv-1"));
        assert!(registry.try_acquire("conv-1").is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let registry = SessionRegistry::new();
        let other = registry.clone();
        let _guard = registry.try_acquire("conv").unwrap();
        assert!(other.try_acquire("conv").is_none());
        assert_eq!(other.active_count(), 1);
    }
}
