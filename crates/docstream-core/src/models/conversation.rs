use anyhow::{Context, Result};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::content::Message;
use crate::repositories::ConversationData;

/// An ordered, append-only list of messages plus its bookkeeping.
#[derive(Clone, Debug)]
pub struct Conversation {
    id: String,
    title: String,
    model_id: String,
    messages: Vec<Message>,
    created_at: SystemTime,
    updated_at: SystemTime,
}

impl Conversation {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            id: id.into(),
            title: title.into(),
            model_id: model_id.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Restore a conversation from persisted data
    pub fn from_data(data: ConversationData) -> Result<Self> {
        let messages = Self::deserialize_history(&data.message_history)
            .context("Failed to deserialize message history")?;

        let created_at = UNIX_EPOCH + Duration::from_secs(data.created_at.max(0) as u64);
        let updated_at = UNIX_EPOCH + Duration::from_secs(data.updated_at.max(0) as u64);

        Ok(Self {
            id: data.id,
            title: data.title,
            model_id: data.model_id,
            messages,
            created_at,
            updated_at,
        })
    }

    /// Snapshot for the conversation store.
    pub fn to_data(&self) -> Result<ConversationData> {
        Ok(ConversationData {
            id: self.id.clone(),
            title: self.title.clone(),
            model_id: self.model_id.clone(),
            message_history: self.serialize_history()?,
            created_at: unix_seconds(self.created_at),
            updated_at: unix_seconds(self.updated_at),
        })
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut Message> {
        self.updated_at = SystemTime::now();
        self.messages.last_mut()
    }

    /// Direct access for the reconciler, which owns in-place updates of the last slot.
    pub(crate) fn messages_mut(&mut self) -> &mut Vec<Message> {
        self.updated_at = SystemTime::now();
        &mut self.messages
    }

    pub fn touch(&mut self) {
        self.updated_at = SystemTime::now();
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: String) {
        self.title = title;
        self.touch();
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn set_model_id(&mut self, model_id: String) {
        self.model_id = model_id;
        self.touch();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn updated_at(&self) -> SystemTime {
        self.updated_at
    }

    /// Serialize message history to JSON string
    pub fn serialize_history(&self) -> Result<String> {
        serde_json::to_string(&self.messages).context("Failed to serialize message history")
    }

    /// Deserialize message history from JSON string
    pub fn deserialize_history(json: &str) -> Result<Vec<Message>> {
        serde_json::from_str(json).context("Failed to deserialize message history")
    }
}

fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_store_data() {
        let mut conversation = Conversation::new("conv-1", "Quote questions", "claude-3-5-sonnet");
        conversation.push(Message::user_text("What does tariff B cover?"));
        conversation.push(Message::assistant_text("Tariff B covers..."));

        let data = conversation.to_data().unwrap();
        assert_eq!(data.id, "conv-1");

        let restored = Conversation::from_data(data).unwrap();
        assert_eq!(restored.messages(), conversation.messages());
        assert_eq!(restored.title(), "Quote questions");
        assert_eq!(restored.model_id(), "claude-3-5-sonnet");
    }

    #[test]
    fn test_from_data_rejects_corrupt_history() {
        let data = ConversationData {
            id: "x".to_string(),
            title: "t".to_string(),
            model_id: "m".to_string(),
            message_history: "{not json".to_string(),
            created_at: 0,
            updated_at: 0,
        };
        assert!(Conversation::from_data(data).is_err());
    }
}
