use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::conversation_repository::{
    BoxFuture, ConversationData, ConversationMetadata, ConversationRepository, validate_id,
};
use super::error::RepositoryResult;

/// In-memory repository for conversations. Used by tests and `--ephemeral` runs.
#[derive(Clone, Default)]
pub struct InMemoryConversationRepository {
    conversations: Arc<Mutex<HashMap<String, ConversationData>>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(&self) -> Vec<ConversationData> {
        let mut result: Vec<ConversationData> =
            self.conversations.lock().values().cloned().collect();
        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        result
    }
}

impl ConversationRepository for InMemoryConversationRepository {
    fn load_metadata(&self) -> BoxFuture<'static, RepositoryResult<Vec<ConversationMetadata>>> {
        let result = self.sorted().iter().map(ConversationData::metadata).collect();
        Box::pin(async move { Ok(result) })
    }

    fn load_one(&self, id: &str) -> BoxFuture<'static, RepositoryResult<Option<ConversationData>>> {
        let result = self.conversations.lock().get(id).cloned();
        Box::pin(async move { Ok(result) })
    }

    fn load_all(&self) -> BoxFuture<'static, RepositoryResult<Vec<ConversationData>>> {
        let result = self.sorted();
        Box::pin(async move { Ok(result) })
    }

    fn save(&self, id: &str, data: ConversationData) -> BoxFuture<'static, RepositoryResult<()>> {
        let conversations = self.conversations.clone();
        let id = id.to_string();

        Box::pin(async move {
            validate_id(&id)?;
            conversations.lock().insert(id, data);
            Ok(())
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        let conversations = self.conversations.clone();
        let id = id.to_string();

        Box::pin(async move {
            conversations.lock().remove(&id);
            Ok(())
        })
    }
}
