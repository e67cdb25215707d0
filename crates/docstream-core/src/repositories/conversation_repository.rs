use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use super::error::{RepositoryError, RepositoryResult};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Listing row for `history`; built without deserializing the message history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMetadata {
    pub id: String,
    pub title: String,
    pub model_id: String,
    pub updated_at: i64,
}

/// Serializable conversation data for persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationData {
    pub id: String,
    pub title: String,
    pub model_id: String,
    pub message_history: String, // JSON-serialized Vec<Message>
    pub created_at: i64,         // Unix timestamp
    pub updated_at: i64,         // Unix timestamp
}

impl ConversationData {
    pub fn metadata(&self) -> ConversationMetadata {
        ConversationMetadata {
            id: self.id.clone(),
            title: self.title.clone(),
            model_id: self.model_id.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Ids double as file names, so separators and dot segments are refused.
pub fn validate_id(id: &str) -> RepositoryResult<()> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.chars().any(|c| matches!(c, '/' | '\\' | '\0'));
    if bad {
        return Err(RepositoryError::InvalidData {
            message: format!("Invalid conversation id: {id:?}"),
        });
    }
    Ok(())
}

/// Repository trait for conversation persistence
pub trait ConversationRepository: Send + Sync + 'static {
    /// Metadata for every stored conversation, newest first.
    fn load_metadata(&self) -> BoxFuture<'static, RepositoryResult<Vec<ConversationMetadata>>>;

    fn load_one(&self, id: &str) -> BoxFuture<'static, RepositoryResult<Option<ConversationData>>>;

    /// Every stored conversation, newest first.
    fn load_all(&self) -> BoxFuture<'static, RepositoryResult<Vec<ConversationData>>>;

    fn save(&self, id: &str, data: ConversationData) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Deleting a missing conversation is not an error.
    fn delete(&self, id: &str) -> BoxFuture<'static, RepositoryResult<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("3f1c-uuid").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("..").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id("a\\b").is_err());
    }
}
