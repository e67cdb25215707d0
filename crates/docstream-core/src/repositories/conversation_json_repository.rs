use std::path::PathBuf;

use tracing::{debug, warn};

use super::conversation_repository::{
    BoxFuture, ConversationData, ConversationMetadata, ConversationRepository, validate_id,
};
use super::error::{RepositoryError, RepositoryResult};

/// JSON file-based repository for conversations.
/// Stores each conversation as a separate file in ~/.config/docstream/conversations/
pub struct ConversationJsonRepository {
    conversations_dir: PathBuf,
}

impl ConversationJsonRepository {
    pub fn new() -> RepositoryResult<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| RepositoryError::InitializationError {
                message: "Could not determine config directory".to_string(),
            })?
            .join("docstream")
            .join("conversations");

        Ok(Self::with_dir(config_dir))
    }

    pub fn with_dir(conversations_dir: PathBuf) -> Self {
        Self { conversations_dir }
    }

    pub fn conversations_dir(&self) -> &PathBuf {
        &self.conversations_dir
    }

    fn get_conversation_path(&self, id: &str) -> PathBuf {
        self.conversations_dir.join(format!("{}.json", id))
    }
}

/// Every readable conversation file, newest first. Corrupt files are skipped.
fn read_all(conversations_dir: &PathBuf) -> RepositoryResult<Vec<ConversationData>> {
    std::fs::create_dir_all(conversations_dir)?;

    let mut conversations = Vec::new();
    for entry in std::fs::read_dir(conversations_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }

        let content = std::fs::read_to_string(&path)?;
        match serde_json::from_str::<ConversationData>(&content) {
            Ok(data) => conversations.push(data),
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "Skipping unreadable conversation file"
            ),
        }
    }

    conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(conversations)
}

impl ConversationRepository for ConversationJsonRepository {
    fn load_metadata(&self) -> BoxFuture<'static, RepositoryResult<Vec<ConversationMetadata>>> {
        let conversations_dir = self.conversations_dir.clone();

        Box::pin(async move {
            let all = tokio::task::spawn_blocking(move || read_all(&conversations_dir)).await??;
            Ok(all.iter().map(ConversationData::metadata).collect())
        })
    }

    fn load_one(&self, id: &str) -> BoxFuture<'static, RepositoryResult<Option<ConversationData>>> {
        let id = id.to_string();
        let path = self.get_conversation_path(&id);

        Box::pin(async move {
            validate_id(&id)?;
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            Ok(Some(serde_json::from_str(&content)?))
        })
    }

    fn load_all(&self) -> BoxFuture<'static, RepositoryResult<Vec<ConversationData>>> {
        let conversations_dir = self.conversations_dir.clone();

        Box::pin(async move {
            tokio::task::spawn_blocking(move || read_all(&conversations_dir)).await?
        })
    }

    fn save(&self, id: &str, data: ConversationData) -> BoxFuture<'static, RepositoryResult<()>> {
        let id = id.to_string();
        let path = self.get_conversation_path(&id);
        let conversations_dir = self.conversations_dir.clone();

        Box::pin(async move {
            validate_id(&id)?;
            tokio::fs::create_dir_all(&conversations_dir).await?;

            let json = serde_json::to_string_pretty(&data)?;

            // Write to file atomically (write to temp, then rename)
            let temp_path = path.with_extension("json.tmp");
            tokio::fs::write(&temp_path, json).await?;
            tokio::fs::rename(&temp_path, &path).await?;

            debug!(conversation_id = %id, "Conversation saved");
            Ok(())
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        let id = id.to_string();
        let path = self.get_conversation_path(&id);

        Box::pin(async move {
            validate_id(&id)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}
