use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use super::error::{SettingsError, SettingsResult};
use super::relay_settings::AppSettings;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persistence for [`AppSettings`].
pub trait SettingsRepository: Send + Sync + 'static {
    fn load(&self) -> BoxFuture<'static, SettingsResult<AppSettings>>;
    fn save(&self, settings: AppSettings) -> BoxFuture<'static, SettingsResult<()>>;
}

/// Settings stored as a single JSON file.
pub struct SettingsJsonRepository {
    file_path: PathBuf,
}

impl SettingsJsonRepository {
    /// Create repository with XDG-compliant path
    pub fn new() -> SettingsResult<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SettingsError::PathError("Cannot determine config directory".into()))?;

        Ok(Self {
            file_path: config_dir.join("docstream").join("settings.json"),
        })
    }

    /// Create repository with custom path (for testing and `--config`)
    pub fn with_path(file_path: PathBuf) -> Self {
        Self { file_path }
    }

    pub fn storage_path(&self) -> &PathBuf {
        &self.file_path
    }
}

impl SettingsRepository for SettingsJsonRepository {
    fn load(&self) -> BoxFuture<'static, SettingsResult<AppSettings>> {
        let path = self.file_path.clone();

        Box::pin(async move {
            // First run: nothing saved yet
            if !tokio::fs::try_exists(&path).await? {
                return Ok(AppSettings::default());
            }

            let contents = tokio::fs::read_to_string(&path).await?;
            let settings: AppSettings = serde_json::from_str(&contents)?;
            Ok(settings)
        })
    }

    fn save(&self, settings: AppSettings) -> BoxFuture<'static, SettingsResult<()>> {
        let path = self.file_path.clone();

        Box::pin(async move {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let json = serde_json::to_string_pretty(&settings)?;

            // Write atomically using temp file + rename
            let temp_path = path.with_extension("json.tmp");
            tokio::fs::write(&temp_path, json).await?;
            tokio::fs::rename(&temp_path, &path).await?;

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SettingsJsonRepository::with_path(dir.path().join("settings.json"));
        let settings = repo.load().await.unwrap();
        assert_eq!(settings.relay.stream_timeout_secs, 60);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let repo = SettingsJsonRepository::with_path(path);

        let mut settings = AppSettings::default();
        settings.relay.default_model = "claude-3-haiku-20240307".to_string();
        settings.documents.max_lines = 120;
        repo.save(settings).await.unwrap();

        let loaded = repo.load().await.unwrap();
        assert_eq!(loaded.relay.default_model, "claude-3-haiku-20240307");
        assert_eq!(loaded.documents.max_lines, 120);
        assert!(!dir.path().join("nested").join("settings.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();
        let repo = SettingsJsonRepository::with_path(path);
        assert!(matches!(
            repo.load().await,
            Err(SettingsError::SerializationError(_))
        ));
    }
}
