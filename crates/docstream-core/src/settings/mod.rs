pub mod document_limits;
pub mod error;
pub mod relay_settings;
pub mod settings_repository;

pub use document_limits::DocumentLimits;
pub use error::{SettingsError, SettingsResult};
pub use relay_settings::{AppSettings, RelaySettings};
pub use settings_repository::{SettingsJsonRepository, SettingsRepository};
