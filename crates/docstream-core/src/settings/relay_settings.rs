use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::document_limits::DocumentLimits;
use crate::services::history::{CHAT_HISTORY_WINDOW, MAX_MESSAGE_CHARS};
use crate::services::provider_routes::ModelRoute;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
/// Hard deadline for a streamed completion, first byte to last.
pub const STREAM_TIMEOUT_SECS: u64 = 60;
/// Hard deadline for a warm-up ping.
pub const WARM_UP_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

/// Environment variables checked, in order, for the provider key.
pub const API_KEY_ENV_VARS: &[&str] = &["DOCSTREAM_API_KEY", "ANTHROPIC_API_KEY"];

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub default_model: String,
    pub stream_timeout_secs: u64,
    pub warm_up_timeout_secs: u64,
    pub history_window: usize,
    pub max_message_chars: usize,
    pub max_output_tokens: u32,
    /// Extra routing rows merged over the built-in table.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<ModelRoute>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            default_model: DEFAULT_MODEL.to_string(),
            stream_timeout_secs: STREAM_TIMEOUT_SECS,
            warm_up_timeout_secs: WARM_UP_TIMEOUT_SECS,
            history_window: CHAT_HISTORY_WINDOW,
            max_message_chars: MAX_MESSAGE_CHARS,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            routes: Vec::new(),
        }
    }
}

impl RelaySettings {
    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }

    pub fn warm_up_timeout(&self) -> Duration {
        Duration::from_secs(self.warm_up_timeout_secs)
    }

    /// Key from the environment, falling back to the configured one.
    pub fn resolve_api_key(&self) -> Option<String> {
        API_KEY_ENV_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|v| !v.trim().is_empty())
            .or_else(|| self.api_key.clone())
    }
}

/// Everything persisted in `settings.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub relay: RelaySettings,
    pub documents: DocumentLimits,
}
