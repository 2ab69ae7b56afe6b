use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PlacebotError, Result};

/// Top-level configuration for placebot.
///
/// Loaded from `~/.placebot/config.toml` by default. Every section falls back
/// to its defaults when missing from the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlacebotConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl PlacebotConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PlacebotConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| PlacebotError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values that would make the pipeline hang or sample greedily.
    pub fn validate(&self) -> Result<()> {
        let c = &self.completion;
        if !(c.temperature > 0.0 && c.temperature <= 1.0) {
            return Err(PlacebotError::Config(format!(
                "completion.temperature must be in (0, 1], got {}",
                c.temperature
            )));
        }
        if c.max_tokens == 0 {
            return Err(PlacebotError::Config(
                "completion.max_tokens must be greater than 0".to_string(),
            ));
        }
        if c.max_attempts == 0 {
            return Err(PlacebotError::Config(
                "completion.max_attempts must be at least 1".to_string(),
            ));
        }
        if c.timeout_secs == 0 {
            return Err(PlacebotError::Config(
                "completion.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.database.query_timeout_ms == 0 {
            return Err(PlacebotError::Config(
                "database.query_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.chat.max_message_length == 0 {
            return Err(PlacebotError::Config(
                "chat.max_message_length must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Placement database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite placement database.
    pub path: String,
    /// How long SQLite waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Upper bound for a single generated query.
    pub query_timeout_ms: u64,
    /// Rows kept from a single result set.
    pub max_rows: usize,
    /// Reuse the schema text for the lifetime of a connection.
    pub cache_schema: bool,
    /// Example rows appended per table in the schema text (0 disables).
    pub sample_rows: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "placementdb.sqlite".to_string(),
            busy_timeout_ms: 5_000,
            query_timeout_ms: 10_000,
            max_rows: 1_000,
            cache_schema: false,
            sample_rows: 3,
        }
    }
}

/// Text-completion service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Backend: "huggingface" or "openai".
    pub provider: String,
    /// Base URL of the completion endpoint.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Maximum tokens generated per completion.
    pub max_tokens: u32,
    /// Sampling temperature, in (0, 1].
    pub temperature: f32,
    /// Per-attempt timeout in seconds.
    pub timeout_secs: u64,
    /// Total attempts when the service is unavailable.
    pub max_attempts: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: "huggingface".to_string(),
            base_url: "https://api-inference.huggingface.co".to_string(),
            model: "mistralai/Mistral-7B-Instruct-v0.3".to_string(),
            api_key_env: "HF_TOKEN".to_string(),
            max_tokens: 512,
            temperature: 0.2,
            timeout_secs: 30,
            max_attempts: 2,
        }
    }
}

/// Conversation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum question length in characters.
    pub max_message_length: usize,
    /// Most recent history turns rendered into the prompt.
    pub history_turns: usize,
    /// Idle minutes before a session is dropped.
    pub session_timeout_minutes: u32,
    /// Assistant turn that opens every session. Empty disables it.
    pub greeting: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 2000,
            history_turns: 10,
            session_timeout_minutes: 30,
            greeting: "Hello! I'm a SQL assistant. Ask me anything about your database."
                .to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3030,
        }
    }
}
