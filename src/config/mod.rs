use crate::compaction::ContextBudget;
use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::provider::{API_KEY_ENV, RetryPolicy};
use crate::relay::{MAX_MESSAGE_LENGTH, RelaySettings};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the Discord bot token.
pub const DISCORD_TOKEN_ENV: &str = "DISCORD_TOKEN";
/// Environment variable overriding the model.
pub const MODEL_ENV: &str = "RELAY_MODEL";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub discord_token: Option<String>,
    pub openai_api_key: Option<String>,
    /// Chat model used for completions and token accounting.
    pub model: String,
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
    /// Context window of `model` in tokens. Default: 4096.
    pub context_window: usize,
    /// Tokens kept free for the model's reply. Default: 1024.
    pub response_reserve: usize,
    /// Turns loaded from history per exchange. Default: 20.
    pub history_limit: usize,
    /// Longest outbound message in characters. Default: 2000.
    pub max_message_length: usize,
    pub data_dir: PathBuf,
    /// Deadline per completion attempt. Default: 120.
    pub request_timeout_secs: u64,
    /// Retries for transient completion failures. Default: 2.
    pub max_retries: u32,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(secret: Option<&String>) -> &'static str {
            if secret.is_some() { "[REDACTED]" } else { "None" }
        }

        f.debug_struct("Config")
            .field("discord_token", &redact(self.discord_token.as_ref()))
            .field("openai_api_key", &redact(self.openai_api_key.as_ref()))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("context_window", &self.context_window)
            .field("response_reserve", &self.response_reserve)
            .field("history_limit", &self.history_limit)
            .field("max_message_length", &self.max_message_length)
            .field("data_dir", &self.data_dir)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .map(|d| d.join("chat-relay"))
            .unwrap_or_else(|| PathBuf::from(".chat-relay"));
        let budget = ContextBudget::default();

        Self {
            discord_token: None,
            openai_api_key: None,
            model: "gpt-3.5-turbo-0301".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            context_window: budget.context_window,
            response_reserve: budget.response_reserve,
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_message_length: MAX_MESSAGE_LENGTH,
            data_dir,
            request_timeout_secs: 120,
            max_retries: RetryPolicy::default().max_retries,
        }
    }
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("chat-relay").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".chat-relay/config.toml"))
    }

    /// Path to the history `SQLite` database.
    pub fn history_db_path(&self) -> PathBuf {
        self.data_dir.join("chat_history.sqlite")
    }

    /// Load from `path` (or the default location), then apply environment
    /// overrides. A missing file at the default location is not an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Config::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Environment wins over file values; empty variables are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty(DISCORD_TOKEN_ENV) {
            self.discord_token = Some(token);
        }
        if let Some(key) = non_empty(API_KEY_ENV) {
            self.openai_api_key = Some(key);
        }
        if let Some(model) = non_empty(MODEL_ENV) {
            self.model = model;
        }
    }

    /// Check settings the relay cannot run without.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::Error;

        if self.discord_token.is_none() {
            return Err(Error::Config(format!(
                "missing Discord token; set {DISCORD_TOKEN_ENV} or `discord_token`"
            )));
        }
        if self.openai_api_key.is_none() {
            return Err(crate::provider::Error::MissingApiKey {
                env_var: API_KEY_ENV,
            }
            .into());
        }
        self.validate_limits()
    }

    /// Checks that hold regardless of credentials.
    pub fn validate_limits(&self) -> crate::error::Result<()> {
        use crate::error::Error;

        if self.max_message_length == 0 {
            return Err(Error::Config("max_message_length must be positive".into()));
        }
        if self.history_limit == 0 {
            return Err(Error::Config("history_limit must be positive".into()));
        }
        if self.context_budget().available_tokens() == 0 {
            return Err(Error::Config(format!(
                "response_reserve ({}) leaves no room in context_window ({})",
                self.response_reserve, self.context_window
            )));
        }
        Ok(())
    }

    pub fn context_budget(&self) -> ContextBudget {
        ContextBudget {
            context_window: self.context_window,
            response_reserve: self.response_reserve,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            model: self.model.clone(),
            budget: self.context_budget(),
            max_message_length: self.max_message_length,
        }
    }
}
