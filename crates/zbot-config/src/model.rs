use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration for the bot.
///
/// Every field has a default, so an empty YAML document (or no file at all)
/// yields a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BotConfig {
    /// Messages must start with this (case-insensitive) to trigger a reply.
    pub trigger_prefix: String,
    /// Prepended to every reply; messages starting with it are never answered.
    pub reply_prefix: String,
    /// Chat completion model name.
    pub model: String,
    /// Override for the OpenAI-compatible API base URL.
    pub openai_base_url: Option<String>,
    pub system_prompt: String,
    pub poll_interval_secs: u64,
    /// Minimum gap between two replies.
    pub cooldown_secs: u64,
    /// Non-system turns kept in the conversation history.
    pub max_context_messages: usize,
    /// Messages fetched per poll cycle.
    pub fetch_limit: usize,
    /// Chats shown by the interactive picker.
    pub list_limit: usize,
    /// How long a query waits on a locked chat.db.
    pub busy_timeout_ms: u64,
    /// Defaults to `~/Library/Messages/chat.db`.
    pub chat_db_path: Option<PathBuf>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            trigger_prefix: "@zbot".to_string(),
            reply_prefix: "🤖 ".to_string(),
            model: "gpt-4o-mini".to_string(),
            openai_base_url: None,
            system_prompt: "You are a helpful assistant in a group chat. \
                            Be as human sounding as possible and long winded."
                .to_string(),
            poll_interval_secs: 2,
            cooldown_secs: 6,
            max_context_messages: 20,
            fetch_limit: 30,
            list_limit: 30,
            busy_timeout_ms: 2000,
            chat_db_path: None,
        }
    }
}

impl BotConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Path of the Messages database, falling back to the standard location.
    pub fn chat_db_path(&self) -> PathBuf {
        self.chat_db_path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/"))
                .join("Library/Messages/chat.db")
        })
    }

    /// Check the values a running bot depends on.
    pub fn validate(&self) -> Result<(), String> {
        if self.trigger_prefix.trim().is_empty() {
            return Err("trigger_prefix must not be empty".into());
        }
        if self.poll_interval_secs == 0 {
            return Err("poll_interval_secs must be at least 1".into());
        }
        if self.fetch_limit == 0 {
            return Err("fetch_limit must be at least 1".into());
        }
        if self.model.trim().is_empty() {
            return Err("model must not be empty".into());
        }
        if self.max_context_messages == 0 {
            return Err("max_context_messages must be at least 1".into());
        }
        Ok(())
    }
}
