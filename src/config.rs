use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::audio::MimePolicy;

/// Everything the client needs, passed explicitly to the components that use it.
///
/// Sources, lowest priority first:
/// 1. built-in defaults
/// 2. `config.toml` (optional)
/// 3. `CHAT__<SECTION>__<KEY>` environment variables
/// 4. `GEMINI_API_KEY` for `ai.api_key`
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub identity: IdentityConfig,
    pub store: StoreConfig,
    pub ai: AiConfig,
    pub speech: SpeechConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// Namespace of the shared message collection
    pub app_id: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_id: "default-app-id".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct IdentityConfig {
    /// 用户ID持久化文件，保持重启间身份一致
    pub user_id_file: String,
    /// Nickname to start with; empty means ask the user
    pub nickname: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_id_file: "chat_user_id.txt".to_string(),
            nickname: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// Number of most recent messages in each feed snapshot
    pub feed_limit: usize,
    /// Maximum characters per message
    pub max_message_len: usize,
    /// Messages kept in memory; older ones are dropped
    pub retain_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            feed_limit: 50,
            max_message_len: 2000,
            retain_limit: 1000,
        }
    }
}

/// Which user messages start an AI turn.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AiTrigger {
    #[default]
    Always,
    Mention,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub system_prompt: String,
    /// Nickname shown on AI messages
    pub display_name: String,
    pub trigger: AiTrigger,
    /// Prefix that addresses the AI when `trigger = "mention"`
    pub mention_prefix: String,
    /// Number of recent messages sent as conversation context
    pub history_limit: usize,
    pub timeout_ms: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash-preview-05-20".to_string(),
            system_prompt: "You are a friendly assistant taking part in a group chat. \
                Keep replies short and conversational."
                .to_string(),
            display_name: "Gemini".to_string(),
            trigger: AiTrigger::Always,
            mention_prefix: "@ai".to_string(),
            history_limit: 20,
            timeout_ms: 60_000,
        }
    }
}

/// Where synthesized replies are played.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkKind {
    Null,
    /// Save each reply as `<dir>/<message id>.wav`
    File { dir: String },
    /// Pipe each reply into a player's stdin
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    pub model: String,
    pub voice: String,
    pub sink: SinkKind,
    pub player_timeout_ms: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "gemini-2.5-flash-preview-tts".to_string(),
            voice: "Kore".to_string(),
            sink: SinkKind::File {
                dir: "replies".to_string(),
            },
            player_timeout_ms: 120_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AudioConfig {
    pub mime_policy: MimePolicy,
}

impl Config {
    /// Load from `path` (required) or `./config.toml` (optional), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name("config").required(false),
        };

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("CHAT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("ai.api_key", std::env::var("GEMINI_API_KEY").ok())?
            .build()
            .context("Failed to read configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ai.api_key.trim().is_empty() {
            anyhow::bail!("No API key: set GEMINI_API_KEY or ai.api_key");
        }
        Url::parse(&self.ai.base_url)
            .with_context(|| format!("Invalid ai.base_url {:?}", self.ai.base_url))?;
        if self.store.feed_limit == 0 {
            anyhow::bail!("store.feed_limit must be greater than 0");
        }
        if self.store.max_message_len == 0 {
            anyhow::bail!("store.max_message_len must be greater than 0");
        }
        if self.ai.history_limit == 0 {
            anyhow::bail!("ai.history_limit must be greater than 0");
        }
        if self.store.retain_limit < self.store.feed_limit.max(self.ai.history_limit) {
            anyhow::bail!("store.retain_limit must cover store.feed_limit and ai.history_limit");
        }
        if self.ai.trigger == AiTrigger::Mention && self.ai.mention_prefix.trim().is_empty() {
            anyhow::bail!("ai.mention_prefix must be set when ai.trigger = \"mention\"");
        }
        Ok(())
    }

    /// Document path of the shared message collection.
    pub fn collection_path(&self) -> String {
        format!("artifacts/{}/public/data/messages", self.app.app_id)
    }
}
