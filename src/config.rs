//! Configuration management for promptforge.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::llm::slack::PollPolicy;
use crate::sink::TICK_PERIOD;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            api_key: None,
            api_key_env: default_openai_key_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_slack_token_env")]
    pub token_env: String,
    /// Channel the Claude bot is invited to
    #[serde(default)]
    pub channel_id: String,
    /// Member id of the Claude bot
    #[serde(default)]
    pub bot_id: String,
}

fn default_slack_token_env() -> String {
    "SLACK_BOT_TOKEN".to_string()
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            token: None,
            token_env: default_slack_token_env(),
            channel_id: String::new(),
            bot_id: String::new(),
        }
    }
}

/// Retry timing of the Slack bridge, in seconds unless noted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval")]
    pub post_interval_secs: u64,
    #[serde(default = "default_budget")]
    pub post_timeout_secs: u64,
    #[serde(default = "default_reply_delay")]
    pub reply_delay_ms: u64,
    #[serde(default = "default_interval")]
    pub reply_interval_secs: u64,
    #[serde(default = "default_budget")]
    pub reply_timeout_secs: u64,
}

fn default_interval() -> u64 {
    5
}

fn default_budget() -> u64 {
    300
}

fn default_reply_delay() -> u64 {
    1000
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            post_interval_secs: default_interval(),
            post_timeout_secs: default_budget(),
            reply_delay_ms: default_reply_delay(),
            reply_interval_secs: default_interval(),
            reply_timeout_secs: default_budget(),
        }
    }
}

impl PollConfig {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy {
            post_interval: Duration::from_secs(self.post_interval_secs),
            post_budget: Duration::from_secs(self.post_timeout_secs),
            reply_delay: Duration::from_millis(self.reply_delay_ms),
            reply_interval: Duration::from_secs(self.reply_interval_secs),
            reply_budget: Duration::from_secs(self.reply_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where generation results are kept; defaults to ~/.promptforge/results
    #[serde(default)]
    pub results_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    /// Display refresh period in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_tick_ms() -> u64 {
    TICK_PERIOD.as_millis() as u64
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
        }
    }
}

fn resolve_secret(inline: &Option<String>, env_name: &str) -> Option<String> {
    inline
        .as_ref()
        .filter(|v| !v.is_empty())
        .cloned()
        .or_else(|| std::env::var(env_name).ok().filter(|v| !v.is_empty()))
}

impl AppConfig {
    pub fn home_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".promptforge"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            Self::parse(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Self::default()
        };

        if let Ok(channel) = std::env::var("PROMPTFORGE_SLACK_CHANNEL") {
            config.slack.channel_id = channel;
        }
        if let Ok(bot) = std::env::var("PROMPTFORGE_SLACK_BOT") {
            config.slack.bot_id = bot;
        }

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// OpenAI key from the config file or its environment variable.
    pub fn openai_key(&self) -> Option<String> {
        resolve_secret(&self.openai.api_key, &self.openai.api_key_env)
    }

    /// Slack bot token from the config file or its environment variable.
    pub fn slack_token(&self) -> Option<String> {
        resolve_secret(&self.slack.token, &self.slack.token_env)
    }

    pub fn results_dir(&self) -> Result<PathBuf> {
        match &self.storage.results_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::home_dir()?.join("results")),
        }
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.ui.tick_ms.max(1))
    }

    pub fn save_default() -> Result<PathBuf> {
        let config_path = Self::config_path()?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let default = Self::default();
        let content = toml::to_string_pretty(&default).context("Failed to serialize config")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;
        Ok(config_path)
    }
}
