use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    pub responses: ResponsesConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AccountConfig {
    /// Display name only, used in log lines.
    #[serde(default)]
    pub username: Option<String>,
    pub access_token: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: default_check_interval(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResponsesConfig {
    #[serde(rename = "default")]
    pub default_response: String,
    /// Checked in order; the first keyword found in the message wins.
    #[serde(default)]
    pub rules: Vec<ResponseRule>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ResponseRule {
    pub keyword: String,
    pub reply: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,
    #[serde(default = "default_responded_users_path")]
    pub responded_users_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            session_path: default_session_path(),
            responded_users_path: default_responded_users_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default)]
    pub verify_token: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            verify_token: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Optional file that receives a copy of every log line.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_api_base_url() -> String {
    "https://graph.facebook.com/v18.0".to_string()
}

fn default_check_interval() -> u64 {
    60
}

fn default_session_path() -> PathBuf {
    PathBuf::from("session.json")
}

fn default_responded_users_path() -> PathBuf {
    PathBuf::from("responded_users.json")
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl Config {
    /// Load from TOML, or from JSON when the path ends in `.json`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
        .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse TOML config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(content).context("Failed to parse JSON config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.account.access_token.trim().is_empty() {
            anyhow::bail!("account.access_token must not be empty");
        }

        if self.polling.enabled && self.polling.check_interval_seconds == 0 {
            anyhow::bail!("polling.check_interval_seconds must be greater than zero");
        }

        if let Some(pos) = self
            .responses
            .rules
            .iter()
            .position(|rule| rule.keyword.trim().is_empty())
        {
            anyhow::bail!("responses.rules[{}] has an empty keyword", pos);
        }

        if self.webhook.enabled && self.webhook.verify_token.is_empty() {
            anyhow::bail!("webhook.verify_token is required when the webhook is enabled");
        }

        if !self.polling.enabled && !self.webhook.enabled {
            anyhow::bail!("Both polling and webhook are disabled; nothing to run");
        }

        Ok(())
    }
}
