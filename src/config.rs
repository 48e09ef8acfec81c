use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::api::DEFAULT_API_URL;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Bot API server, for self-hosted instances.
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Job queue capacity. Polling stalls while the queue is full.
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
    /// Number of concurrent workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Long-poll hold in seconds. 0 is short polling, only useful for testing.
    #[serde(default)]
    pub poll_timeout: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_jobs: default_max_jobs(),
            max_workers: default_max_workers(),
            poll_timeout: 0,
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_max_jobs() -> usize {
    100
}

fn default_max_workers() -> usize {
    10
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;

        if config.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("telegram.bot_token must not be empty");
        }
        if config.dispatch.max_jobs == 0 {
            anyhow::bail!("dispatch.max_jobs must be at least 1");
        }
        if config.dispatch.max_workers == 0 {
            anyhow::bail!("dispatch.max_workers must be at least 1");
        }

        Ok(config)
    }
}
