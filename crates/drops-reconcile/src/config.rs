use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use drops_provider::{RetryPolicy, DEFAULT_API_URL, DEFAULT_PER_PAGE};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub reconcile: ReconcileConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_url: String,
    /// Environment variable holding the API token.
    pub token_env: String,
    pub per_page: u32,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token_env: "DIGITALOCEAN_TOKEN".to_string(),
            per_page: DEFAULT_PER_PAGE,
            retry_attempts: 10,
            retry_delay_ms: 3000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconcileConfig {
    pub desired_state: PathBuf,
    pub settle_seconds: u64,
    /// 0 disables the run timeout.
    pub timeout_seconds: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            desired_state: PathBuf::from("gitdrops.yaml"),
            settle_seconds: 10,
            timeout_seconds: 0,
        }
    }
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        Ok(cfg)
    }

    /// Defaults when `path` does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.provider.retry_attempts,
            Duration::from_millis(self.provider.retry_delay_ms),
        )
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.reconcile.settle_seconds)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.reconcile.timeout_seconds > 0).then(|| Duration::from_secs(self.reconcile.timeout_seconds))
    }

    /// Reads the API token from the configured environment variable.
    pub fn token(&self) -> Result<String> {
        let name = &self.provider.token_env;
        match std::env::var(name) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            Ok(_) => bail!("{name} is empty"),
            Err(_) => bail!("{name} is not set"),
        }
    }
}
