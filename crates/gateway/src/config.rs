//! Daemon configuration, loaded from a TOML file.
//!
//! Every section has defaults so a minimal config is just a `data_dir`
//! (and even that defaults to `~/.tether`). A leading `~` in paths is
//! expanded against the user's home directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tether_domain::config::{ApprovalPolicy, ModelPolicy, VerifyPolicy};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Root of the store's on-disk layout.
    #[serde(default = "d_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub model_policy: ModelPolicy,
    #[serde(default)]
    pub verify: VerifyPolicy,
    #[serde(default)]
    pub approval: ApprovalPolicy,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    /// Register the deterministic mock provider. Useful for smoke runs
    /// and demos; real adapters register through the provider kit.
    #[serde(default)]
    pub mock: bool,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("cannot parse config {}: {e}", path.display()))?;
        Ok(config)
    }

    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.data_dir)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Expand a leading `~` against the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

fn d_data_dir() -> String {
    "~/.tether".to_string()
}

fn d_host() -> String {
    "127.0.0.1".to_string()
}

fn d_port() -> u16 {
    7870
}
