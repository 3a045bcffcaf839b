use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::ProviderKind;

/// Top-level configuration loaded from `~/.foreman/config.toml`.
///
/// Injected explicitly into the components that need it; nothing reads
/// configuration from ambient global state. Credentials are never stored
/// here -- provider CLIs handle their own authentication.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub approvals: ApprovalsConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Provider used when a start request does not name one.
    pub default: ProviderKind,
    /// Working directory handed to spawned agent processes.
    pub workdir: Option<String>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default: ProviderKind::Claude,
            workdir: None,
        }
    }
}

/// What the approval gate does when the timeout timer fires first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    Approve,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalsConfig {
    pub enabled: bool,
    /// Seconds before a pending request auto-resolves.
    pub timeout_seconds: u64,
    pub default_on_timeout: TimeoutAction,
    /// Tools that bypass the gate entirely -- no request is created.
    pub auto_allow_tools: Vec<String>,
    /// Tools explicitly classified safe.
    pub allow_tools: Vec<String>,
    /// Tools explicitly classified dangerous.
    pub deny_tools: Vec<String>,
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_seconds: 300,
            default_on_timeout: TimeoutAction::Deny,
            auto_allow_tools: vec!["Read".into(), "Glob".into(), "Grep".into()],
            allow_tools: Vec::new(),
            deny_tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HooksConfig {
    pub enabled: bool,
    /// Cap on retained asynchronous hook results.
    pub result_log_size: usize,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            result_log_size: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Load / reload
// ---------------------------------------------------------------------------

impl Config {
    /// Default config path (`~/.foreman/config.toml`).
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".foreman").join("config.toml")
    }

    /// Load from the default path, falling back to defaults when the file
    /// does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    /// Load from an explicit path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(cfg)
    }

    /// Re-read the file this config was loaded from, replacing `self`.
    pub fn reload_from(&mut self, path: impl Into<PathBuf>) -> Result<(), ConfigError> {
        *self = Self::load_from(path)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
