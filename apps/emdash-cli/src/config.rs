//! Client configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `$XDG_CONFIG_HOME/emdash/config.toml` (`~/.config/emdash/config.toml`)
//! - Windows: `%APPDATA%/emdash/config.toml`
//!
//! `EMDASH_HOST`, `EMDASH_USERNAME` and `EMDASH_PASSWORD` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use emdash_protocol::constants::DEFAULT_HOST;
use emdash_sync::types::{DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY, DEFAULT_MAX_NODES};
use emdash_sync::{RetryPolicy, SyncConfig};
use serde::{Deserialize, Serialize};

/// Client configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Database base URL.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Concurrent transfers per run.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Records per `binary.find` request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Ceiling on records collected by one traversal.
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,

    /// Keep upload markers here instead of next to each file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidecar_dir: Option<PathBuf>,

    #[serde(default)]
    pub retry: RetrySection,
}

/// `[retry]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_host() -> String {
    DEFAULT_HOST.into()
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_nodes() -> usize {
    DEFAULT_MAX_NODES
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    15_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: Some(self.max_attempts.max(1)),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            username: String::new(),
            password: String::new(),
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
            max_nodes: default_max_nodes(),
            retry: RetrySection::default(),
            sidecar_dir: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("concurrency", &self.concurrency)
            .field("batch_size", &self.batch_size)
            .field("max_nodes", &self.max_nodes)
            .field("retry", &self.retry)
            .field("sidecar_dir", &self.sidecar_dir)
            .finish()
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found,
    /// then applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // The file may hold a password.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("EMDASH_HOST").filter(|v| !v.is_empty()) {
            self.host = host;
        }
        if let Some(username) = lookup("EMDASH_USERNAME").filter(|v| !v.is_empty()) {
            self.username = username;
        }
        if let Some(password) = lookup("EMDASH_PASSWORD") {
            self.password = password;
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            concurrency: self.concurrency,
            batch_size: self.batch_size,
            max_nodes: self.max_nodes,
            retry: self.retry.policy(),
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("emdash").join("config.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let base = match std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
                PathBuf::from(home).join(".config")
            }
        };
        Ok(base.join("emdash").join("config.toml"))
    }
}
