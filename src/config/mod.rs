//! Configuration management for the offline engine

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Local object store settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Background synchronization settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Cache strategy routing rules
    #[serde(default)]
    pub routes: RouteConfig,
}

/// Remote server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the application origin and sync API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout applied to every network request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Local object store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database location (defaults to the platform data directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Shared storage budget across all collections
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: u64,

    /// Retention horizon for cached content and synced records
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

/// Background synchronization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Whether record-producing operations enqueue sync items
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Drain cadence while in the foreground
    #[serde(default = "default_active_interval_secs")]
    pub active_interval_secs: u64,

    /// Drain cadence while backgrounded
    #[serde(default = "default_background_interval_secs")]
    pub background_interval_secs: u64,

    /// Maximum queue items delivered per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delivery attempts before an item is dropped as a terminal failure
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay after a failed batch
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Backoff ceiling
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,

    /// Delivery rate once a sync endpoint has answered 429
    #[serde(default = "default_rate_limit_per_second")]
    pub rate_limit_per_second: u32,
}

/// Cache strategy routing rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// App-shell paths served cache-first
    #[serde(default = "default_manifest")]
    pub manifest: Vec<String>,

    /// Path prefixes of dynamic content served network-first
    #[serde(default = "default_content_prefixes")]
    pub content_prefixes: Vec<String>,

    /// File extensions served stale-while-revalidate
    #[serde(default = "default_asset_extensions")]
    pub asset_extensions: Vec<String>,

    /// Third-party analytics hosts served stale-while-revalidate
    #[serde(default)]
    pub analytics_hosts: Vec<String>,

    /// Concurrent requests used when pre-caching the manifest
    #[serde(default = "default_precache_concurrency")]
    pub precache_concurrency: usize,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_quota_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_retention_days() -> i64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_active_interval_secs() -> u64 {
    2 * 60
}

fn default_background_interval_secs() -> u64 {
    10 * 60
}

fn default_batch_size() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_secs() -> u64 {
    5
}

fn default_backoff_max_secs() -> u64 {
    5 * 60
}

fn default_rate_limit_per_second() -> u32 {
    5
}

fn default_manifest() -> Vec<String> {
    ["/", "/index.html", "/app.js", "/app.css", "/manifest.json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_content_prefixes() -> Vec<String> {
    vec!["/training/".to_string(), "/content/".to_string()]
}

fn default_asset_extensions() -> Vec<String> {
    ["png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "css", "woff", "woff2"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_precache_concurrency() -> usize {
    4
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            quota_bytes: default_quota_bytes(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            active_interval_secs: default_active_interval_secs(),
            background_interval_secs: default_background_interval_secs(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            rate_limit_per_second: default_rate_limit_per_second(),
        }
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
            content_prefixes: default_content_prefixes(),
            asset_extensions: default_asset_extensions(),
            analytics_hosts: Vec::new(),
            precache_concurrency: default_precache_concurrency(),
        }
    }
}

impl ServerConfig {
    /// Parsed base URL; `validate` guarantees this succeeds for loaded configs
    pub fn base_url(&self) -> Result<reqwest::Url> {
        reqwest::Url::parse(&self.base_url).map_err(|e| {
            ConfigError::Invalid(format!("server.base_url '{}': {}", self.base_url, e)).into()
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Longest retention horizon accepted by `validate`
pub const MAX_RETENTION_DAYS: i64 = 3650;

impl StorageConfig {
    pub fn retention(&self) -> Result<chrono::TimeDelta> {
        chrono::TimeDelta::try_days(self.retention_days).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "storage.retention_days {} is out of range",
                self.retention_days
            ))
            .into()
        })
    }
}

impl SyncConfig {
    pub fn active_interval(&self) -> Duration {
        Duration::from_secs(self.active_interval_secs)
    }

    pub fn background_interval(&self) -> Duration {
        Duration::from_secs(self.background_interval_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::Invalid(
            "Could not determine home directory".to_string(),
        ))?;

        Ok(home.join(".stowaway").join("config.yaml"))
    }

    /// Resolve an optional override to a concrete config path
    pub fn resolve_path(config_path: Option<&str>) -> Result<PathBuf> {
        match config_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Self::default_path(),
        }
    }

    /// Load configuration, falling back to defaults when no file exists
    pub fn load_at(config_path: Option<&str>) -> Result<Self> {
        let path = Self::resolve_path(config_path)?;
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SaveError(e.to_string()))?;

        std::fs::write(path, contents)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.server.base_url).map_err(|e| {
            ConfigError::Invalid(format!("server.base_url '{}': {}", self.server.base_url, e))
        })?;
        if self.sync.batch_size == 0 {
            return Err(ConfigError::Invalid("sync.batch_size must be at least 1".into()).into());
        }
        if self.sync.max_attempts == 0 {
            return Err(ConfigError::Invalid("sync.max_attempts must be at least 1".into()).into());
        }
        if self.server.request_timeout_secs == 0 {
            return Err(
                ConfigError::Invalid("server.request_timeout_secs must be at least 1".into()).into(),
            );
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.storage.retention_days) {
            return Err(ConfigError::Invalid(format!(
                "storage.retention_days must be between 1 and {}",
                MAX_RETENTION_DAYS
            ))
            .into());
        }
        if self.storage.quota_bytes == 0 {
            return Err(ConfigError::Invalid("storage.quota_bytes must be positive".into()).into());
        }
        Ok(())
    }

    /// Database file location
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.storage.path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
            .ok_or(crate::error::StoreError::NoDataDir)?;
        Ok(data_dir.join("stowaway").join("engine.db"))
    }
}
