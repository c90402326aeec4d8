//! Application configuration.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use super::args::CliArgs;
use crate::application::image::{DEFAULT_CACHE_VERSION, ImageCacheConfig};
use crate::application::sync::{
    Backoff, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
};

pub(super) const APP_NAME: &str = "guildsync";
pub(super) const APP_QUALIFIER: &str = "com";
pub(super) const APP_ORGANIZATION: &str = "linuxmobile";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to tracing level.
    #[must_use]
    pub const fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Hosted backend connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://abc.example.co`.
    #[serde(default)]
    pub url: String,

    /// Public (anonymous) API key.
    #[serde(default)]
    pub anon_key: String,

    /// User access token. Falls back to the anonymous key when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Storage bucket holding guild images.
    #[serde(default = "default_bucket")]
    pub storage_bucket: String,
}

impl BackendConfig {
    /// Returns true once both the URL and the anonymous key are set.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty() && !self.anon_key.trim().is_empty()
    }

    /// Token sent as the bearer credential.
    #[must_use]
    pub fn bearer_token(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.anon_key)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            access_token: None,
            storage_bucket: default_bucket(),
        }
    }
}

/// Image cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCacheSettings {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_expiry_secs")]
    pub expiry_secs: u64,

    /// Bumping this invalidates every persisted entry.
    #[serde(default = "default_cache_version")]
    pub version: String,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl ImageCacheSettings {
    /// Builds the cache configuration these settings describe.
    #[must_use]
    pub fn cache_config(&self) -> ImageCacheConfig {
        ImageCacheConfig {
            max_entries: self.max_entries,
            expiry: Duration::from_secs(self.expiry_secs),
            version: self.version.clone(),
            ..ImageCacheConfig::default()
        }
    }

    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for ImageCacheSettings {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            expiry_secs: default_expiry_secs(),
            version: default_cache_version(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

/// Realtime channel and reconnect settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeSettings {
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,
}

impl RealtimeSettings {
    /// Reconnect policy for the sync engines.
    #[must_use]
    pub const fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.reconnect_base_ms),
            Duration::from_millis(self.reconnect_max_ms),
            self.max_reconnect_attempts,
        )
    }

    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    #[must_use]
    pub const fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            join_timeout_secs: default_join_timeout_secs(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for persisted cache data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub image_cache: ImageCacheSettings,

    #[serde(default)]
    pub realtime: RealtimeSettings,
}

fn default_bucket() -> String {
    "guilds".to_string()
}

const fn default_max_entries() -> usize {
    50
}

const fn default_expiry_secs() -> u64 {
    86_400
}

fn default_cache_version() -> String {
    DEFAULT_CACHE_VERSION.to_string()
}

const fn default_fetch_timeout_secs() -> u64 {
    30
}

#[allow(clippy::cast_possible_truncation)]
const fn default_reconnect_base_ms() -> u64 {
    DEFAULT_BASE_DELAY.as_millis() as u64
}

#[allow(clippy::cast_possible_truncation)]
const fn default_reconnect_max_ms() -> u64 {
    DEFAULT_MAX_DELAY.as_millis() as u64
}

const fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

const fn default_heartbeat_interval_secs() -> u64 {
    25
}

const fn default_join_timeout_secs() -> u64 {
    10
}

impl AppConfig {
    /// Merges CLI arguments (and the environment variables clap reads for
    /// them) into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(data_dir) = &args.data_dir {
            self.data_dir = Some(data_dir.clone());
        }
        if let Some(url) = &args.url {
            self.backend.url.clone_from(url);
        }
        if let Some(anon_key) = &args.anon_key {
            self.backend.anon_key.clone_from(anon_key);
        }
        if let Some(token) = &args.access_token {
            self.backend.access_token = Some(token.clone());
        }
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Returns default data directory.
    #[must_use]
    pub fn default_data_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        Self::default_data_dir().map(|dir| dir.join("guildsync.log"))
    }

    /// Returns effective config path.
    #[must_use]
    pub fn effective_config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Self::default_config_path)
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }

    /// Returns the directory of the persistent key-value store.
    #[must_use]
    pub fn kv_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(Self::default_data_dir)
            .map(|dir| dir.join("kv"))
    }
}
