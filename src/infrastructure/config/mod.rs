//! Application configuration.

pub mod app_config;
pub mod args;
pub mod storage;

pub use app_config::{AppConfig, BackendConfig, ImageCacheSettings, LogLevel, RealtimeSettings};
pub use args::{CliArgs, Command, ImageCommand};
pub use storage::{ConfigError, StorageManager};
