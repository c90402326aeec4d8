//! Infrastructure layer with external service adapters.

/// Application configuration.
pub mod config;
/// HTTP image fetching.
pub mod image;
/// Websocket change feed.
pub mod realtime;
/// REST table and storage client.
pub mod rest;
/// Key-value store adapters.
pub mod storage;

pub use config::{AppConfig, CliArgs, Command, ConfigError, ImageCommand, LogLevel, StorageManager};
pub use image::HttpImageFetcher;
pub use realtime::{RealtimeClient, RealtimeClientConfig};
pub use rest::RestDataClient;
pub use storage::{FileKeyValueStore, MemoryKeyValueStore};
