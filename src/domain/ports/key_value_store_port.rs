//! Durable string key-value storage port.

use async_trait::async_trait;

use crate::domain::errors::StorageError;

/// Port for a small durable string store (browser-local-storage style).
///
/// Implementations may be unavailable at any time; callers are expected to
/// degrade to in-memory behaviour when a call fails.
#[async_trait]
pub trait KeyValueStorePort: Send + Sync {
    /// Reads the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}
