//! File-backed key-value store for persistence across sessions.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, trace};

use crate::domain::errors::StorageError;
use crate::domain::ports::KeyValueStorePort;

/// Stores each key in its own file under a directory.
///
/// File names are the hex SHA-256 of the key so arbitrary keys (including
/// URLs) map to safe paths. Writes go through a temp file and rename.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        debug!(path = %dir.display(), "Opened key-value store");
        Ok(Self { dir })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.kv", hex::encode(digest)))
    }
}

fn write_atomic(path: &Path, value: &str) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("Invalid path"))?;
    let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
    temp_file.write_all(value.as_bytes())?;
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl KeyValueStorePort for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path).await {
            Ok(value) => {
                trace!(key = %key, "Key-value store hit");
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let value = value.to_string();
        tokio::task::spawn_blocking(move || write_atomic(&path, &value))
            .await
            .map_err(|e| StorageError::unavailable(format!("write task failed: {e}")))??;
        trace!(key = %key, "Key-value store write");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_store() -> (FileKeyValueStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::open(temp_dir.path().join("kv"))
            .await
            .unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (store, _temp) = create_test_store().await;

        store.set("image-cache", r#"{"a":1}"#).await.unwrap();
        assert_eq!(
            store.get("image-cache").await.unwrap().as_deref(),
            Some(r#"{"a":1}"#)
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_absent() {
        let (store, _temp) = create_test_store().await;
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_and_remove() {
        let (store, _temp) = create_test_store().await;

        store.set("k", "one").await.unwrap();
        store.set("k", "two").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("two"));

        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.remove("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_url_keys_map_to_safe_files() {
        let (store, _temp) = create_test_store().await;
        let key = "https://x.test/a/b.png?token=1&x=../../etc";

        store.set(key, "v").await.unwrap();

        let mut entries = std::fs::read_dir(store.dir()).unwrap();
        let name = entries.next().unwrap().unwrap().file_name();
        let name = name.to_string_lossy();
        assert_eq!(name.len(), 64 + 3);
        assert!(name.ends_with(".kv"));
    }
}
