//! LRU image cache that resolves URLs to inline data.
//!
//! Entries live in memory (bounded, least-recently-used eviction) and are
//! mirrored into a [`KeyValueStorePort`] as a single JSON blob so they
//! survive restarts. Every failure is absorbed here: callers always get a
//! usable string back, at worst the URL they passed in.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::data_url::{resolve_mime, to_data_url};
use crate::domain::errors::StorageError;
use crate::domain::ports::{ImageFetchPort, KeyValueStorePort};

/// Default maximum number of images kept in memory.
pub const DEFAULT_MAX_ENTRIES: usize = 50;
/// Default lifetime of a persisted entry.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);
/// Current persisted format tag.
pub const DEFAULT_CACHE_VERSION: &str = "v1";

const STORAGE_KEY: &str = "image-cache";
const VERSION_KEY: &str = "image-cache-version";

/// Tuning knobs for [`ImageCache`].
#[derive(Debug, Clone)]
pub struct ImageCacheConfig {
    pub max_entries: usize,
    pub expiry: Duration,
    pub version: String,
    pub storage_key: String,
    pub version_key: String,
}

impl Default for ImageCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            expiry: DEFAULT_EXPIRY,
            version: DEFAULT_CACHE_VERSION.to_string(),
            storage_key: STORAGE_KEY.to_string(),
            version_key: VERSION_KEY.to_string(),
        }
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.hit_rate, self.hits, self.misses
        )
    }
}

#[derive(Debug, Clone)]
struct CachedImage {
    data: String,
    stored_at: i64,
}

#[derive(Debug, Deserialize)]
struct PersistedEntry {
    url: String,
    #[serde(default)]
    timestamp: Option<i64>,
}

struct CacheState {
    entries: LruCache<String, CachedImage>,
    hits: u64,
    misses: u64,
}

type PendingFetch = Shared<BoxFuture<'static, Option<String>>>;

struct Inner {
    config: ImageCacheConfig,
    fetcher: Arc<dyn ImageFetchPort>,
    store: Arc<dyn KeyValueStorePort>,
    state: Mutex<CacheState>,
    inflight: Mutex<HashMap<String, PendingFetch>>,
    persist_lock: tokio::sync::Mutex<()>,
}

/// Shared handle to the image cache. Cloning is cheap.
#[derive(Clone)]
pub struct ImageCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("config", &self.inner.config)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn is_valid_url(url: &str) -> bool {
    !url.is_empty() && url != "null" && url != "undefined"
}

impl ImageCache {
    /// Creates an empty cache without reading persisted state.
    #[must_use]
    pub fn new(
        config: ImageCacheConfig,
        fetcher: Arc<dyn ImageFetchPort>,
        store: Arc<dyn KeyValueStorePort>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                fetcher,
                store,
                state: Mutex::new(CacheState {
                    entries: LruCache::unbounded(),
                    hits: 0,
                    misses: 0,
                }),
                inflight: Mutex::new(HashMap::new()),
                persist_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Creates a cache hydrated from the persistent store.
    ///
    /// A version mismatch discards the persisted entries and rewrites the
    /// version tag. Expired entries are skipped. Any storage or parse
    /// failure leaves the cache empty.
    pub async fn load(
        config: ImageCacheConfig,
        fetcher: Arc<dyn ImageFetchPort>,
        store: Arc<dyn KeyValueStorePort>,
    ) -> Self {
        let cache = Self::new(config, fetcher, store);

        match cache.read_persisted().await {
            Ok(entries) => {
                let mut state = cache.inner.state.lock();
                for (url, entry) in entries {
                    state.entries.put(url, entry);
                }
                evict_over_capacity(&mut state.entries, cache.inner.config.max_entries);
                debug!(count = state.entries.len(), "Loaded images from cache");
            }
            Err(e) => {
                warn!(error = %e, "Failed to load image cache, starting empty");
            }
        }

        cache
    }

    async fn read_persisted(&self) -> Result<Vec<(String, CachedImage)>, StorageError> {
        let config = &self.inner.config;
        let store = &self.inner.store;

        let version = store.get(&config.version_key).await?;
        if version.as_deref() != Some(config.version.as_str()) {
            debug!(
                found = ?version,
                expected = %config.version,
                "Image cache version mismatch, discarding persisted entries"
            );
            store.remove(&config.storage_key).await?;
            store.set(&config.version_key, &config.version).await?;
            return Ok(Vec::new());
        }

        let Some(raw) = store.get(&config.storage_key).await? else {
            return Ok(Vec::new());
        };
        let blob: Map<String, Value> =
            serde_json::from_str(&raw).map_err(|e| StorageError::serialization(e.to_string()))?;

        let now = now_millis();
        let expiry_ms = i64::try_from(config.expiry.as_millis()).unwrap_or(i64::MAX);
        let mut entries = Vec::with_capacity(blob.len());

        for (url, value) in blob {
            let Ok(persisted) = serde_json::from_value::<PersistedEntry>(value) else {
                trace!(url = %url, "Skipping malformed persisted image entry");
                continue;
            };
            let stored_at = match persisted.timestamp {
                Some(ts) if now.saturating_sub(ts) >= expiry_ms => {
                    trace!(url = %url, "Skipping expired image entry");
                    continue;
                }
                Some(ts) => ts,
                None => now,
            };
            entries.push((
                url,
                CachedImage {
                    data: persisted.url,
                    stored_at,
                },
            ));
        }

        Ok(entries)
    }

    /// Resolves `url` to inline image data.
    ///
    /// Returns the cached value on a hit unless `force_refresh` is set.
    /// Concurrent misses for the same URL share one fetch. On failure (or
    /// for an empty/`"null"`/`"undefined"` URL) the input is returned as is.
    pub async fn get_image(&self, url: &str, force_refresh: bool) -> String {
        if !is_valid_url(url) {
            return url.to_string();
        }

        {
            let mut state = self.inner.state.lock();
            if !force_refresh {
                if let Some(data) = state.entries.get(url).map(|e| e.data.clone()) {
                    state.hits += 1;
                    trace!(url = %url, "Image cache hit");
                    return data;
                }
            } else {
                state.entries.promote(url);
            }
            state.misses += 1;
            trace!(url = %url, force_refresh, "Image cache miss");
        }

        self.pending_fetch(url)
            .await
            .unwrap_or_else(|| url.to_string())
    }

    fn pending_fetch(&self, url: &str) -> PendingFetch {
        let mut inflight = self.inner.inflight.lock();
        if let Some(pending) = inflight.get(url) {
            trace!(url = %url, "Joining in-flight image fetch");
            return pending.clone();
        }

        let cache = self.clone();
        let key = url.to_string();
        let pending = async move {
            let result = cache.fetch_and_store(&key).await;
            cache.inner.inflight.lock().remove(&key);
            result
        }
        .boxed()
        .shared();

        inflight.insert(url.to_string(), pending.clone());
        pending
    }

    async fn fetch_and_store(&self, url: &str) -> Option<String> {
        match self.inner.fetcher.fetch(url).await {
            Ok(image) => {
                let mime = resolve_mime(image.content_type.as_deref(), url);
                let data = to_data_url(&image.bytes, &mime);
                debug!(url = %url, mime = %mime, bytes = image.bytes.len(), "Fetched image");
                self.insert(url, data.clone());
                self.persist().await;
                Some(data)
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Image fetch failed, using original URL");
                None
            }
        }
    }

    /// Starts a background fetch for `url` unless it is invalid or cached.
    /// Returns the task handle when a fetch was scheduled.
    pub fn prefetch_image(&self, url: &str) -> Option<JoinHandle<()>> {
        if !is_valid_url(url) || self.contains(url) {
            return None;
        }
        let cache = self.clone();
        let url = url.to_string();
        Some(tokio::spawn(async move {
            cache.get_image(&url, false).await;
        }))
    }

    /// Inserts already-known inline data under `url` without fetching.
    pub async fn store_image(&self, url: &str, data: &str) {
        if !is_valid_url(url) || data.is_empty() {
            return;
        }
        self.insert(url, data.to_string());
        self.persist().await;
    }

    /// Empties the cache and persists the empty state.
    pub async fn clear_cache(&self) {
        self.inner.state.lock().entries.clear();
        debug!("Cleared image cache");
        self.persist().await;
    }

    /// Returns the cached data for `url` without touching recency.
    #[must_use]
    pub fn peek(&self, url: &str) -> Option<String> {
        self.inner
            .state
            .lock()
            .entries
            .peek(url)
            .map(|e| e.data.clone())
    }

    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.inner.state.lock().entries.contains(url)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        let total = state.hits + state.misses;
        let hit_rate = if total > 0 {
            (state.hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            hit_rate,
            size: state.entries.len(),
        }
    }

    fn insert(&self, url: &str, data: String) {
        let mut state = self.inner.state.lock();
        state.entries.put(
            url.to_string(),
            CachedImage {
                data,
                stored_at: now_millis(),
            },
        );
        evict_over_capacity(&mut state.entries, self.inner.config.max_entries);
    }

    async fn persist(&self) {
        let _guard = self.inner.persist_lock.lock().await;

        let blob = {
            let state = self.inner.state.lock();
            let mut map = Map::with_capacity(state.entries.len());
            // Oldest first, so reloading rebuilds the same recency order.
            for (url, entry) in state.entries.iter().rev() {
                map.insert(
                    url.clone(),
                    json!({ "url": entry.data, "timestamp": entry.stored_at }),
                );
            }
            Value::Object(map).to_string()
        };

        if let Err(e) = self.write_blob(&blob).await {
            warn!(error = %e, "Failed to persist image cache");
        }
    }

    async fn write_blob(&self, blob: &str) -> Result<(), StorageError> {
        let config = &self.inner.config;
        self.inner.store.set(&config.storage_key, blob).await?;
        self.inner
            .store
            .set(&config.version_key, &config.version)
            .await
    }
}

fn evict_over_capacity(entries: &mut LruCache<String, CachedImage>, max_entries: usize) {
    while entries.len() > max_entries {
        match entries.pop_lru() {
            Some((url, _)) => debug!(url = %url, "Evicted image from cache"),
            None => break,
        }
    }
}
