//! Inline image cache.

mod cache;
pub mod data_url;

pub use cache::{
    CacheStats, DEFAULT_CACHE_VERSION, DEFAULT_EXPIRY, DEFAULT_MAX_ENTRIES, ImageCache,
    ImageCacheConfig,
};
