//! Realtime collection sync engine.

mod backoff;
mod collection_sync;
mod record_cache;

pub use backoff::{Backoff, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY};
pub use collection_sync::CollectionSync;
pub use record_cache::RecordCache;
