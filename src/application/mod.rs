//! Application layer: caches, sync engines and the services built on them.

/// Inline image cache.
pub mod image;
/// Chat and guild services.
pub mod services;
/// Shared selection state.
pub mod state;
/// Realtime collection sync.
pub mod sync;

pub use image::{CacheStats, ImageCache, ImageCacheConfig};
pub use services::{ChatService, FollowHandle, GuildService, ImageUpload};
pub use state::AppState;
pub use sync::{Backoff, CollectionSync};
