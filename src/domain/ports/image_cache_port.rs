//! Port definition for fetching images into the inline image cache.

use async_trait::async_trait;
use bytes::Bytes;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur while resolving an image.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// Image not found in cache.
    #[error("Image not found: {0}")]
    NotFound(String),
    /// URL is empty or a null/undefined sentinel.
    #[error("Invalid image URL: {0:?}")]
    InvalidUrl(String),
    /// Failed to encode or decode image data.
    #[error("Decode error: {0}")]
    DecodeError(String),
    /// I/O error during cache operation.
    #[error("IO error: {0}")]
    IoError(String),
    /// Network error during download.
    #[error("Network error: {0}")]
    NetworkError(String),
}

/// Raw image payload returned by a fetcher.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    /// Response body.
    pub bytes: Bytes,
    /// `Content-Type` reported by the origin, if any.
    pub content_type: Option<String>,
}

impl FetchedImage {
    /// Creates a payload from raw bytes and an optional MIME type.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.map(String::from),
        }
    }
}

/// Port for downloading image bytes.
/// Implementations must be thread-safe.
#[async_trait]
pub trait ImageFetchPort: Send + Sync {
    /// Downloads the image at `url`.
    async fn fetch(&self, url: &str) -> CacheResult<FetchedImage>;
}
