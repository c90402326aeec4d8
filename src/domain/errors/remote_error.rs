//! Remote data service error types.

use thiserror::Error;

/// Errors returned by the remote data service.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum RemoteError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("request rejected by backend: {message}")]
    Rejected { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("unexpected backend error: {message}")]
    Unexpected { message: String },
}

impl RemoteError {
    /// Creates network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates rejected error.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Creates not found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates unexpected error.
    #[must_use]
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Returns whether a later retry could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::RateLimited { .. })
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::network("reset").is_transient());
        assert!(RemoteError::RateLimited { retry_after_ms: 10 }.is_transient());
        assert!(!RemoteError::rejected("rls").is_transient());
        assert!(!RemoteError::serialization("bad json").is_transient());
    }
}
