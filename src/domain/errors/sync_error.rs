use thiserror::Error;

use super::RemoteError;

/// Failures of user-initiated write operations.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum SyncError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl SyncError {
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    #[must_use]
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }
}
