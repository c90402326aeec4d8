use std::io;
use thiserror::Error;

pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Errors raised by the realtime push channel.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum RealtimeError {
    #[error("connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("connection closed with code {code}: {reason}")]
    Closed { code: u16, reason: String },

    #[error("websocket error: {message}")]
    WebSocket { message: String },

    #[error("subscription rejected: {message}")]
    Rejected { message: String },

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("channel closed")]
    ChannelClosed,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl RealtimeError {
    #[must_use]
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Returns whether the sync engine should schedule a reconnect.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::Closed { .. }
                | Self::WebSocket { .. }
                | Self::Timeout { .. }
                | Self::Rejected { .. }
                | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(RealtimeError::connection_failed("refused").should_retry());
        assert!(RealtimeError::timeout("join").should_retry());
        assert!(!RealtimeError::protocol("bad frame").should_retry());
        assert!(!RealtimeError::ChannelClosed.should_retry());
    }
}
