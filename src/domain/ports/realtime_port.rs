//! Realtime push channel port.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use super::remote_data_port::Filter;
use crate::domain::errors::RealtimeResult;

/// Kind of row change delivered by the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    /// Parses the backend's event type (`INSERT`, `UPDATE`, `DELETE`).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A single row change.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// New row image; `Null` for deletes.
    pub record: Value,
    /// Previous row image (at least the primary key for deletes).
    pub old_record: Value,
}

impl ChangeEvent {
    #[must_use]
    pub const fn insert(record: Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            record,
            old_record: Value::Null,
        }
    }

    #[must_use]
    pub const fn update(record: Value) -> Self {
        Self {
            kind: ChangeKind::Update,
            record,
            old_record: Value::Null,
        }
    }

    #[must_use]
    pub const fn delete(old_record: Value) -> Self {
        Self {
            kind: ChangeKind::Delete,
            record: Value::Null,
            old_record,
        }
    }
}

/// Transport status reported for a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubscriptionStatus {
    #[default]
    Connecting,
    Subscribed,
    ChannelError(String),
    TimedOut,
    Closed,
}

impl SubscriptionStatus {
    /// Returns true for statuses that call for a reconnect.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::ChannelError(_) | Self::TimedOut)
    }
}

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub table: String,
    pub filter: Option<Filter>,
}

/// Cancels a live subscription.
pub trait SubscriptionHandle: Send + Sync {
    /// Stops event delivery and releases the transport. Idempotent.
    fn unsubscribe(&self);
}

/// A live subscription: change events, transport status, and a handle.
pub struct Subscription {
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
    pub status: watch::Receiver<SubscriptionStatus>,
    pub handle: Box<dyn SubscriptionHandle>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

/// Port for the backend's row-level change feed.
#[async_trait]
pub trait RealtimePort: Send + Sync {
    /// Opens a subscription. The returned status starts at `Connecting`.
    async fn subscribe(&self, request: SubscriptionRequest) -> RealtimeResult<Subscription>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::domain::errors::RealtimeError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Test-side controller for one subscription.
    pub struct MockChannel {
        pub request: SubscriptionRequest,
        events: mpsc::UnboundedSender<ChangeEvent>,
        status: watch::Sender<SubscriptionStatus>,
        unsubscribed: Arc<AtomicBool>,
    }

    impl MockChannel {
        pub fn set_status(&self, status: SubscriptionStatus) {
            self.status.send_replace(status);
        }

        pub fn push(&self, event: ChangeEvent) {
            let _ = self.events.send(event);
        }

        pub fn is_unsubscribed(&self) -> bool {
            self.unsubscribed.load(Ordering::SeqCst)
        }
    }

    struct MockHandle(Arc<AtomicBool>);

    impl SubscriptionHandle for MockHandle {
        fn unsubscribe(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// In-process realtime port that hands out controllable channels.
    #[derive(Default)]
    pub struct MockRealtime {
        channels: parking_lot::Mutex<Vec<Arc<MockChannel>>>,
        failures: AtomicU32,
    }

    impl MockRealtime {
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes the next `count` subscribe calls fail outright.
        pub fn fail_next(&self, count: u32) {
            self.failures.store(count, Ordering::SeqCst);
        }

        pub fn subscription_count(&self) -> usize {
            self.channels.lock().len()
        }

        pub fn channel(&self, index: usize) -> Arc<MockChannel> {
            self.channels.lock()[index].clone()
        }

        pub fn last_channel(&self) -> Arc<MockChannel> {
            let channels = self.channels.lock();
            channels[channels.len() - 1].clone()
        }
    }

    #[async_trait]
    impl RealtimePort for MockRealtime {
        async fn subscribe(&self, request: SubscriptionRequest) -> RealtimeResult<Subscription> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(RealtimeError::connection_failed("scripted failure"));
            }

            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let (status_tx, status_rx) = watch::channel(SubscriptionStatus::Connecting);
            let unsubscribed = Arc::new(AtomicBool::new(false));

            self.channels.lock().push(Arc::new(MockChannel {
                request,
                events: events_tx,
                status: status_tx,
                unsubscribed: unsubscribed.clone(),
            }));

            Ok(Subscription {
                events: events_rx,
                status: status_rx,
                handle: Box::new(MockHandle(unsubscribed)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_kind_parse() {
        assert_eq!(ChangeKind::parse("INSERT"), Some(ChangeKind::Insert));
        assert_eq!(ChangeKind::parse("delete"), Some(ChangeKind::Delete));
        assert_eq!(ChangeKind::parse("TRUNCATE"), None);
    }

    #[test]
    fn test_failure_statuses() {
        assert!(SubscriptionStatus::TimedOut.is_failure());
        assert!(SubscriptionStatus::ChannelError("x".into()).is_failure());
        assert!(!SubscriptionStatus::Closed.is_failure());
        assert!(!SubscriptionStatus::Subscribed.is_failure());
    }
}
