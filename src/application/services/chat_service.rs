//! Message collection for the active channel and the send path.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::application::state::AppState;
use crate::application::sync::{Backoff, CollectionSync};
use crate::domain::entities::{Message, NewMessage};
use crate::domain::errors::{RemoteError, SyncError};
use crate::domain::ports::{RealtimePort, RemoteDataPort};
use crate::domain::SyncRecord;

/// Keeps the active channel's messages live and posts new ones.
pub struct ChatService {
    data: Arc<dyn RemoteDataPort>,
    state: Arc<AppState>,
    messages: Arc<CollectionSync<Message>>,
}

/// Background task re-selecting messages when the active channel changes.
/// Stops when dropped.
#[derive(Debug)]
pub struct FollowHandle {
    task: JoinHandle<()>,
}

impl FollowHandle {
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for FollowHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ChatService {
    #[must_use]
    pub fn new(
        data: Arc<dyn RemoteDataPort>,
        realtime: Arc<dyn RealtimePort>,
        backoff: Backoff,
        state: Arc<AppState>,
    ) -> Self {
        let messages = Arc::new(CollectionSync::new(Arc::clone(&data), realtime, backoff));
        Self {
            data,
            state,
            messages,
        }
    }

    #[must_use]
    pub fn messages(&self) -> &CollectionSync<Message> {
        &self.messages
    }

    /// Selects the message collection for `channel_id` directly.
    pub async fn select_channel(&self, channel_id: Option<&str>) {
        self.messages.select(channel_id).await;
    }

    /// Follows the active channel in [`AppState`], selecting the current one
    /// right away.
    #[must_use]
    pub fn follow(&self) -> FollowHandle {
        let messages = Arc::clone(&self.messages);
        let mut active = self.state.watch_active_channel();

        let task = tokio::spawn(async move {
            loop {
                let key = active
                    .borrow_and_update()
                    .as_ref()
                    .map(|channel| channel.id().as_str().to_string());
                messages.select(key.as_deref()).await;

                if active.changed().await.is_err() {
                    debug!("Active channel feed closed, no longer following");
                    break;
                }
            }
        });

        FollowHandle { task }
    }

    /// Posts `content` to the active channel as the current principal.
    ///
    /// Blank content, a missing channel or a missing principal are ignored.
    /// The new message is not added locally; it shows up through the push
    /// subscription or the next catch-up.
    ///
    /// # Errors
    /// Returns [`SyncError::Remote`] if the backend rejects the insert.
    pub async fn send(&self, content: &str) -> Result<(), SyncError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(());
        }

        let Some(channel) = self.state.active_channel() else {
            warn!("Cannot send message: no active channel");
            return Ok(());
        };
        let Some(user_id) = self.state.principal() else {
            warn!("Cannot send message: not authenticated");
            return Ok(());
        };

        let row = NewMessage {
            user_id,
            content: content.to_string(),
            channel_id: channel.id().clone(),
        };
        let row = serde_json::to_value(&row).map_err(RemoteError::from)?;

        if let Err(e) = self.data.insert(Message::TABLE, row).await {
            error!(channel = %channel.id(), error = %e, "Failed to send message");
            return Err(e.into());
        }

        debug!(channel = %channel.id(), "Message sent");
        Ok(())
    }
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("messages", &self.messages)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Channel;
    use crate::domain::ports::mocks::{MockRealtime, MockRemoteDataPort};
    use chrono::Utc;
    use serde_json::json;

    fn service(data: MockRemoteDataPort, state: AppState) -> (ChatService, Arc<AppState>) {
        let state = Arc::new(state);
        let service = ChatService::new(
            Arc::new(data),
            Arc::new(MockRealtime::new()),
            Backoff::default(),
            Arc::clone(&state),
        );
        (service, state)
    }

    fn channel(id: &str) -> Channel {
        Channel::new(id, "g1", "general", Utc::now())
    }

    #[tokio::test]
    async fn test_send_inserts_trimmed_message() {
        let mut data = MockRemoteDataPort::new();
        data.expect_insert()
            .withf(|table, row| {
                table.to_string() == "messages"
                    && *row == json!({ "user_id": "u1", "content": "hello", "channel_id": "c1" })
            })
            .times(1)
            .returning(|_, row| Ok(row));

        let state = AppState::with_principal("u1");
        state.set_active_channel(Some(channel("c1")));
        let (service, _state) = service(data, state);

        service.send("  hello \n").await.unwrap();
    }

    #[tokio::test]
    async fn test_send_ignores_blank_content() {
        let state = AppState::with_principal("u1");
        state.set_active_channel(Some(channel("c1")));
        let (service, _state) = service(MockRemoteDataPort::new(), state);

        assert!(service.send("   ").await.is_ok());
    }

    #[tokio::test]
    async fn test_send_without_channel_or_principal_is_a_no_op() {
        let (service, state) = service(MockRemoteDataPort::new(), AppState::new());
        assert!(service.send("hello").await.is_ok());

        state.set_active_channel(Some(channel("c1")));
        assert!(service.send("hello").await.is_ok());
    }

    #[tokio::test]
    async fn test_send_failure_is_surfaced() {
        let mut data = MockRemoteDataPort::new();
        data.expect_insert()
            .returning(|_, _| Err(RemoteError::network("connection reset")));

        let state = AppState::with_principal("u1");
        state.set_active_channel(Some(channel("c1")));
        let (service, _state) = service(data, state);

        let err = service.send("hello").await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(RemoteError::Network { .. })));
    }

    #[tokio::test]
    async fn test_follow_selects_active_channel() {
        let mut data = MockRemoteDataPort::new();
        data.expect_query().returning(|query| {
            let channel = query.filters[0].value.clone();
            Ok(vec![json!({
                "id": if channel == "c1" { 1 } else { 2 },
                "user_id": "u1",
                "content": format!("hello {channel}"),
                "inserted_at": "2024-05-01T10:00:00Z",
                "channel_id": channel,
            })])
        });

        let state = AppState::with_principal("u1");
        state.set_active_channel(Some(channel("c1")));
        let (service, state) = service(data, state);
        let mut view = service.messages().watch();

        let _follow = service.follow();
        view.wait_for(|m| m.first().is_some_and(|m| m.content() == "hello c1"))
            .await
            .unwrap();

        state.set_active_channel(Some(channel("c2")));
        view.wait_for(|m| m.first().is_some_and(|m| m.content() == "hello c2"))
            .await
            .unwrap();
        assert_eq!(service.messages().active_key().as_deref(), Some("c2"));

        state.set_active_channel(None);
        view.wait_for(Vec::is_empty).await.unwrap();
    }
}
