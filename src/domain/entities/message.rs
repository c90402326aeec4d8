use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{ChangePolicy, SyncRecord};
use super::{ChannelId, UserId};

/// Unique identifier for a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl MessageId {
    /// Returns the underlying value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A message posted to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    user_id: UserId,
    content: String,
    inserted_at: DateTime<Utc>,
    #[serde(default)]
    channel_id: Option<ChannelId>,
}

impl Message {
    /// Creates a message without a channel.
    #[must_use]
    pub fn new(
        id: MessageId,
        user_id: impl Into<UserId>,
        content: impl Into<String>,
        inserted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            content: content.into(),
            inserted_at,
            channel_id: None,
        }
    }

    /// Sets the channel the message belongs to.
    #[must_use]
    pub fn with_channel(mut self, channel_id: impl Into<ChannelId>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    #[must_use]
    pub const fn id(&self) -> MessageId {
        self.id
    }

    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub const fn inserted_at(&self) -> DateTime<Utc> {
        self.inserted_at
    }

    #[must_use]
    pub const fn channel_id(&self) -> Option<&ChannelId> {
        self.channel_id.as_ref()
    }
}

impl SyncRecord for Message {
    type Id = MessageId;

    const TABLE: &'static str = "messages";
    const KEY_COLUMN: Option<&'static str> = Some("channel_id");
    const ORDER_COLUMN: &'static str = "inserted_at";
    const POLICY: ChangePolicy = ChangePolicy::InsertsOnly;

    fn id(&self) -> MessageId {
        self.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.inserted_at
    }
}

/// Insert payload for a new message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMessage {
    pub user_id: UserId,
    pub content: String,
    pub channel_id: ChannelId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_backend_row() {
        let json = r#"{
            "id": 42,
            "user_id": "0c7d2c1e-5f1a-4d0e-9c55-0d1b6b1e9a11",
            "content": "hello",
            "inserted_at": "2024-05-01T10:15:30.123456+00:00",
            "channel_id": "c1"
        }"#;

        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.id(), MessageId(42));
        assert_eq!(message.content(), "hello");
        assert_eq!(message.channel_id().map(ChannelId::as_str), Some("c1"));
        assert_eq!(message.inserted_at().timestamp_subsec_micros(), 123_456);
    }

    #[test]
    fn test_channel_id_is_optional() {
        let json = r#"{"id":1,"user_id":"u","content":"x","inserted_at":"2024-05-01T10:15:30Z"}"#;
        let message: Message = serde_json::from_str(json).unwrap();
        assert!(message.channel_id().is_none());
    }
}
