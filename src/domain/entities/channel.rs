//! Channel entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::GuildId;
use super::record::{ChangePolicy, SyncRecord};

/// Name of the channel created with every guild and preferred on selection.
pub const DEFAULT_CHANNEL_NAME: &str = "general";

/// Unique identifier for a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A text channel inside a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    id: ChannelId,
    guild_id: GuildId,
    name: String,
    #[serde(default)]
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl Channel {
    #[must_use]
    pub fn new(
        id: impl Into<ChannelId>,
        guild_id: impl Into<GuildId>,
        name: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            guild_id: guild_id.into(),
            name: name.into(),
            description: None,
            created_at,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub const fn id(&self) -> &ChannelId {
        &self.id
    }

    #[must_use]
    pub const fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns true for the guild's default channel.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_CHANNEL_NAME
    }
}

impl SyncRecord for Channel {
    type Id = ChannelId;

    const TABLE: &'static str = "channels";
    const KEY_COLUMN: Option<&'static str> = Some("guild_id");
    const ORDER_COLUMN: &'static str = "created_at";
    const POLICY: ChangePolicy = ChangePolicy::Full;

    fn id(&self) -> ChannelId {
        self.id.clone()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Insert payload for a new channel.
#[derive(Debug, Clone, Serialize)]
pub struct NewChannel {
    pub guild_id: GuildId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
