//! Guild entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;
use super::record::{ChangePolicy, SyncRecord};

/// Unique identifier for a guild.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuildId(String);

impl GuildId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GuildId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for GuildId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Guild (server) information.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Guild {
    id: GuildId,
    name: String,
    #[serde(default)]
    description: Option<String>,
    owner_id: UserId,
    created_at: DateTime<Utc>,
    #[serde(default)]
    image_url: Option<String>,
}

impl Guild {
    /// Creates a new guild with the given ID, name and owner.
    #[must_use]
    pub fn new(
        id: impl Into<GuildId>,
        name: impl Into<String>,
        owner_id: impl Into<UserId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            owner_id: owner_id.into(),
            created_at,
            image_url: None,
        }
    }

    /// Sets the guild description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the guild image URL.
    #[must_use]
    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Returns the guild ID.
    #[must_use]
    pub const fn id(&self) -> &GuildId {
        &self.id
    }

    /// Returns the guild name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub const fn owner_id(&self) -> &UserId {
        &self.owner_id
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    /// Replaces the image URL in place.
    pub fn set_image_url(&mut self, url: Option<String>) {
        self.image_url = url;
    }

    /// Returns true if `user` owns this guild.
    #[must_use]
    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.owner_id == user
    }

    /// Returns true if the image URL is a signed storage URL that can expire.
    #[must_use]
    pub fn has_signed_image(&self) -> bool {
        self.image_url.as_deref().is_some_and(|u| u.contains("token="))
    }
}

impl SyncRecord for Guild {
    type Id = GuildId;

    const TABLE: &'static str = "guilds";
    const KEY_COLUMN: Option<&'static str> = None;
    const ORDER_COLUMN: &'static str = "created_at";
    const POLICY: ChangePolicy = ChangePolicy::Full;

    fn id(&self) -> GuildId {
        self.id.clone()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Insert payload for a new guild.
#[derive(Debug, Clone, Serialize)]
pub struct NewGuild {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub owner_id: UserId,
}

/// Partial update for an existing guild.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GuildChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_image_detection() {
        let guild = Guild::new("g1", "Rustaceans", "u1", Utc::now());
        assert!(!guild.has_signed_image());

        let guild = guild.with_image_url("https://x.test/storage/v1/object/sign/guilds/a.png?token=abc");
        assert!(guild.has_signed_image());
    }

    #[test]
    fn test_guild_changes_skip_unset_fields() {
        let changes = GuildChanges {
            name: Some("new".to_string()),
            ..GuildChanges::default()
        };
        let json = serde_json::to_value(&changes).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "new" }));
    }
}
