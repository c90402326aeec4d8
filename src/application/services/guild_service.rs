//! Guild and channel lists, selection, and owner-side management.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::application::image::ImageCache;
use crate::application::image::data_url::{extension_for_mime, to_data_url};
use crate::application::state::AppState;
use crate::application::sync::{Backoff, CollectionSync};
use crate::domain::SyncRecord;
use crate::domain::entities::{
    Channel, DEFAULT_CHANNEL_NAME, Guild, GuildChanges, GuildId, NewChannel, NewGuild,
    UNSCOPED_KEY, UserId,
};
use crate::domain::errors::{RemoteError, SyncError};
use crate::domain::ports::{RealtimePort, RemoteDataPort};

/// Lifetime of signed guild image URLs (one year).
pub const SIGNED_URL_TTL: Duration = Duration::from_secs(31_536_000);
/// Largest accepted guild image upload.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
/// Longest accepted guild or channel name, in characters.
pub const MAX_NAME_LEN: usize = 100;

const IMAGE_DIR: &str = "guild-images";
const DEFAULT_CHANNEL_DESCRIPTION: &str = "General discussion";

/// An image file picked for upload.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Bytes,
    pub content_type: String,
    pub file_name: String,
}

impl ImageUpload {
    #[must_use]
    pub fn new(
        bytes: impl Into<Bytes>,
        content_type: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
            file_name: file_name.into(),
        }
    }
}

/// Guild list, channel list for the active guild, and the write operations
/// that manage them.
pub struct GuildService {
    data: Arc<dyn RemoteDataPort>,
    images: ImageCache,
    state: Arc<AppState>,
    guilds: CollectionSync<Guild>,
    channels: CollectionSync<Channel>,
    bucket: String,
}

fn to_row<T: Serialize>(value: &T) -> Result<Value, RemoteError> {
    Ok(serde_json::to_value(value)?)
}

fn from_row<T: DeserializeOwned>(row: Value) -> Result<T, RemoteError> {
    Ok(serde_json::from_value(row)?)
}

fn validate_name(name: &str) -> Result<String, SyncError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SyncError::invalid_input("name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(SyncError::invalid_input(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn validate_channel_name(name: &str) -> Result<String, SyncError> {
    let name = validate_name(name)?;
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(SyncError::invalid_input(
            "channel names can only contain letters, numbers and dashes",
        ));
    }
    Ok(name)
}

/// Storage path of a guild image, taken from the file name of its URL.
fn storage_path_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let file = path.rsplit('/').next()?;
    (!file.is_empty()).then(|| format!("{IMAGE_DIR}/{file}"))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

impl GuildService {
    #[must_use]
    pub fn new(
        data: Arc<dyn RemoteDataPort>,
        realtime: Arc<dyn RealtimePort>,
        images: ImageCache,
        state: Arc<AppState>,
        backoff: Backoff,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            guilds: CollectionSync::new(Arc::clone(&data), Arc::clone(&realtime), backoff),
            channels: CollectionSync::new(Arc::clone(&data), realtime, backoff),
            data,
            images,
            state,
            bucket: bucket.into(),
        }
    }

    #[must_use]
    pub fn guilds(&self) -> Vec<Guild> {
        self.guilds.records()
    }

    #[must_use]
    pub fn channels(&self) -> Vec<Channel> {
        self.channels.records()
    }

    #[must_use]
    pub const fn guild_sync(&self) -> &CollectionSync<Guild> {
        &self.guilds
    }

    #[must_use]
    pub const fn channel_sync(&self) -> &CollectionSync<Channel> {
        &self.channels
    }

    /// Loads the guild list, refreshes signed image URLs, prefetches guild
    /// images, and activates the first guild if none is active.
    pub async fn load_guilds(&self) -> Vec<Guild> {
        self.guilds.select(Some(UNSCOPED_KEY)).await;

        for guild in self.guilds.records() {
            if guild.has_signed_image() {
                if let Some(url) = self.refresh_guild_image_url(&guild).await {
                    self.images.prefetch_image(&url);
                }
            } else if let Some(url) = guild.image_url() {
                self.images.prefetch_image(url);
            }
        }

        let guilds = self.guilds.records();
        debug!(count = guilds.len(), "Loaded guilds");
        match guilds.first() {
            None => self.reset_selection().await,
            Some(first) if self.state.active_guild().is_none() => {
                self.activate_guild(first.clone()).await;
            }
            Some(_) => {}
        }
        guilds
    }

    /// Makes `guild` active and selects one of its channels: the previously
    /// active channel if it is still there, else `general`, else the first.
    pub async fn set_active_guild(&self, guild: &Guild) {
        let mut guild = guild.clone();
        if guild.has_signed_image() {
            if let Some(url) = self.refresh_guild_image_url(&guild).await {
                guild.set_image_url(Some(url));
            }
        }
        self.activate_guild(guild).await;
    }

    async fn activate_guild(&self, guild: Guild) {
        let previous = self
            .state
            .active_channel()
            .filter(|c| c.guild_id() == guild.id());
        if previous.is_none() {
            self.state.set_active_channel(None);
        }

        info!(guild = %guild.id(), name = %guild.name(), "Activating guild");
        let guild_id = guild.id().clone();
        self.state.set_active_guild(Some(guild));
        self.channels.select(Some(guild_id.as_str())).await;

        let channels = self.channels.records();
        let next = previous
            .and_then(|p| channels.iter().find(|c| c.id() == p.id()).cloned())
            .or_else(|| channels.iter().find(|c| c.is_default()).cloned())
            .or_else(|| channels.first().cloned());
        self.state.set_active_channel(next);
    }

    pub fn set_active_channel(&self, channel: Channel) {
        self.state.set_active_channel(Some(channel));
    }

    async fn reset_selection(&self) {
        self.state.clear_selection();
        self.channels.select(None).await;
    }

    fn require_principal(&self) -> Result<UserId, SyncError> {
        self.state.principal().ok_or(SyncError::NotAuthenticated)
    }

    fn owned_guild(&self, guild_id: &GuildId, user: &UserId, action: &str) -> Result<Guild, SyncError> {
        let guild = self
            .guilds
            .records()
            .into_iter()
            .find(|g| g.id() == guild_id)
            .ok_or_else(|| SyncError::not_found(format!("guild {guild_id}")))?;
        if !guild.is_owned_by(user) {
            return Err(SyncError::forbidden(format!(
                "only the guild owner can {action}"
            )));
        }
        Ok(guild)
    }

    /// Creates a guild owned by the current principal, with a default
    /// `general` channel and an optional image, and makes it active.
    ///
    /// # Errors
    /// Fails if nobody is signed in, the name is invalid, or the guild
    /// insert is rejected. Image and default-channel failures are logged.
    pub async fn create_guild(
        &self,
        name: &str,
        description: Option<&str>,
        image: Option<ImageUpload>,
    ) -> Result<Guild, SyncError> {
        let owner_id = self.require_principal()?;
        let name = validate_name(name)?;

        let row = to_row(&NewGuild {
            name,
            description: non_empty(description),
            owner_id,
        })?;
        let mut guild: Guild = from_row(self.data.insert(Guild::TABLE, row).await?)?;
        info!(guild = %guild.id(), "Created guild");

        if let Some(image) = image {
            match self.upload_guild_image(image).await {
                Ok(url) => match self.set_guild_image(guild.id(), url).await {
                    Ok(updated) => guild = updated,
                    Err(e) => warn!(guild = %guild.id(), error = %e, "Failed to attach guild image"),
                },
                Err(e) => warn!(guild = %guild.id(), error = %e, "Failed to upload guild image"),
            }
        }

        self.guilds.insert_local(UNSCOPED_KEY, guild.clone());
        let default_channel = self.create_default_channel(guild.id()).await;

        self.state.set_active_guild(Some(guild.clone()));
        self.state.set_active_channel(None);
        self.channels.select(Some(guild.id().as_str())).await;

        let active = match default_channel {
            Some(channel) => {
                self.channels
                    .insert_local(guild.id().as_str(), channel.clone());
                Some(channel)
            }
            None => self.channels.records().into_iter().next(),
        };
        self.state.set_active_channel(active);

        Ok(guild)
    }

    async fn set_guild_image(&self, guild_id: &GuildId, url: String) -> Result<Guild, RemoteError> {
        let changes = to_row(&GuildChanges {
            image_url: Some(url),
            ..GuildChanges::default()
        })?;
        from_row(
            self.data
                .update(Guild::TABLE, guild_id.as_str(), changes)
                .await?,
        )
    }

    async fn create_default_channel(&self, guild_id: &GuildId) -> Option<Channel> {
        let row = NewChannel {
            guild_id: guild_id.clone(),
            name: DEFAULT_CHANNEL_NAME.to_string(),
            description: Some(DEFAULT_CHANNEL_DESCRIPTION.to_string()),
        };
        let result = match to_row(&row) {
            Ok(row) => self.data.insert(Channel::TABLE, row).await.and_then(from_row::<Channel>),
            Err(e) => Err(e),
        };
        match result {
            Ok(channel) => Some(channel),
            Err(e) => {
                warn!(guild = %guild_id, error = %e, "Failed to create default channel");
                None
            }
        }
    }

    /// Creates a channel in a guild owned by the current principal and makes
    /// it active.
    ///
    /// # Errors
    /// Fails if nobody is signed in, the guild is unknown or not owned by
    /// the principal, the name is invalid, or the insert is rejected.
    pub async fn create_channel(
        &self,
        guild_id: &GuildId,
        name: &str,
        description: Option<&str>,
    ) -> Result<Channel, SyncError> {
        let user = self.require_principal()?;
        self.owned_guild(guild_id, &user, "create channels")?;
        let name = validate_channel_name(name)?;

        let row = to_row(&NewChannel {
            guild_id: guild_id.clone(),
            name,
            description: non_empty(description),
        })?;
        let channel: Channel = from_row(self.data.insert(Channel::TABLE, row).await?)?;
        info!(guild = %guild_id, channel = %channel.id(), "Created channel");

        self.channels
            .insert_local(guild_id.as_str(), channel.clone());
        self.state.set_active_channel(Some(channel.clone()));
        Ok(channel)
    }

    /// Renames a guild, replaces its description, and optionally its image.
    ///
    /// # Errors
    /// Fails on missing principal, unknown or foreign guild, invalid name,
    /// or a rejected update. A failed image upload keeps the old image.
    pub async fn update_guild(
        &self,
        guild_id: &GuildId,
        name: &str,
        description: Option<&str>,
        image: Option<ImageUpload>,
    ) -> Result<Guild, SyncError> {
        let user = self.require_principal()?;
        let guild = self.owned_guild(guild_id, &user, "update the guild")?;
        let name = validate_name(name)?;

        let mut image_url = guild.image_url().map(String::from);
        if let Some(image) = image {
            match self.upload_guild_image(image).await {
                Ok(url) => image_url = Some(url),
                Err(e) => warn!(guild = %guild_id, error = %e, "Failed to upload guild image"),
            }
        }

        let changes = to_row(&GuildChanges {
            name: Some(name),
            description: non_empty(description),
            image_url,
        })?;
        let updated: Guild = from_row(
            self.data
                .update(Guild::TABLE, guild_id.as_str(), changes)
                .await?,
        )?;
        info!(guild = %guild_id, "Updated guild");

        self.guilds.replace_local(UNSCOPED_KEY, updated.clone());
        if self
            .state
            .active_guild()
            .is_some_and(|g| g.id() == guild_id)
        {
            self.state.set_active_guild(Some(updated.clone()));
        }
        Ok(updated)
    }

    /// Deletes a guild owned by the current principal. If it was active,
    /// the first remaining guild becomes active.
    ///
    /// # Errors
    /// Fails on missing principal, unknown or foreign guild, or a rejected
    /// delete.
    pub async fn delete_guild(&self, guild_id: &GuildId) -> Result<(), SyncError> {
        let user = self.require_principal()?;
        self.owned_guild(guild_id, &user, "delete the guild")?;

        self.data.delete(Guild::TABLE, guild_id.as_str()).await?;
        info!(guild = %guild_id, "Deleted guild");
        self.guilds.remove_local(UNSCOPED_KEY, guild_id);

        let was_active = self
            .state
            .active_guild()
            .is_some_and(|g| g.id() == guild_id);
        if was_active {
            match self.guilds.records().into_iter().next() {
                Some(next) => self.set_active_guild(&next).await,
                None => self.reset_selection().await,
            }
        }
        Ok(())
    }

    /// Uploads a guild image and returns a one-year signed URL for it. The
    /// image is stored in the image cache under that URL.
    ///
    /// # Errors
    /// Rejects non-image content types and files over [`MAX_IMAGE_BYTES`];
    /// otherwise fails if the upload or URL signing is rejected.
    pub async fn upload_guild_image(&self, image: ImageUpload) -> Result<String, SyncError> {
        let mime = image.content_type.trim().to_ascii_lowercase();
        if !mime.starts_with("image/") {
            return Err(SyncError::invalid_input("only image files are allowed"));
        }
        if image.bytes.len() > MAX_IMAGE_BYTES {
            return Err(SyncError::invalid_input("image size must be less than 5MB"));
        }

        let ext = image
            .file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .or_else(|| extension_for_mime(&mime).map(String::from))
            .unwrap_or_else(|| "bin".to_string());
        let path = format!("{IMAGE_DIR}/{}.{ext}", Utc::now().timestamp_millis());
        let data_url = to_data_url(&image.bytes, &mime);

        self.data
            .upload(&self.bucket, &path, image.bytes, &mime)
            .await?;
        let url = self
            .data
            .signed_url(&self.bucket, &path, SIGNED_URL_TTL)
            .await?;
        info!(path = %path, "Uploaded guild image");

        self.images.store_image(&url, &data_url).await;
        Ok(url)
    }

    /// Issues a fresh signed URL for a guild's image and moves any cached
    /// image data over to it. Returns `None` if the guild has no image or
    /// signing fails.
    pub async fn refresh_guild_image_url(&self, guild: &Guild) -> Option<String> {
        let current = guild.image_url()?;
        let path = storage_path_from_url(current)?;

        let url = match self
            .data
            .signed_url(&self.bucket, &path, SIGNED_URL_TTL)
            .await
        {
            Ok(url) => url,
            Err(e) => {
                warn!(guild = %guild.id(), error = %e, "Failed to refresh guild image URL");
                return None;
            }
        };

        if let Some(data) = self.images.peek(current) {
            self.images.store_image(&url, &data).await;
        }

        let mut refreshed = guild.clone();
        refreshed.set_image_url(Some(url.clone()));
        self.guilds.replace_local(UNSCOPED_KEY, refreshed.clone());
        if self
            .state
            .active_guild()
            .is_some_and(|g| g.id() == guild.id())
        {
            self.state.set_active_guild(Some(refreshed));
        }
        debug!(guild = %guild.id(), "Refreshed guild image URL");
        Some(url)
    }
}

impl std::fmt::Debug for GuildService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuildService")
            .field("bucket", &self.bucket)
            .field("guilds", &self.guilds)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}
