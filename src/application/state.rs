//! Explicit selection and session state shared by the services.

use tokio::sync::watch;

use crate::domain::entities::{Channel, Guild, UserId};

/// Current principal and active selection.
///
/// Each field is a `watch` channel: readers take a snapshot with the getter
/// or follow changes through the matching `watch_*` receiver. Setters only
/// notify when the value actually changes.
#[derive(Debug)]
pub struct AppState {
    principal: watch::Sender<Option<UserId>>,
    active_guild: watch::Sender<Option<Guild>>,
    active_channel: watch::Sender<Option<Channel>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

fn replace_if_changed<T: PartialEq>(sender: &watch::Sender<T>, value: T) -> bool {
    sender.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    })
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            principal: watch::channel(None).0,
            active_guild: watch::channel(None).0,
            active_channel: watch::channel(None).0,
        }
    }

    /// Creates state with a signed-in user.
    #[must_use]
    pub fn with_principal(principal: impl Into<UserId>) -> Self {
        let state = Self::new();
        state.set_principal(Some(principal.into()));
        state
    }

    #[must_use]
    pub fn principal(&self) -> Option<UserId> {
        self.principal.borrow().clone()
    }

    pub fn set_principal(&self, principal: Option<UserId>) -> bool {
        replace_if_changed(&self.principal, principal)
    }

    #[must_use]
    pub fn active_guild(&self) -> Option<Guild> {
        self.active_guild.borrow().clone()
    }

    pub fn set_active_guild(&self, guild: Option<Guild>) -> bool {
        replace_if_changed(&self.active_guild, guild)
    }

    #[must_use]
    pub fn watch_active_guild(&self) -> watch::Receiver<Option<Guild>> {
        self.active_guild.subscribe()
    }

    #[must_use]
    pub fn active_channel(&self) -> Option<Channel> {
        self.active_channel.borrow().clone()
    }

    pub fn set_active_channel(&self, channel: Option<Channel>) -> bool {
        replace_if_changed(&self.active_channel, channel)
    }

    #[must_use]
    pub fn watch_active_channel(&self) -> watch::Receiver<Option<Channel>> {
        self.active_channel.subscribe()
    }

    /// Clears the active guild and channel.
    pub fn clear_selection(&self) {
        self.set_active_guild(None);
        self.set_active_channel(None);
    }
}
