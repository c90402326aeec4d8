//! Domain entity definitions.

mod channel;
mod guild;
mod message;
mod record;
mod user;

pub use channel::{Channel, ChannelId, DEFAULT_CHANNEL_NAME, NewChannel};
pub use guild::{Guild, GuildChanges, GuildId, NewGuild};
pub use message::{Message, MessageId, NewMessage};
pub use record::{ChangePolicy, SyncRecord, UNSCOPED_KEY};
pub use user::UserId;
