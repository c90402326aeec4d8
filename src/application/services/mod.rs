mod chat_service;
mod guild_service;

pub use chat_service::{ChatService, FollowHandle};
pub use guild_service::{GuildService, ImageUpload, MAX_IMAGE_BYTES, MAX_NAME_LEN, SIGNED_URL_TTL};
