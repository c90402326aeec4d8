//! Realtime adapter over the backend's Phoenix-channels websocket.

mod client;
mod codec;
mod payloads;

pub use client::{RealtimeClient, RealtimeClientConfig};
