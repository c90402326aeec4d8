//! Domain layer with core entities and port definitions.

/// Subscription lifecycle state.
pub mod connection;
/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use connection::SubscriptionState;
pub use entities::{Channel, Guild, Message, SyncRecord, UserId};
pub use errors::{RealtimeError, RemoteError, StorageError, SyncError};
pub use ports::{ImageFetchPort, KeyValueStorePort, RealtimePort, RemoteDataPort};
