//! Domain error types.

mod realtime_error;
mod remote_error;
mod storage_error;
mod sync_error;

pub use realtime_error::{RealtimeError, RealtimeResult};
pub use remote_error::RemoteError;
pub use storage_error::StorageError;
pub use sync_error::SyncError;
