mod image_cache_port;
mod key_value_store_port;
mod realtime_port;
mod remote_data_port;

pub use image_cache_port::{CacheError, CacheResult, FetchedImage, ImageFetchPort};
pub use key_value_store_port::KeyValueStorePort;
pub use realtime_port::{
    ChangeEvent, ChangeKind, RealtimePort, Subscription, SubscriptionHandle, SubscriptionRequest,
    SubscriptionStatus,
};
pub use remote_data_port::{Filter, FilterOp, OrderBy, Query, RemoteDataPort};

#[cfg(test)]
pub mod mocks {
    pub use super::image_cache_port::mock::MockImageFetcher;
    pub use super::realtime_port::mock::{MockChannel, MockRealtime};
    pub use super::remote_data_port::MockRemoteDataPort;
}
