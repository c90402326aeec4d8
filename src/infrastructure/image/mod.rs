//! Image download adapter.

mod http_fetcher;

pub use http_fetcher::HttpImageFetcher;
