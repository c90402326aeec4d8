//! guildsync - client-side sync core for a guild/channel chat.
//!
//! This crate keeps channel, guild and message collections in sync with a
//! hosted backend over a realtime change feed, and caches remote images as
//! inline data URLs with durable persistence.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer: image cache, sync engine and services.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for external services.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "guildsync";
