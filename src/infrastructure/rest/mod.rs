//! REST adapter for the hosted backend's table and storage APIs.

mod client;
mod dto;

pub use client::RestDataClient;
