//! Learning platform API: typed client, wire types, and cache bindings.

pub mod api_types;
mod cache;
mod client;
pub mod types;

pub use client::PlatformClient;
