//! Offline-aware sync layer for the learning platform client.
//!
//! The client keeps working when the network does not: every data domain
//! (stats, dashboard, quiz history, roadmaps, chat sessions) is served from
//! a local versioned cache, and a sync coordinator reconciles that cache
//! with the remote whenever connectivity and identity allow.
//!
//! The pieces:
//! - [`cache`]: versioned per-domain snapshots with persistence
//! - [`net`]: HTTP client with bounded retry and a closed error taxonomy
//! - [`connectivity`]: online/offline state with reconnect debouncing
//! - [`identity`]: the signed-in user and the cache scope derived from it
//! - [`sync`]: per-domain sync cycles with request coalescing
//! - [`platform`]: typed client for the platform's REST endpoints
//! - [`chat`]: optimistic chat sessions over the cache and the remote

pub mod cache;
pub mod chat;
pub mod config;
pub mod connectivity;
pub mod identity;
pub mod net;
pub mod platform;
pub mod sync;

pub use cache::{DomainCache, DomainKey};
pub use chat::{SessionBook, SessionStore};
pub use config::Config;
pub use connectivity::{ConnectivityMonitor, ConnectivityState};
pub use identity::{Identity, IdentityWatcher};
pub use net::{ApiError, ErrorKind, ResilientClient};
pub use platform::PlatformClient;
pub use sync::{SyncCoordinator, SyncEvent, SyncOutcome};
