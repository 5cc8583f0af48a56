//! Core types for the domain cache.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Identifier for one independently synced category of user data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainKey {
  UserStats,
  DashboardBundle,
  QuizHistory,
  Roadmaps,
  ChatSessions,
}

impl DomainKey {
  /// All domains, in default refresh order.
  pub const ALL: [DomainKey; 5] = [
    DomainKey::UserStats,
    DomainKey::DashboardBundle,
    DomainKey::QuizHistory,
    DomainKey::Roadmaps,
    DomainKey::ChatSessions,
  ];

  /// Stable name used in storage keys and logs.
  pub fn as_str(&self) -> &'static str {
    match self {
      DomainKey::UserStats => "user_stats",
      DomainKey::DashboardBundle => "dashboard_bundle",
      DomainKey::QuizHistory => "quiz_history",
      DomainKey::Roadmaps => "roadmaps",
      DomainKey::ChatSessions => "chat_sessions",
    }
  }
}

impl std::fmt::Display for DomainKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Trait for payload types that live in the domain cache.
///
/// Binds a payload type to its domain so reads and writes stay typed end
/// to end; the cache itself stores untyped JSON.
pub trait DomainPayload: Clone + Send + Sync + Serialize + DeserializeOwned {
  fn domain_key() -> DomainKey;
}

/// Versioned snapshot of a domain's data held locally.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
  pub payload: T,
  /// When the payload was fetched or produced.
  pub fetched_at: DateTime<Utc>,
  /// Monotonic per-domain version assigned by the writer.
  pub version: u64,
}

/// Change notification emitted once per accepted write.
#[derive(Debug, Clone)]
pub struct CacheUpdate {
  pub key: DomainKey,
  pub version: u64,
  pub fetched_at: DateTime<Utc>,
}
