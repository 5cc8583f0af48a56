//! Versioned per-domain cache with write-behind persistence.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::storage::StoreHandle;
use super::traits::{CacheEntry, CacheUpdate, DomainKey, DomainPayload};

/// Untyped entry as held in memory and persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawEntry {
  fetched_at: DateTime<Utc>,
  version: u64,
  payload: Value,
}

#[derive(Default)]
struct CacheInner {
  scope: Option<String>,
  entries: HashMap<DomainKey, RawEntry>,
}

/// Latest known snapshot per domain.
///
/// Reads are memory-only and never block on I/O. Accepted writes update
/// memory and the persistent store in the same call, then notify
/// subscribers exactly once. Entries are keyed by an identity scope so one
/// account's data never bleeds into another's.
pub struct DomainCache {
  store: StoreHandle,
  inner: Mutex<CacheInner>,
  updates: broadcast::Sender<CacheUpdate>,
}

impl DomainCache {
  pub fn new(store: StoreHandle) -> Self {
    let (updates, _) = broadcast::channel(64);
    Self {
      store,
      inner: Mutex::new(CacheInner::default()),
      updates,
    }
  }

  /// Subscribe to accepted-write notifications.
  pub fn subscribe(&self) -> broadcast::Receiver<CacheUpdate> {
    self.updates.subscribe()
  }

  /// Bind the cache to an identity scope, loading that scope's persisted
  /// entries.
  ///
  /// Any change of scope tears the previous scope down completely, memory
  /// and persisted records both; `None` (sign-out) just tears down. Scope
  /// changes never merge.
  pub fn bind_scope(&self, scope: Option<String>) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if inner.scope == scope {
      return Ok(());
    }

    if let Some(old_scope) = inner.scope.take() {
      inner.entries.clear();
      for key in DomainKey::ALL {
        if let Err(e) = self.store.remove(&storage_key(&old_scope, key)) {
          warn!(domain = %key, "failed to drop cache record: {}", e);
        }
      }
      debug!("cache scope dropped");
    }

    if let Some(new_scope) = &scope {
      for key in DomainKey::ALL {
        match self.store.get(&storage_key(new_scope, key)) {
          Ok(Some(bytes)) => match serde_json::from_slice::<RawEntry>(&bytes) {
            Ok(entry) => {
              inner.entries.insert(key, entry);
            }
            Err(e) => warn!(domain = %key, "discarding unreadable cache record: {}", e),
          },
          Ok(None) => {}
          Err(e) => warn!(domain = %key, "failed to read cache record: {}", e),
        }
      }
      debug!(entries = inner.entries.len(), "cache scope bound");
    }
    inner.scope = scope;

    Ok(())
  }

  /// Current entry for `T`'s domain, or absent. Never blocks on I/O.
  pub fn read<T: DomainPayload>(&self) -> Option<CacheEntry<T>> {
    let inner = self.inner.lock().ok()?;
    let raw = inner.entries.get(&T::domain_key())?;
    match serde_json::from_value(raw.payload.clone()) {
      Ok(payload) => Some(CacheEntry {
        payload,
        fetched_at: raw.fetched_at,
        version: raw.version,
      }),
      Err(e) => {
        warn!(domain = %T::domain_key(), "cache entry failed to decode: {}", e);
        None
      }
    }
  }

  /// Current stored version for a domain; 0 when absent.
  pub fn version(&self, key: DomainKey) -> u64 {
    self
      .inner
      .lock()
      .ok()
      .and_then(|inner| inner.entries.get(&key).map(|e| e.version))
      .unwrap_or(0)
  }

  /// When a domain was last fetched, if it is present at all.
  pub fn fetched_at(&self, key: DomainKey) -> Option<DateTime<Utc>> {
    self
      .inner
      .lock()
      .ok()
      .and_then(|inner| inner.entries.get(&key).map(|e| e.fetched_at))
  }

  /// Store `payload` at an explicit `version`, accepting only versions
  /// strictly greater than the current one.
  ///
  /// A rejected write changes nothing and notifies no one. Returns whether
  /// the write was applied.
  pub fn write<T: DomainPayload>(&self, payload: &T, version: u64) -> Result<bool> {
    let key = T::domain_key();
    let value = serde_json::to_value(payload)
      .map_err(|e| eyre!("Failed to serialize {} payload: {}", key, e))?;

    let update = {
      let mut inner = self
        .inner
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;

      let current = inner.entries.get(&key).map(|e| e.version).unwrap_or(0);
      if version <= current {
        debug!(domain = %key, version, current, "stale write rejected");
        return Ok(false);
      }

      self.commit_locked(&mut inner, key, value, version)
    };

    // Nobody listening is fine.
    let _ = self.updates.send(update);
    Ok(true)
  }

  /// Store `payload` at the next version, assigned atomically.
  pub fn write_next<T: DomainPayload>(&self, payload: &T) -> Result<u64> {
    let key = T::domain_key();
    let value = serde_json::to_value(payload)
      .map_err(|e| eyre!("Failed to serialize {} payload: {}", key, e))?;

    let (update, version) = {
      let mut inner = self
        .inner
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;

      let version = inner.entries.get(&key).map(|e| e.version).unwrap_or(0) + 1;
      (self.commit_locked(&mut inner, key, value, version), version)
    };

    let _ = self.updates.send(update);
    Ok(version)
  }

  /// Atomically read-modify-write a domain entry, bumping the version.
  ///
  /// The closure sees the current payload (when present and decodable) and
  /// returns the replacement. It runs under the cache lock: keep it free
  /// of cache calls and I/O.
  pub fn mutate<T: DomainPayload>(&self, f: impl FnOnce(Option<T>) -> T) -> Result<u64> {
    let key = T::domain_key();

    let (update, version) = {
      let mut inner = self
        .inner
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;

      let current = inner.entries.get(&key);
      let version = current.map(|e| e.version).unwrap_or(0) + 1;
      let existing: Option<T> =
        current.and_then(|e| serde_json::from_value(e.payload.clone()).ok());

      let next = f(existing);
      let value = serde_json::to_value(&next)
        .map_err(|e| eyre!("Failed to serialize {} payload: {}", key, e))?;

      (self.commit_locked(&mut inner, key, value, version), version)
    };

    let _ = self.updates.send(update);
    Ok(version)
  }

  /// Write an entry into memory and the persistent store. Persist failures
  /// are logged, not propagated: losing in-memory state over a disk error
  /// would drop data the user can currently see.
  fn commit_locked(
    &self,
    inner: &mut CacheInner,
    key: DomainKey,
    payload: Value,
    version: u64,
  ) -> CacheUpdate {
    let entry = RawEntry {
      fetched_at: Utc::now(),
      version,
      payload,
    };

    if let Some(scope) = &inner.scope {
      match serde_json::to_vec(&entry) {
        Ok(bytes) => {
          if let Err(e) = self.store.set(&storage_key(scope, key), &bytes) {
            warn!(domain = %key, "cache persist failed: {}", e);
          }
        }
        Err(e) => warn!(domain = %key, "cache record serialize failed: {}", e),
      }
    }

    let update = CacheUpdate {
      key,
      version,
      fetched_at: entry.fetched_at,
    };
    inner.entries.insert(key, entry);
    update
  }
}

fn storage_key(scope: &str, key: DomainKey) -> String {
  format!("{}/{}", scope, key.as_str())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStore, StoreBackend};
  use crate::platform::types::UserStats;
  use std::sync::Arc;

  fn stats(quizzes_taken: u32) -> UserStats {
    UserStats {
      quizzes_taken,
      ..UserStats::default()
    }
  }

  fn bound_cache() -> (DomainCache, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let cache = DomainCache::new(store.clone());
    cache.bind_scope(Some("scope-a".to_string())).unwrap();
    (cache, store)
  }

  #[test]
  fn test_write_then_read_round_trip() {
    let (cache, _store) = bound_cache();

    assert!(cache.read::<UserStats>().is_none());
    assert_eq!(cache.version(DomainKey::UserStats), 0);

    assert!(cache.write(&stats(3), 1).unwrap());

    let entry = cache.read::<UserStats>().unwrap();
    assert_eq!(entry.payload.quizzes_taken, 3);
    assert_eq!(entry.version, 1);
    assert_eq!(cache.version(DomainKey::UserStats), 1);
  }

  #[test]
  fn test_stale_write_is_rejected_silently() {
    let (cache, _store) = bound_cache();
    let mut updates = cache.subscribe();

    assert!(cache.write(&stats(5), 2).unwrap());
    assert!(!cache.write(&stats(9), 1).unwrap());
    assert!(!cache.write(&stats(9), 2).unwrap());

    let entry = cache.read::<UserStats>().unwrap();
    assert_eq!(entry.payload.quizzes_taken, 5);
    assert_eq!(entry.version, 2);

    // Exactly one notification: the accepted write.
    assert_eq!(updates.try_recv().unwrap().version, 2);
    assert!(updates.try_recv().is_err());
  }

  #[test]
  fn test_write_next_assigns_increasing_versions() {
    let (cache, _store) = bound_cache();

    assert_eq!(cache.write_next(&stats(1)).unwrap(), 1);
    assert_eq!(cache.write_next(&stats(2)).unwrap(), 2);
    assert_eq!(cache.read::<UserStats>().unwrap().payload.quizzes_taken, 2);
  }

  #[test]
  fn test_mutate_sees_current_payload() {
    let (cache, _store) = bound_cache();
    cache.write(&stats(10), 1).unwrap();

    let version = cache
      .mutate::<UserStats>(|current| {
        let mut s = current.unwrap_or_default();
        s.quizzes_taken += 1;
        s
      })
      .unwrap();

    assert_eq!(version, 2);
    assert_eq!(cache.read::<UserStats>().unwrap().payload.quizzes_taken, 11);
  }

  #[test]
  fn test_unbound_cache_stays_in_memory_only() {
    let store = Arc::new(MemoryStore::new());
    let cache = DomainCache::new(store.clone());

    assert!(cache.write(&stats(1), 1).unwrap());
    assert_eq!(cache.read::<UserStats>().unwrap().payload.quizzes_taken, 1);

    // Nothing reached the store without a scope.
    assert_eq!(store.get("scope-a/user_stats").unwrap(), None);
  }

  #[test]
  fn test_bind_loads_persisted_entries() {
    let store = Arc::new(MemoryStore::new());
    {
      let cache = DomainCache::new(store.clone());
      cache.bind_scope(Some("scope-a".to_string())).unwrap();
      cache.write(&stats(7), 4).unwrap();
    }

    let cache = DomainCache::new(store);
    cache.bind_scope(Some("scope-a".to_string())).unwrap();

    let entry = cache.read::<UserStats>().unwrap();
    assert_eq!(entry.payload.quizzes_taken, 7);
    assert_eq!(entry.version, 4);
  }

  #[test]
  fn test_bind_reloads_every_persisted_domain() {
    use crate::chat::SessionBook;

    let store = Arc::new(MemoryStore::new());
    {
      let cache = DomainCache::new(store.clone());
      cache.bind_scope(Some("scope-a".to_string())).unwrap();
      cache.write(&stats(7), 4).unwrap();
      cache.write_next(&SessionBook::default()).unwrap();
    }

    let cache = DomainCache::new(store);
    cache.bind_scope(Some("scope-a".to_string())).unwrap();

    assert_eq!(cache.read::<UserStats>().unwrap().version, 4);
    assert_eq!(cache.version(DomainKey::ChatSessions), 1);
  }

  #[test]
  fn test_sign_out_purges_memory_and_store() {
    let (cache, store) = bound_cache();
    cache.write(&stats(7), 1).unwrap();
    assert!(store.get("scope-a/user_stats").unwrap().is_some());

    cache.bind_scope(None).unwrap();

    assert!(cache.read::<UserStats>().is_none());
    assert_eq!(store.get("scope-a/user_stats").unwrap(), None);
  }

  #[test]
  fn test_scope_switch_never_merges() {
    let (cache, _store) = bound_cache();
    cache.write(&stats(7), 3).unwrap();

    cache.bind_scope(Some("scope-b".to_string())).unwrap();

    assert!(cache.read::<UserStats>().is_none());
    assert_eq!(cache.version(DomainKey::UserStats), 0);
  }
}
