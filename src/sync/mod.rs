//! Sync scheduling: per-domain tickets, request coalescing, and
//! reconciliation into the versioned cache.
//!
//! At most one fetch is in flight per domain. Concurrent refresh requests
//! for the same domain coalesce onto a shared ticket and all observe the
//! same outcome. Outcomes never propagate as panics or early returns; a
//! failed or skipped sync leaves the cached snapshot authoritative.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, DomainCache, DomainKey, DomainPayload};
use crate::chat::{merge_remote, SessionBook};
use crate::connectivity::{ConnectivityMonitor, ConnectivityState};
use crate::identity::{IdentityState, IdentityWatcher};
use crate::net::{ApiError, ErrorKind};
use crate::platform::PlatformClient;

/// Why a requested sync did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  Offline,
  NoIdentity,
}

/// Result of one fetch-and-reconcile cycle, shared by coalesced callers.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
  /// Fetched and written at this version.
  Applied { version: u64 },
  /// Nothing was attempted; the cached value stands.
  Skipped(SkipReason),
  /// The fetch failed; the cached value stands.
  Failed(ApiError),
}

/// Out-of-band notice that a sync cycle finished.
#[derive(Debug, Clone)]
pub struct SyncEvent {
  pub key: DomainKey,
  pub outcome: SyncOutcome,
}

type SharedTicket = Shared<BoxFuture<'static, SyncOutcome>>;

pub struct SyncCoordinator {
  client: PlatformClient,
  cache: Arc<DomainCache>,
  connectivity: Arc<ConnectivityMonitor>,
  identity: Arc<IdentityWatcher>,
  /// Age beyond which a cached entry triggers a background refresh.
  stale_after: chrono::Duration,
  tickets: Mutex<HashMap<DomainKey, SharedTicket>>,
  events: broadcast::Sender<SyncEvent>,
}

impl SyncCoordinator {
  pub fn new(
    client: PlatformClient,
    cache: Arc<DomainCache>,
    connectivity: Arc<ConnectivityMonitor>,
    identity: Arc<IdentityWatcher>,
    stale_after: chrono::Duration,
  ) -> Self {
    let (events, _) = broadcast::channel(64);
    Self {
      client,
      cache,
      connectivity,
      identity,
      stale_after,
      tickets: Mutex::new(HashMap::new()),
      events,
    }
  }

  /// Subscribe to sync completion events.
  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.events.subscribe()
  }

  /// Request a fetch-and-reconcile for one domain.
  ///
  /// If a cycle for this domain is already in flight, this call joins it
  /// instead of starting another.
  pub async fn refresh(self: &Arc<Self>, key: DomainKey) -> SyncOutcome {
    self.ticket(key).await
  }

  /// Refresh every domain concurrently, returning per-domain outcomes.
  pub async fn refresh_all(self: &Arc<Self>) -> Vec<(DomainKey, SyncOutcome)> {
    let cycles: Vec<_> = DomainKey::ALL
      .iter()
      .map(|&key| {
        let coordinator = Arc::clone(self);
        async move { (key, coordinator.refresh(key).await) }
      })
      .collect();
    futures::future::join_all(cycles).await
  }

  /// Cached snapshot for `T`'s domain.
  ///
  /// When the entry is absent or older than `stale_after`, and syncing is
  /// currently possible, a background refresh is kicked off; the caller
  /// still gets the snapshot immediately.
  pub fn get<T: DomainPayload>(self: &Arc<Self>) -> Option<CacheEntry<T>> {
    let snapshot = self.cache.read::<T>();

    let stale = snapshot
      .as_ref()
      .map(|entry| self.is_stale(entry.fetched_at))
      .unwrap_or(true);

    if stale && self.connectivity.is_online() && self.identity.current().identity().is_some() {
      let coordinator = Arc::clone(self);
      let key = T::domain_key();
      tokio::spawn(async move {
        coordinator.refresh(key).await;
      });
    }

    snapshot
  }

  /// Watch identity and connectivity, driving automatic resyncs:
  /// a resolved sign-in binds the cache scope and refreshes everything,
  /// sign-out purges, and a reconnect refreshes once it settles to Online.
  pub fn spawn_triggers(self: &Arc<Self>) -> JoinHandle<()> {
    let coordinator = Arc::clone(self);
    tokio::spawn(async move {
      let mut identity_rx = coordinator.identity.subscribe();
      let mut connectivity_rx = coordinator.connectivity.subscribe();

      // The identity may have resolved before this task started.
      let initial = identity_rx.borrow_and_update().clone();
      if initial.is_resolved() {
        coordinator.handle_identity(initial).await;
      }

      loop {
        tokio::select! {
          changed = identity_rx.changed() => {
            if changed.is_err() {
              break;
            }
            let state = identity_rx.borrow_and_update().clone();
            coordinator.handle_identity(state).await;
          }
          changed = connectivity_rx.changed() => {
            if changed.is_err() {
              break;
            }
            let state = *connectivity_rx.borrow_and_update();
            // Only the settled edge resyncs; JustReconnected may still flap.
            if state == ConnectivityState::Online {
              info!("connectivity settled, refreshing all domains");
              coordinator.refresh_all().await;
            }
          }
        }
      }
    })
  }

  async fn handle_identity(self: &Arc<Self>, state: IdentityState) {
    match state {
      IdentityState::SignedIn(identity) => {
        info!(email = %identity.email, "identity resolved, binding cache scope");
        if let Err(e) = self.cache.bind_scope(Some(identity.scope())) {
          warn!("failed to bind cache scope: {}", e);
        }
        self.refresh_all().await;
      }
      IdentityState::SignedOut => {
        info!("signed out, purging cached domains");
        if let Err(e) = self.cache.bind_scope(None) {
          warn!("failed to purge cache: {}", e);
        }
      }
      IdentityState::Unknown => {}
    }
  }

  fn ticket(self: &Arc<Self>, key: DomainKey) -> SharedTicket {
    let mut tickets = self
      .tickets
      .lock()
      .unwrap_or_else(PoisonError::into_inner);

    if let Some(existing) = tickets.get(&key) {
      debug!(domain = %key, "joining in-flight sync");
      return existing.clone();
    }

    // The cycle runs as its own task so it finishes (and releases the
    // ticket) even if every awaiting caller is dropped.
    let coordinator = Arc::clone(self);
    let task = tokio::spawn(async move { coordinator.run_sync(key).await });
    let ticket: SharedTicket = async move {
      match task.await {
        Ok(outcome) => outcome,
        Err(e) => SyncOutcome::Failed(ApiError::new(
          ErrorKind::Server,
          format!("sync task failed: {}", e),
          None,
        )),
      }
    }
    .boxed()
    .shared();

    tickets.insert(key, ticket.clone());
    ticket
  }

  async fn run_sync(self: Arc<Self>, key: DomainKey) -> SyncOutcome {
    // Freed on every exit path, panic included.
    let ticket = TicketGuard {
      coordinator: Arc::clone(&self),
      key,
    };

    let outcome = self.fetch_and_apply(key).await;

    // Release the ticket before anyone observes the outcome.
    drop(ticket);

    match &outcome {
      SyncOutcome::Applied { version } => info!(domain = %key, version, "sync applied"),
      SyncOutcome::Skipped(reason) => debug!(domain = %key, ?reason, "sync skipped"),
      SyncOutcome::Failed(error) => warn!(domain = %key, "sync failed: {}", error),
    }
    let _ = self.events.send(SyncEvent {
      key,
      outcome: outcome.clone(),
    });
    outcome
  }

  async fn fetch_and_apply(&self, key: DomainKey) -> SyncOutcome {
    let identity = match self.identity.current().identity().cloned() {
      Some(identity) => identity,
      None => return SyncOutcome::Skipped(SkipReason::NoIdentity),
    };
    // Offline means zero remote calls, not failed ones. Checked only at
    // entry: a connection drop mid-fetch surfaces as a request failure,
    // and a late success still applies through the version guard.
    if !self.connectivity.is_online() {
      return SyncOutcome::Skipped(SkipReason::Offline);
    }

    let email = identity.email;
    match key {
      DomainKey::UserStats => self.apply(self.client.user_stats(&email).await),
      DomainKey::DashboardBundle => self.apply(self.client.dashboard_bundle(&email).await),
      DomainKey::QuizHistory => self.apply(self.client.quiz_history(&email).await),
      DomainKey::Roadmaps => self.apply(self.client.roadmaps(&email).await),
      DomainKey::ChatSessions => {
        // The one merge-on-fetch domain: local pending chat state survives
        // the incoming snapshot. The merge runs against the book as it is
        // at apply time, not as it was when the fetch started.
        match self.client.load_sessions(&email).await {
          Ok(remote) => {
            let result = self.cache.mutate::<SessionBook>(move |current| {
              merge_remote(&current.unwrap_or_default(), remote)
            });
            match result {
              Ok(version) => SyncOutcome::Applied { version },
              Err(e) => SyncOutcome::Failed(store_failure(e)),
            }
          }
          Err(error) => SyncOutcome::Failed(error),
        }
      }
    }
  }

  fn apply<T: DomainPayload>(&self, fetched: Result<T, ApiError>) -> SyncOutcome {
    match fetched {
      Ok(payload) => match self.cache.write_next(&payload) {
        Ok(version) => SyncOutcome::Applied { version },
        Err(e) => SyncOutcome::Failed(store_failure(e)),
      },
      Err(error) => SyncOutcome::Failed(error),
    }
  }

  fn is_stale(&self, fetched_at: DateTime<Utc>) -> bool {
    Utc::now() - fetched_at > self.stale_after
  }
}

/// Removes a domain's in-flight ticket when dropped, so the slot frees even
/// when the sync task panics instead of returning.
struct TicketGuard {
  coordinator: Arc<SyncCoordinator>,
  key: DomainKey,
}

impl Drop for TicketGuard {
  fn drop(&mut self) {
    self
      .coordinator
      .tickets
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&self.key);
  }
}

fn store_failure(e: color_eyre::Report) -> ApiError {
  ApiError::new(
    ErrorKind::Server,
    format!("failed to store fetched payload: {}", e),
    None,
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;
  use crate::identity::Identity;
  use crate::net::ResilientClient;
  use std::time::Duration;
  use url::Url;

  fn coordinator() -> Arc<SyncCoordinator> {
    // Nothing listens on the discard port; fetches fail fast.
    let client = PlatformClient::new(ResilientClient::with_options(
      Url::parse("http://127.0.0.1:9/").unwrap(),
      Duration::from_millis(200),
      1,
      Duration::from_millis(10),
    ));
    let cache = Arc::new(DomainCache::new(Arc::new(MemoryStore::new())));
    let connectivity = Arc::new(ConnectivityMonitor::new(true, Duration::from_millis(30)));
    let identity = Arc::new(IdentityWatcher::new());
    identity.set(Some(Identity::new("ada@example.edu", "Ada")));

    Arc::new(SyncCoordinator::new(
      client,
      cache,
      connectivity,
      identity,
      chrono::Duration::seconds(300),
    ))
  }

  #[tokio::test]
  async fn test_dead_sync_task_releases_its_ticket() {
    let coordinator = coordinator();

    // A cycle registered in the map whose task dies before releasing it.
    let stuck: SharedTicket = async { SyncOutcome::Skipped(SkipReason::Offline) }
      .boxed()
      .shared();
    coordinator
      .tickets
      .lock()
      .unwrap()
      .insert(DomainKey::UserStats, stuck);

    let holder = Arc::clone(&coordinator);
    let task = tokio::spawn(async move {
      let _ticket = TicketGuard {
        coordinator: holder,
        key: DomainKey::UserStats,
      };
      panic!("cycle died mid-flight");
    });
    assert!(task.await.is_err());

    assert!(!coordinator
      .tickets
      .lock()
      .unwrap()
      .contains_key(&DomainKey::UserStats));

    // The domain is not pinned to the dead cycle: a fresh refresh runs and
    // reaches the network instead of replaying the stale outcome.
    let outcome = coordinator.refresh(DomainKey::UserStats).await;
    assert!(matches!(outcome, SyncOutcome::Failed(_)));
  }
}
