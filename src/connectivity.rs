//! Connectivity state tracking with reconnect debouncing.
//!
//! Fed by the runtime's own online/offline signal. That signal only says
//! whether a network interface is up; the remote may still be unreachable,
//! which surfaces as ordinary request failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Coarse connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
  Online,
  Offline,
  /// Recently back online; settles to Online after a grace window so a
  /// flapping connection does not trigger a resync storm.
  JustReconnected,
}

impl ConnectivityState {
  /// Whether a sync attempt is permitted in this state.
  pub fn can_sync(&self) -> bool {
    !matches!(self, ConnectivityState::Offline)
  }
}

/// Tracks the online/offline signal and exposes it as watchable state.
pub struct ConnectivityMonitor {
  state: Arc<watch::Sender<ConnectivityState>>,
  grace: Duration,
  /// Bumped on every signal; a settle timer only fires for its own epoch.
  generation: Arc<AtomicU64>,
}

impl ConnectivityMonitor {
  pub fn new(initially_online: bool, grace: Duration) -> Self {
    let initial = if initially_online {
      ConnectivityState::Online
    } else {
      ConnectivityState::Offline
    };
    let (state, _) = watch::channel(initial);
    Self {
      state: Arc::new(state),
      grace,
      generation: Arc::new(AtomicU64::new(0)),
    }
  }

  pub fn state(&self) -> ConnectivityState {
    *self.state.borrow()
  }

  /// Whether syncing may be attempted right now.
  pub fn is_online(&self) -> bool {
    self.state().can_sync()
  }

  pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
    self.state.subscribe()
  }

  /// Feed the runtime's online/offline signal.
  ///
  /// Going offline applies immediately. Coming back online enters
  /// `JustReconnected` and settles to `Online` only after the grace window
  /// passes without another drop.
  pub fn set_online(&self, online: bool) {
    if !online {
      self.generation.fetch_add(1, Ordering::SeqCst);
      if self.state() != ConnectivityState::Offline {
        debug!("connectivity: offline");
        self.state.send_replace(ConnectivityState::Offline);
      }
      return;
    }

    if self.state() != ConnectivityState::Offline {
      // Already online or already settling.
      return;
    }

    debug!("connectivity: reconnected, settling for {:?}", self.grace);
    let settle_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    self.state.send_replace(ConnectivityState::JustReconnected);

    let state = Arc::clone(&self.state);
    let generation = Arc::clone(&self.generation);
    let grace = self.grace;
    tokio::spawn(async move {
      tokio::time::sleep(grace).await;
      if generation.load(Ordering::SeqCst) != settle_generation {
        // A newer signal superseded this settle.
        return;
      }
      state.send_if_modified(|s| {
        if *s == ConnectivityState::JustReconnected {
          debug!("connectivity: settled online");
          *s = ConnectivityState::Online;
          true
        } else {
          false
        }
      });
    });
  }
}
