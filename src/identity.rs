//! Signed-in identity as supplied by the auth provider integration.

use sha2::{Digest, Sha256};
use tokio::sync::watch;

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
  pub email: String,
  pub display_name: String,
}

impl Identity {
  pub fn new(email: impl Into<String>, display_name: impl Into<String>) -> Self {
    Self {
      email: email.into(),
      display_name: display_name.into(),
    }
  }

  /// Stable storage scope derived from the email, so persisted cache
  /// records never collide across accounts.
  pub fn scope(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.email.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Identity resolution as seen by the sync layer.
///
/// `Unknown` means the auth provider has not answered yet; no network or
/// cache activity should happen in that state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentityState {
  #[default]
  Unknown,
  SignedOut,
  SignedIn(Identity),
}

impl IdentityState {
  pub fn identity(&self) -> Option<&Identity> {
    match self {
      IdentityState::SignedIn(identity) => Some(identity),
      _ => None,
    }
  }

  pub fn is_resolved(&self) -> bool {
    !matches!(self, IdentityState::Unknown)
  }
}

/// Watchable identity slot fed by the auth provider integration.
pub struct IdentityWatcher {
  state: watch::Sender<IdentityState>,
}

impl IdentityWatcher {
  pub fn new() -> Self {
    let (state, _) = watch::channel(IdentityState::Unknown);
    Self { state }
  }

  pub fn current(&self) -> IdentityState {
    self.state.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<IdentityState> {
    self.state.subscribe()
  }

  /// Feed a resolved identity; `None` means signed out.
  pub fn set(&self, identity: Option<Identity>) {
    let next = match identity {
      Some(identity) => IdentityState::SignedIn(identity),
      None => IdentityState::SignedOut,
    };
    self.state.send_if_modified(|state| {
      if *state == next {
        return false;
      }
      *state = next;
      true
    });
  }
}

impl Default for IdentityWatcher {
  fn default() -> Self {
    Self::new()
  }
}
