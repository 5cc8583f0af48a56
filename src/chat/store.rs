//! Session operations layered over the cache and the remote.
//!
//! Reading and writing messages is optimistic: the local book changes
//! first and the remote catches up. The one exception is deleting a
//! server-backed session, which waits for the remote to confirm.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{DomainCache, DomainKey};
use crate::identity::{Identity, IdentityWatcher};
use crate::net::ApiError;
use crate::platform::api_types::{ApiChatMessage, ApiChatSession};
use crate::platform::PlatformClient;
use crate::sync::{SyncCoordinator, SyncOutcome};

use super::types::{
  ChatMessage, ChatSession, MessageSource, MessageStamp, Role, SessionBook, LOCAL_ID_PREFIX,
};

/// Assistant text shown when the remote cannot be reached. Stays on this
/// device and is never sent as model context.
pub const FALLBACK_REPLY: &str = "I can't reach the learning assistant right now. \
Your message is saved on this device and the conversation will pick up once the \
connection returns.";

/// What happened to one send_message call.
#[derive(Debug, Clone)]
pub struct SendReport {
  pub session_id: String,
  pub delivered: bool,
  /// The failure behind a fallback reply, when not delivered.
  pub error: Option<ApiError>,
}

pub struct SessionStore {
  client: PlatformClient,
  cache: Arc<DomainCache>,
  coordinator: Arc<SyncCoordinator>,
  identity: Arc<IdentityWatcher>,
}

impl SessionStore {
  pub fn new(
    client: PlatformClient,
    cache: Arc<DomainCache>,
    coordinator: Arc<SyncCoordinator>,
    identity: Arc<IdentityWatcher>,
  ) -> Self {
    Self {
      client,
      cache,
      coordinator,
      identity,
    }
  }

  /// Current session book, refreshed from the remote when possible. A
  /// failed refresh quietly serves the cached book.
  pub async fn load(&self) -> SessionBook {
    let outcome = self.coordinator.refresh(DomainKey::ChatSessions).await;
    if let SyncOutcome::Failed(error) = &outcome {
      debug!("serving cached sessions, refresh failed: {}", error);
    }
    self.book()
  }

  /// Deliver a user message in the current session (creating one when
  /// there is none).
  ///
  /// The user's message lands in the local book before any network
  /// activity, stamped provisionally. On delivery, the server's single
  /// timestamp confirms both the user message and the assistant reply. On
  /// failure, the user's message stays and a fallback reply is appended;
  /// the failure is reported, not raised.
  pub async fn send_message(&self, input: &str) -> Result<SendReport> {
    let identity = self.require_identity()?;
    let now = Utc::now();

    let mut active_id = String::new();
    let mut history: Vec<ApiChatMessage> = Vec::new();
    self.cache.mutate::<SessionBook>(|current| {
      let mut book = current.unwrap_or_default();
      let id = match book.current().map(|s| s.id.clone()) {
        Some(id) => id,
        None => book.open_local(None, now),
      };
      if let Some(session) = book.session_mut(&id) {
        history = session
          .messages
          .iter()
          .filter(|m| m.source == MessageSource::Exchange)
          .map(ApiChatMessage::from_message)
          .collect();
        session.messages.push(ChatMessage {
          role: Role::User,
          content: input.to_string(),
          stamp: MessageStamp::Provisional(now),
          source: MessageSource::Exchange,
        });
        session.message_count = session.messages.len() as u32;
        session.last_activity = now;
      }
      book.sort_by_activity();
      active_id = id;
      book
    })?;

    // A device-local session must exist on the remote before delivery.
    let delivery = if active_id.starts_with(LOCAL_ID_PREFIX) {
      match self.promote_to_remote(&identity, &active_id).await {
        Ok(remote_id) => {
          active_id = remote_id;
          self
            .client
            .send_message(&identity.email, input, &history, Some(&active_id))
            .await
        }
        Err(error) => Err(error),
      }
    } else {
      self
        .client
        .send_message(&identity.email, input, &history, Some(&active_id))
        .await
    };

    match delivery {
      Ok(reply) => {
        let server_at = reply.timestamp.unwrap_or_else(Utc::now);
        let content = reply.content;
        let id = active_id.clone();
        self.cache.mutate::<SessionBook>(move |current| {
          let mut book = current.unwrap_or_default();
          if let Some(session) = book.session_mut(&id) {
            // One authoritative stamp covers the whole exchange.
            if let Some(message) = session
              .messages
              .iter_mut()
              .rev()
              .find(|m| m.role == Role::User && !m.stamp.is_confirmed())
            {
              message.stamp = MessageStamp::Confirmed(server_at);
            }
            session.messages.push(ChatMessage {
              role: Role::Assistant,
              content,
              stamp: MessageStamp::Confirmed(server_at),
              source: MessageSource::Exchange,
            });
            session.message_count = session.messages.len() as u32;
            session.last_activity = server_at;
          }
          book.sort_by_activity();
          book
        })?;
        Ok(SendReport {
          session_id: active_id,
          delivered: true,
          error: None,
        })
      }
      Err(error) => {
        warn!("message delivery failed, appending fallback: {}", error);
        let id = active_id.clone();
        self.cache.mutate::<SessionBook>(move |current| {
          let mut book = current.unwrap_or_default();
          if let Some(session) = book.session_mut(&id) {
            session.messages.push(ChatMessage {
              role: Role::Assistant,
              content: FALLBACK_REPLY.to_string(),
              stamp: MessageStamp::Provisional(Utc::now()),
              source: MessageSource::Fallback,
            });
            session.message_count = session.messages.len() as u32;
          }
          book
        })?;
        Ok(SendReport {
          session_id: active_id,
          delivered: false,
          error: Some(error),
        })
      }
    }
  }

  /// Create a session locally, then on the remote. When the remote call
  /// succeeds its id replaces the local one; when it fails the session
  /// simply stays device-local.
  pub async fn create_session(&self, name: Option<&str>) -> Result<ChatSession> {
    let identity = self.require_identity()?;
    let now = Utc::now();

    let mut local_id = String::new();
    self.cache.mutate::<SessionBook>(|current| {
      let mut book = current.unwrap_or_default();
      local_id = book.open_local(name, now);
      book
    })?;

    let final_id = match self.promote_to_remote(&identity, &local_id).await {
      Ok(remote_id) => remote_id,
      Err(error) => {
        debug!("session stays local until the next sync: {}", error);
        local_id
      }
    };

    self
      .book()
      .session(&final_id)
      .cloned()
      .ok_or_else(|| eyre!("Session {} vanished during creation", final_id))
  }

  /// Make `id` the active session. Local state changes immediately; the
  /// remote hears about it on a best-effort, non-blocking ping.
  pub fn switch_session(&self, id: &str) -> Result<()> {
    let identity = self.require_identity()?;

    let is_local = self
      .book()
      .session(id)
      .map(|s| s.is_local())
      .ok_or_else(|| eyre!("Unknown session: {}", id))?;

    let id_owned = id.to_string();
    self.cache.mutate::<SessionBook>(move |current| {
      let mut book = current.unwrap_or_default();
      book.current_session_id = Some(id_owned);
      book
    })?;

    if !is_local {
      let client = self.client.clone();
      let email = identity.email;
      let session_id = id.to_string();
      tokio::spawn(async move {
        // A missed ping costs nothing.
        if let Err(e) = client.touch_session(&email, &session_id).await {
          debug!("activity ping failed for {}: {}", session_id, e);
        }
      });
    }
    Ok(())
  }

  /// Delete a session. Server-backed sessions are deleted remote-first and
  /// the local book only changes once the server confirms; device-local
  /// sessions are removed outright.
  pub async fn delete_session(&self, id: &str) -> Result<()> {
    let identity = self.require_identity()?;
    let session = self
      .book()
      .session(id)
      .cloned()
      .ok_or_else(|| eyre!("Unknown session: {}", id))?;

    if session.is_local() {
      let id_owned = id.to_string();
      self.cache.mutate::<SessionBook>(move |current| {
        let mut book = current.unwrap_or_default();
        book.remove_session(&id_owned);
        book
      })?;
      return Ok(());
    }

    let remaining = self
      .client
      .delete_session(&identity.email, id)
      .await
      .map_err(|e| eyre!("Failed to delete session {}: {}", id, e))?;

    self.cache.mutate::<SessionBook>(move |current| {
      let mut book = current.unwrap_or_default();
      book.replace_remote_sessions(remaining);
      book
    })?;
    Ok(())
  }

  /// Push every server-backed session to the remote in one bulk save.
  pub async fn flush(&self) -> Result<()> {
    let identity = self.require_identity()?;
    let book = self.book();
    let sessions: Vec<ApiChatSession> = book
      .sessions
      .iter()
      .filter(|s| !s.is_local())
      .map(ApiChatSession::from_session)
      .collect();
    if sessions.is_empty() {
      return Ok(());
    }
    self
      .client
      .save_sessions(&identity.email, &sessions)
      .await
      .map_err(|e| eyre!("Failed to save sessions: {}", e))?;
    Ok(())
  }

  fn book(&self) -> SessionBook {
    self
      .cache
      .read::<SessionBook>()
      .map(|entry| entry.payload)
      .unwrap_or_default()
  }

  fn require_identity(&self) -> Result<Identity> {
    self
      .identity
      .current()
      .identity()
      .cloned()
      .ok_or_else(|| eyre!("No signed-in identity"))
  }

  /// Create `local_id` on the remote and adopt the server's id.
  async fn promote_to_remote(
    &self,
    identity: &Identity,
    local_id: &str,
  ) -> Result<String, ApiError> {
    let name = self
      .book()
      .session(local_id)
      .map(|s| s.name.clone())
      .unwrap_or_else(|| "Session".to_string());

    let remote = self.client.create_session(&identity.email, &name).await?;
    let remote_id = remote.id.clone();

    let local = local_id.to_string();
    let adopted = remote_id.clone();
    let result = self.cache.mutate::<SessionBook>(move |current| {
      let mut book = current.unwrap_or_default();
      book.adopt_remote_id(&local, &adopted);
      book
    });
    if let Err(e) = result {
      warn!("failed to persist session promotion: {}", e);
    }
    Ok(remote_id)
  }
}
