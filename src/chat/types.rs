//! Chat session domain model.
//!
//! Every message carries two pieces of bookkeeping beyond its text: a stamp
//! that records whether its timestamp is client-guessed or server-issued,
//! and a source that separates the real exchange from locally synthesized
//! fallback replies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::{DomainKey, DomainPayload};

/// Session ids with this prefix exist only on this device.
pub const LOCAL_ID_PREFIX: &str = "local-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  User,
  Assistant,
}

/// Timestamp authority for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "at", rename_all = "lowercase")]
pub enum MessageStamp {
  /// Client-side stamp awaiting server confirmation.
  Provisional(DateTime<Utc>),
  /// Authoritative server-issued stamp.
  Confirmed(DateTime<Utc>),
}

impl MessageStamp {
  pub fn at(&self) -> DateTime<Utc> {
    match self {
      MessageStamp::Provisional(at) | MessageStamp::Confirmed(at) => *at,
    }
  }

  pub fn is_confirmed(&self) -> bool {
    matches!(self, MessageStamp::Confirmed(_))
  }
}

/// Where a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
  /// Part of the real user/assistant exchange.
  #[default]
  Exchange,
  /// Synthesized on this device while the remote was unreachable. Never
  /// sent as model context.
  Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
  pub role: Role,
  pub content: String,
  pub stamp: MessageStamp,
  #[serde(default)]
  pub source: MessageSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub messages: Vec<ChatMessage>,
  #[serde(default)]
  pub message_count: u32,
  pub created_at: DateTime<Utc>,
  pub last_activity: DateTime<Utc>,
}

impl ChatSession {
  /// Whether this session has never been created on the remote.
  pub fn is_local(&self) -> bool {
    self.id.starts_with(LOCAL_ID_PREFIX)
  }
}

/// What the remote returns for one delivered message.
#[derive(Debug, Clone)]
pub struct AssistantReply {
  pub content: String,
  /// Single server timestamp covering the whole exchange.
  pub timestamp: Option<DateTime<Utc>>,
}

/// The whole chat state for one account: sessions plus selection.
///
/// This is the cached payload for the chat domain; it is always read and
/// written as a unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionBook {
  pub sessions: Vec<ChatSession>,
  pub current_session_id: Option<String>,
  pub session_counter: u64,
}

impl SessionBook {
  pub fn current(&self) -> Option<&ChatSession> {
    self
      .current_session_id
      .as_deref()
      .and_then(|id| self.session(id))
  }

  pub fn session(&self, id: &str) -> Option<&ChatSession> {
    self.sessions.iter().find(|s| s.id == id)
  }

  pub fn session_mut(&mut self, id: &str) -> Option<&mut ChatSession> {
    self.sessions.iter_mut().find(|s| s.id == id)
  }

  /// Most recently active first.
  pub fn sort_by_activity(&mut self) {
    self
      .sessions
      .sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
  }

  /// Insert a fresh device-local session and select it. Returns the new id.
  pub fn open_local(&mut self, name: Option<&str>, now: DateTime<Utc>) -> String {
    let id = format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4());
    let name = name
      .map(str::to_string)
      .unwrap_or_else(|| format!("Session {}", self.session_counter + 1));
    self.sessions.insert(
      0,
      ChatSession {
        id: id.clone(),
        name,
        messages: Vec::new(),
        message_count: 0,
        created_at: now,
        last_activity: now,
      },
    );
    self.session_counter += 1;
    self.current_session_id = Some(id.clone());
    id
  }

  /// Swap a device-local id for the id the remote assigned.
  pub fn adopt_remote_id(&mut self, local_id: &str, remote_id: &str) {
    if let Some(session) = self.session_mut(local_id) {
      session.id = remote_id.to_string();
    }
    if self.current_session_id.as_deref() == Some(local_id) {
      self.current_session_id = Some(remote_id.to_string());
    }
  }

  pub fn remove_session(&mut self, id: &str) {
    self.sessions.retain(|s| s.id != id);
    if self.current_session_id.as_deref() == Some(id) {
      self.current_session_id = self.sessions.first().map(|s| s.id.clone());
    }
  }

  /// Replace all server-backed sessions with a confirmed remote list,
  /// keeping device-local sessions as they are.
  pub fn replace_remote_sessions(&mut self, remote: Vec<ChatSession>) {
    let locals: Vec<ChatSession> = self
      .sessions
      .iter()
      .filter(|s| s.is_local())
      .cloned()
      .collect();
    self.sessions = remote;
    self.sessions.extend(locals);
    self.sort_by_activity();

    let current_gone = match &self.current_session_id {
      Some(id) => self.session(id).is_none(),
      None => false,
    };
    if current_gone {
      self.current_session_id = self.sessions.first().map(|s| s.id.clone());
    }
  }
}

impl DomainPayload for SessionBook {
  fn domain_key() -> DomainKey {
    DomainKey::ChatSessions
  }
}

/// Reconcile a fetched remote session list into the local book.
///
/// The server copy wins for every session it knows about; what survives
/// locally is exactly the state the server cannot know yet:
/// - unconfirmed or fallback messages, re-appended unless the server copy
///   already holds a matching message
/// - sessions that never reached the remote
/// - the local session selection, while it still exists
pub fn merge_remote(local: &SessionBook, remote: SessionBook) -> SessionBook {
  let SessionBook {
    sessions: remote_sessions,
    current_session_id: remote_current,
    session_counter: remote_counter,
  } = remote;

  let mut merged: Vec<ChatSession> = Vec::new();
  for mut session in remote_sessions {
    if let Some(local_session) = local.session(&session.id) {
      for message in &local_session.messages {
        let pending = !message.stamp.is_confirmed() || message.source == MessageSource::Fallback;
        let already_there = session
          .messages
          .iter()
          .any(|m| m.role == message.role && m.content == message.content);
        if pending && !already_there {
          session.messages.push(message.clone());
        }
      }
      session.message_count = session.messages.len() as u32;
      if local_session.last_activity > session.last_activity {
        session.last_activity = local_session.last_activity;
      }
    }
    merged.push(session);
  }

  for session in &local.sessions {
    if session.is_local() && !merged.iter().any(|s| s.id == session.id) {
      merged.push(session.clone());
    }
  }

  let mut book = SessionBook {
    sessions: merged,
    current_session_id: None,
    session_counter: local.session_counter.max(remote_counter),
  };
  book.sort_by_activity();

  let current = local
    .current_session_id
    .as_ref()
    .filter(|id| book.session(id).is_some())
    .cloned()
    .or_else(|| remote_current.filter(|id| book.session(id).is_some()))
    .or_else(|| book.sessions.first().map(|s| s.id.clone()));
  book.current_session_id = current;

  book
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 21, 10, minute, 0).unwrap()
  }

  fn message(role: Role, content: &str, stamp: MessageStamp, source: MessageSource) -> ChatMessage {
    ChatMessage {
      role,
      content: content.to_string(),
      stamp,
      source,
    }
  }

  fn session(id: &str, minute: u32, messages: Vec<ChatMessage>) -> ChatSession {
    ChatSession {
      id: id.to_string(),
      name: format!("Session {}", id),
      message_count: messages.len() as u32,
      messages,
      created_at: at(0),
      last_activity: at(minute),
    }
  }

  fn book(sessions: Vec<ChatSession>, current: Option<&str>, counter: u64) -> SessionBook {
    SessionBook {
      sessions,
      current_session_id: current.map(str::to_string),
      session_counter: counter,
    }
  }

  #[test]
  fn test_merge_keeps_pending_local_tail() {
    let confirmed = message(
      Role::User,
      "what is recursion?",
      MessageStamp::Confirmed(at(1)),
      MessageSource::Exchange,
    );
    let pending_user = message(
      Role::User,
      "and tail calls?",
      MessageStamp::Provisional(at(2)),
      MessageSource::Exchange,
    );
    let fallback = message(
      Role::Assistant,
      "offline fallback",
      MessageStamp::Provisional(at(2)),
      MessageSource::Fallback,
    );

    let local = book(
      vec![session(
        "s1",
        2,
        vec![confirmed.clone(), pending_user.clone(), fallback.clone()],
      )],
      Some("s1"),
      1,
    );
    let remote = book(vec![session("s1", 1, vec![confirmed])], None, 1);

    let merged = merge_remote(&local, remote);
    let s1 = merged.session("s1").unwrap();
    assert_eq!(s1.messages.len(), 3);
    assert_eq!(s1.messages[1], pending_user);
    assert_eq!(s1.messages[2], fallback);
    assert_eq!(s1.message_count, 3);
  }

  #[test]
  fn test_merge_drops_pending_once_server_has_it() {
    let pending = message(
      Role::User,
      "hello",
      MessageStamp::Provisional(at(1)),
      MessageSource::Exchange,
    );
    let confirmed_copy = message(
      Role::User,
      "hello",
      MessageStamp::Confirmed(at(1)),
      MessageSource::Exchange,
    );

    let local = book(vec![session("s1", 1, vec![pending])], Some("s1"), 1);
    let remote = book(vec![session("s1", 1, vec![confirmed_copy])], None, 1);

    let merged = merge_remote(&local, remote);
    let s1 = merged.session("s1").unwrap();
    assert_eq!(s1.messages.len(), 1);
    assert!(s1.messages[0].stamp.is_confirmed());
  }

  #[test]
  fn test_merge_retains_local_only_sessions() {
    let local = book(
      vec![
        session("local-abc", 3, vec![]),
        session("s1", 1, vec![]),
      ],
      Some("local-abc"),
      2,
    );
    let remote = book(vec![session("s1", 2, vec![]), session("s2", 1, vec![])], Some("s2"), 5);

    let merged = merge_remote(&local, remote);
    assert_eq!(merged.sessions.len(), 3);
    assert!(merged.session("local-abc").is_some());
    // Counter never regresses on either side.
    assert_eq!(merged.session_counter, 5);
    // Local selection survives.
    assert_eq!(merged.current_session_id.as_deref(), Some("local-abc"));
  }

  #[test]
  fn test_merge_drops_sessions_the_server_deleted() {
    // Server-backed id missing from the remote list means it was deleted
    // elsewhere; the server copy wins.
    let local = book(vec![session("s1", 1, vec![]), session("s2", 2, vec![])], Some("s2"), 2);
    let remote = book(vec![session("s1", 3, vec![])], Some("s1"), 2);

    let merged = merge_remote(&local, remote);
    assert_eq!(merged.sessions.len(), 1);
    assert!(merged.session("s2").is_none());
    // The vanished selection falls back to the remote's, then to newest.
    assert_eq!(merged.current_session_id.as_deref(), Some("s1"));
  }

  #[test]
  fn test_merge_sorts_most_recent_first() {
    let local = book(vec![session("local-x", 5, vec![])], None, 1);
    let remote = book(vec![session("s1", 1, vec![]), session("s2", 9, vec![])], None, 2);

    let merged = merge_remote(&local, remote);
    let ids: Vec<&str> = merged.sessions.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["s2", "local-x", "s1"]);
    // No selection anywhere: newest wins.
    assert_eq!(merged.current_session_id.as_deref(), Some("s2"));
  }

  #[test]
  fn test_open_local_ids_are_unique() {
    let mut book = SessionBook::default();
    let a = book.open_local(Some("Study"), at(1));
    let b = book.open_local(Some("Study"), at(1));

    assert_ne!(a, b);
    assert!(a.starts_with(LOCAL_ID_PREFIX));
    assert_eq!(book.sessions.len(), 2);
    assert_eq!(book.session_counter, 2);
    assert_eq!(book.current_session_id, Some(b));
  }

  #[test]
  fn test_adopt_remote_id_updates_selection() {
    let mut book = SessionBook::default();
    let local_id = book.open_local(None, at(1));

    book.adopt_remote_id(&local_id, "srv-9");

    assert!(book.session(&local_id).is_none());
    assert!(book.session("srv-9").is_some());
    assert_eq!(book.current_session_id.as_deref(), Some("srv-9"));
    assert!(!book.session("srv-9").unwrap().is_local());
  }

  #[test]
  fn test_remove_session_reselects_first() {
    let mut book = book(
      vec![session("s1", 2, vec![]), session("s2", 1, vec![])],
      Some("s1"),
      2,
    );
    book.remove_session("s1");
    assert_eq!(book.current_session_id.as_deref(), Some("s2"));

    book.remove_session("s2");
    assert_eq!(book.current_session_id, None);
  }

  #[test]
  fn test_replace_remote_sessions_keeps_locals() {
    let mut book = book(
      vec![session("s1", 1, vec![]), session("local-a", 2, vec![])],
      Some("s1"),
      2,
    );
    book.replace_remote_sessions(vec![session("s9", 3, vec![])]);

    assert!(book.session("s1").is_none());
    assert!(book.session("local-a").is_some());
    assert!(book.session("s9").is_some());
    // Old selection is gone, newest takes over.
    assert_eq!(book.current_session_id.as_deref(), Some("s9"));
  }
}
