//! Chat session state with optimistic sends and server reconciliation.

mod store;
mod types;

pub use store::{SendReport, SessionStore, FALLBACK_REPLY};
pub use types::{
  merge_remote, AssistantReply, ChatMessage, ChatSession, MessageSource, MessageStamp, Role,
  SessionBook, LOCAL_ID_PREFIX,
};
