//! Serde types matching the platform API's JSON wire format.
//!
//! The API mixes naming styles (snake_case on the stats and roadmap
//! endpoints, camelCase on quizzes and chat) and renders timestamps in
//! several shapes. Wire types absorb all of that here so domain types
//! stay clean.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{QuizRecord, Roadmap};
use crate::chat::{ChatMessage, ChatSession, MessageSource, MessageStamp, Role, SessionBook};

/// Parse a server timestamp. The API sends RFC 3339 strings, RFC 822
/// date-header strings ("Tue, 19 Aug 2026 08:30:00 GMT"), and offset-less
/// values, which are taken as UTC.
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
    return Some(dt.with_timezone(&Utc));
  }
  s.parse::<chrono::NaiveDateTime>().ok().map(|dt| dt.and_utc())
}

// ============================================================================
// Quiz history endpoint
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiQuizRecord {
  pub id: String,
  #[serde(rename = "quizId", default)]
  pub quiz_id: String,
  #[serde(rename = "quizTitle", default)]
  pub quiz_title: String,
  #[serde(default)]
  pub topic: String,
  #[serde(default)]
  pub difficulty: String,
  #[serde(rename = "totalQuestions", default)]
  pub total_questions: u32,
  #[serde(rename = "correctAnswers", default)]
  pub correct_answers: u32,
  #[serde(default)]
  pub percentage: f64,
  #[serde(rename = "completedAt", default)]
  pub completed_at: Option<String>,
  // Seconds when the attempt tracked it, free text ("Not tracked") when not.
  #[serde(rename = "timeTaken", default)]
  pub time_taken: Option<Value>,
}

impl ApiQuizRecord {
  pub fn into_record(self) -> QuizRecord {
    QuizRecord {
      id: self.id,
      quiz_id: self.quiz_id,
      quiz_title: self.quiz_title,
      topic: self.topic,
      difficulty: self.difficulty,
      total_questions: self.total_questions,
      correct_answers: self.correct_answers,
      percentage: self.percentage,
      completed_at: self.completed_at.as_deref().and_then(parse_timestamp),
      time_taken: self.time_taken.as_ref().and_then(time_taken_seconds),
    }
  }
}

fn time_taken_seconds(value: &Value) -> Option<i64> {
  match value {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

// ============================================================================
// Roadmap endpoint
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiRoadmap {
  pub id: String,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub duration_weeks: Option<u32>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub data: Value,
}

impl ApiRoadmap {
  pub fn into_roadmap(self) -> Roadmap {
    Roadmap {
      id: self.id,
      title: self.title,
      description: self.description,
      duration_weeks: self.duration_weeks,
      created_at: self.created_at.as_deref().and_then(parse_timestamp),
      data: self.data,
    }
  }
}

// ============================================================================
// Chat endpoints
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiChatMessage {
  pub role: Role,
  pub content: String,
  #[serde(default)]
  pub timestamp: Option<String>,
}

impl ApiChatMessage {
  /// Anything fetched from the remote carries a confirmed stamp.
  pub fn into_message(self) -> ChatMessage {
    let at = self
      .timestamp
      .as_deref()
      .and_then(parse_timestamp)
      .unwrap_or_else(Utc::now);
    ChatMessage {
      role: self.role,
      content: self.content,
      stamp: MessageStamp::Confirmed(at),
      source: MessageSource::Exchange,
    }
  }

  pub fn from_message(message: &ChatMessage) -> Self {
    Self {
      role: message.role,
      content: message.content.clone(),
      timestamp: Some(message.stamp.at().to_rfc3339()),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiChatSession {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub messages: Vec<ApiChatMessage>,
  #[serde(rename = "messageCount", default)]
  pub message_count: u32,
  #[serde(rename = "lastActivity", default)]
  pub last_activity: Option<String>,
  #[serde(rename = "createdAt", default)]
  pub created_at: Option<String>,
}

impl ApiChatSession {
  pub fn into_session(self) -> ChatSession {
    let created_at = self
      .created_at
      .as_deref()
      .and_then(parse_timestamp)
      .unwrap_or_else(Utc::now);
    let last_activity = self
      .last_activity
      .as_deref()
      .and_then(parse_timestamp)
      .unwrap_or(created_at);
    let messages: Vec<ChatMessage> = self
      .messages
      .into_iter()
      .map(ApiChatMessage::into_message)
      .collect();
    ChatSession {
      id: self.id,
      name: self.name,
      message_count: messages.len() as u32,
      messages,
      created_at,
      last_activity,
    }
  }

  /// Wire form of a session for bulk saves. Fallback messages never leave
  /// the device.
  pub fn from_session(session: &ChatSession) -> Self {
    let messages: Vec<ApiChatMessage> = session
      .messages
      .iter()
      .filter(|m| m.source == MessageSource::Exchange)
      .map(ApiChatMessage::from_message)
      .collect();
    Self {
      id: session.id.clone(),
      name: session.name.clone(),
      message_count: messages.len() as u32,
      messages,
      last_activity: Some(session.last_activity.to_rfc3339()),
      created_at: Some(session.created_at.to_rfc3339()),
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiLoadChatResponse {
  #[serde(default)]
  pub success: bool,
  #[serde(default)]
  pub sessions: Vec<ApiChatSession>,
  #[serde(rename = "currentSessionId", default)]
  pub current_session_id: Option<String>,
  #[serde(rename = "sessionCounter", default)]
  pub session_counter: u64,
}

impl ApiLoadChatResponse {
  pub fn into_book(self) -> SessionBook {
    let mut book = SessionBook {
      sessions: self
        .sessions
        .into_iter()
        .map(ApiChatSession::into_session)
        .collect(),
      current_session_id: self.current_session_id,
      session_counter: self.session_counter,
    };
    book.sort_by_activity();
    book
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiCreateChatResponse {
  #[serde(default)]
  pub success: bool,
  pub session: ApiChatSession,
}

#[derive(Debug, Deserialize)]
pub struct ApiSendMessageResponse {
  #[serde(default)]
  pub success: bool,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiDeleteChatResponse {
  #[serde(default)]
  pub success: bool,
  #[serde(rename = "remainingSessions", default)]
  pub remaining_sessions: Vec<ApiChatSession>,
}

#[derive(Debug, Deserialize)]
pub struct ApiAckResponse {
  #[serde(default)]
  pub success: bool,
}

// Request bodies

#[derive(Debug, Serialize)]
pub struct ApiCreateChatRequest<'a> {
  #[serde(rename = "sessionName")]
  pub session_name: &'a str,
  #[serde(rename = "userEmail")]
  pub user_email: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ApiSendMessageRequest<'a> {
  pub input: &'a str,
  #[serde(rename = "userEmail")]
  pub user_email: &'a str,
  #[serde(rename = "chatHistory")]
  pub chat_history: &'a [ApiChatMessage],
  #[serde(rename = "sessionId")]
  pub session_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct ApiSaveChatRequest<'a> {
  #[serde(rename = "userEmail")]
  pub user_email: &'a str,
  pub sessions: &'a [ApiChatSession],
}

#[derive(Debug, Serialize)]
pub struct ApiActivityRequest<'a> {
  #[serde(rename = "userEmail")]
  pub user_email: &'a str,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_timestamp_with_and_without_offset() {
    let with_offset = parse_timestamp("2026-08-21T10:00:00+00:00").unwrap();
    let zulu = parse_timestamp("2026-08-21T10:00:00Z").unwrap();
    let naive = parse_timestamp("2026-08-21T10:00:00").unwrap();
    let fractional = parse_timestamp("2026-08-21T10:00:00.123456").unwrap();

    assert_eq!(with_offset, zulu);
    assert_eq!(naive, zulu);
    assert_eq!(fractional.timestamp(), zulu.timestamp());
    assert_eq!(parse_timestamp("not a date"), None);
  }

  #[test]
  fn test_parse_timestamp_accepts_date_header_form() {
    let header = parse_timestamp("Thu, 20 Aug 2026 09:30:00 GMT").unwrap();
    let iso = parse_timestamp("2026-08-20T09:30:00Z").unwrap();

    assert_eq!(header, iso);
  }

  #[test]
  fn test_quiz_record_decodes_server_shape() {
    let json = r#"{
      "id": "f47ac10b-58cc-4372-a567-0e02b2c3d479",
      "quizId": "quiz-ownership",
      "quizTitle": "Ownership Basics",
      "topic": "rust",
      "difficulty": "medium",
      "totalQuestions": 10,
      "correctAnswers": 8,
      "percentage": 80,
      "completedAt": "2026-08-20T09:30:00",
      "timeTaken": "Not tracked",
      "userId": "ada@example.edu"
    }"#;
    let record = serde_json::from_str::<ApiQuizRecord>(json)
      .unwrap()
      .into_record();

    assert_eq!(record.id, "f47ac10b-58cc-4372-a567-0e02b2c3d479");
    assert_eq!(record.quiz_id, "quiz-ownership");
    assert_eq!(record.quiz_title, "Ownership Basics");
    assert_eq!(record.correct_answers, 8);
    assert!(record.completed_at.is_some());
    assert_eq!(record.time_taken, None);
  }

  #[test]
  fn test_time_taken_tolerates_numbers_and_text() {
    assert_eq!(time_taken_seconds(&serde_json::json!(412)), Some(412));
    assert_eq!(time_taken_seconds(&serde_json::json!(12.7)), Some(12));
    assert_eq!(time_taken_seconds(&serde_json::json!("95")), Some(95));
    assert_eq!(time_taken_seconds(&serde_json::json!("Not tracked")), None);
    assert_eq!(time_taken_seconds(&serde_json::json!(null)), None);
  }

  #[test]
  fn test_roadmap_decodes_server_shape() {
    let json = r#"{
      "id": "9b2d6f0a-1c3e-4d5f-8a7b-0c1d2e3f4a5b",
      "user_email": "ada@example.edu",
      "title": "Learn Rust",
      "description": "Systems background",
      "duration_weeks": 12,
      "created_at": "Thu, 20 Aug 2026 09:30:00 GMT",
      "data": {"weeks": []}
    }"#;
    let roadmap = serde_json::from_str::<ApiRoadmap>(json)
      .unwrap()
      .into_roadmap();

    assert_eq!(roadmap.id, "9b2d6f0a-1c3e-4d5f-8a7b-0c1d2e3f4a5b");
    assert_eq!(roadmap.title, "Learn Rust");
    assert_eq!(
      roadmap.created_at.unwrap(),
      parse_timestamp("2026-08-20T09:30:00Z").unwrap()
    );
    assert_eq!(roadmap.data["weeks"], serde_json::json!([]));
  }

  #[test]
  fn test_fetched_messages_are_confirmed_exchange() {
    let json = r#"{"role": "assistant", "content": "hi", "timestamp": "2026-08-21T10:00:00"}"#;
    let message = serde_json::from_str::<ApiChatMessage>(json)
      .unwrap()
      .into_message();

    assert_eq!(message.role, Role::Assistant);
    assert!(message.stamp.is_confirmed());
    assert_eq!(message.source, MessageSource::Exchange);
  }

  #[test]
  fn test_session_wire_form_excludes_fallbacks() {
    let mut book = SessionBook::default();
    let id = book.open_local(Some("Study"), Utc::now());
    let session = book.session_mut(&id).unwrap();
    session.messages.push(ChatMessage {
      role: Role::User,
      content: "hello".to_string(),
      stamp: MessageStamp::Provisional(Utc::now()),
      source: MessageSource::Exchange,
    });
    session.messages.push(ChatMessage {
      role: Role::Assistant,
      content: "offline fallback".to_string(),
      stamp: MessageStamp::Provisional(Utc::now()),
      source: MessageSource::Fallback,
    });

    let wire = ApiChatSession::from_session(book.session(&id).unwrap());
    assert_eq!(wire.messages.len(), 1);
    assert_eq!(wire.message_count, 1);
    assert_eq!(wire.messages[0].content, "hello");
  }
}
