//! Typed client for the platform's REST endpoints.

use tracing::debug;

use super::api_types::{
  ApiAckResponse, ApiActivityRequest, ApiChatMessage, ApiChatSession, ApiCreateChatRequest,
  ApiCreateChatResponse, ApiDeleteChatResponse, ApiLoadChatResponse, ApiQuizRecord, ApiRoadmap,
  ApiSaveChatRequest, ApiSendMessageRequest, ApiSendMessageResponse,
};
use super::types::{DashboardBundle, QuizRecord, Roadmap, UserStats};
use crate::chat::{AssistantReply, ChatSession, SessionBook};
use crate::net::{ApiError, ResilientClient};

/// How many recent quiz attempts the dashboard shows.
const RECENT_QUIZ_LIMIT: usize = 5;

#[derive(Clone)]
pub struct PlatformClient {
  client: ResilientClient,
}

impl PlatformClient {
  pub fn new(client: ResilientClient) -> Self {
    Self { client }
  }

  /// Aggregate activity counters for the user.
  pub async fn user_stats(&self, email: &str) -> Result<UserStats, ApiError> {
    self
      .client
      .get_json(&format!("api/user-stats?user_email={}", encode(email)))
      .await
  }

  /// Completed quiz attempts, newest first.
  pub async fn quiz_history(&self, email: &str) -> Result<Vec<QuizRecord>, ApiError> {
    let records: Vec<ApiQuizRecord> = self
      .client
      .get_json(&format!("api/quiz-history?user_email={}", encode(email)))
      .await?;
    let mut records: Vec<QuizRecord> = records.into_iter().map(ApiQuizRecord::into_record).collect();
    records.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
    Ok(records)
  }

  /// All roadmaps owned by the user.
  pub async fn roadmaps(&self, email: &str) -> Result<Vec<Roadmap>, ApiError> {
    let roadmaps: Vec<ApiRoadmap> = self
      .client
      .get_json(&format!("api/roadmap/user?user_email={}", encode(email)))
      .await?;
    Ok(roadmaps.into_iter().map(ApiRoadmap::into_roadmap).collect())
  }

  /// Compose the dashboard from its three sources, fetched concurrently.
  /// One failed source fails the bundle: a dashboard with silently missing
  /// panels would read as "no data".
  pub async fn dashboard_bundle(&self, email: &str) -> Result<DashboardBundle, ApiError> {
    let (stats, history, roadmaps) = futures::try_join!(
      self.user_stats(email),
      self.quiz_history(email),
      self.roadmaps(email),
    )?;
    let recent_quizzes = history.into_iter().take(RECENT_QUIZ_LIMIT).collect();
    Ok(DashboardBundle {
      stats,
      recent_quizzes,
      roadmaps,
    })
  }

  /// Everything the server knows about this user's chat sessions.
  pub async fn load_sessions(&self, email: &str) -> Result<SessionBook, ApiError> {
    let response: ApiLoadChatResponse = self
      .client
      .get_json(&format!("api/chat/loadChat?userEmail={}", encode(email)))
      .await?;
    Ok(response.into_book())
  }

  /// Create a session on the remote; the returned id is authoritative.
  pub async fn create_session(&self, email: &str, name: &str) -> Result<ChatSession, ApiError> {
    let response: ApiCreateChatResponse = self
      .client
      .post_json(
        "api/chat/createChat",
        &ApiCreateChatRequest {
          session_name: name,
          user_email: email,
        },
      )
      .await?;
    Ok(response.session.into_session())
  }

  /// Deliver a user message and receive the assistant's reply.
  ///
  /// `history` is the prior conversation the model should see; the server
  /// stamps the exchange with a single timestamp.
  pub async fn send_message(
    &self,
    email: &str,
    input: &str,
    history: &[ApiChatMessage],
    session_id: Option<&str>,
  ) -> Result<AssistantReply, ApiError> {
    let response: ApiSendMessageResponse = self
      .client
      .post_json(
        "api/chat/message",
        &ApiSendMessageRequest {
          input,
          user_email: email,
          chat_history: history,
          session_id,
        },
      )
      .await?;
    Ok(AssistantReply {
      content: response.message,
      timestamp: response
        .timestamp
        .as_deref()
        .and_then(super::api_types::parse_timestamp),
    })
  }

  /// Delete a session; the response lists what the server still holds.
  pub async fn delete_session(
    &self,
    email: &str,
    session_id: &str,
  ) -> Result<Vec<ChatSession>, ApiError> {
    let response: ApiDeleteChatResponse = self
      .client
      .delete_json(&format!(
        "api/chat/deleteChat/{}?userEmail={}",
        session_id,
        encode(email)
      ))
      .await?;
    Ok(
      response
        .remaining_sessions
        .into_iter()
        .map(ApiChatSession::into_session)
        .collect(),
    )
  }

  /// Bump a session's last-activity marker.
  pub async fn touch_session(&self, email: &str, session_id: &str) -> Result<(), ApiError> {
    let ack: ApiAckResponse = self
      .client
      .patch_json(
        &format!("api/chat/updateActivity/{}/activity", session_id),
        &ApiActivityRequest { user_email: email },
      )
      .await?;
    if !ack.success {
      debug!(session_id, "activity update not acknowledged");
    }
    Ok(())
  }

  /// Bulk-persist sessions on the remote.
  pub async fn save_sessions(
    &self,
    email: &str,
    sessions: &[ApiChatSession],
  ) -> Result<(), ApiError> {
    let _: ApiAckResponse = self
      .client
      .put_json(
        "api/chat/saveChat",
        &ApiSaveChatRequest {
          user_email: email,
          sessions,
        },
      )
      .await?;
    Ok(())
  }
}

fn encode(value: &str) -> String {
  url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
