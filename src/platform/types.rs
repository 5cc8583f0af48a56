//! Domain types for the learning platform data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Aggregate learning activity counters for the signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
  pub total_learning_minutes: u64,
  pub quizzes_taken: u32,
  pub active_roadmaps: u32,
  pub skills_learning: u32,
  pub roadmaps_created: u32,
  pub total_skills_learning: u32,
}

/// One completed quiz attempt. Ids are server-issued UUID strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizRecord {
  pub id: String,
  pub quiz_id: String,
  pub quiz_title: String,
  pub topic: String,
  pub difficulty: String,
  pub total_questions: u32,
  pub correct_answers: u32,
  pub percentage: f64,
  pub completed_at: Option<DateTime<Utc>>,
  /// Seconds spent on the attempt, when the attempt tracked it.
  pub time_taken: Option<i64>,
}

/// A learning roadmap owned by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roadmap {
  pub id: String,
  pub title: String,
  pub description: String,
  pub duration_weeks: Option<u32>,
  pub created_at: Option<DateTime<Utc>>,
  /// The generated plan itself; kept opaque so it stays viewable offline.
  pub data: Value,
}

/// Everything the dashboard renders, composed client-side from the stats,
/// quiz history, and roadmap endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardBundle {
  pub stats: UserStats,
  pub recent_quizzes: Vec<QuizRecord>,
  pub roadmaps: Vec<Roadmap>,
}
