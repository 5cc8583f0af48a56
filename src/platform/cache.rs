//! Cache domain bindings for platform payload types.

use crate::cache::{DomainKey, DomainPayload};

use super::types::{DashboardBundle, QuizRecord, Roadmap, UserStats};

impl DomainPayload for UserStats {
  fn domain_key() -> DomainKey {
    DomainKey::UserStats
  }
}

impl DomainPayload for DashboardBundle {
  fn domain_key() -> DomainKey {
    DomainKey::DashboardBundle
  }
}

impl DomainPayload for Vec<QuizRecord> {
  fn domain_key() -> DomainKey {
    DomainKey::QuizHistory
  }
}

impl DomainPayload for Vec<Roadmap> {
  fn domain_key() -> DomainKey {
    DomainKey::Roadmaps
  }
}
