//! Error taxonomy for remote API calls.
//!
//! Every failure a caller can see is an [`ApiError`] carrying one of a
//! closed set of kinds, so upper layers can branch on the kind without
//! string matching.

use serde::Deserialize;
use std::fmt;

/// Classification of a failed API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Connection-level failure: DNS, refused, reset, no route.
  Network,
  /// The attempt exceeded its deadline before a response arrived.
  Timeout,
  /// The request was rejected as malformed (HTTP 400 and other 4xx).
  Validation,
  /// Authentication or authorization failure (HTTP 401/403).
  Auth,
  /// The resource does not exist (HTTP 404).
  NotFound,
  /// The remote failed (HTTP 5xx, or a success payload that would not decode).
  Server,
}

/// A failed API call, normalized from transport errors and HTTP statuses.
///
/// Always a returned value; the client never panics on a failed request.
#[derive(Debug, Clone)]
pub struct ApiError {
  pub kind: ErrorKind,
  pub message: String,
  /// HTTP status when a response was actually received.
  pub status: Option<u16>,
}

impl ApiError {
  pub fn new(kind: ErrorKind, message: impl Into<String>, status: Option<u16>) -> Self {
    Self {
      kind,
      message: message.into(),
      status,
    }
  }

  pub fn network(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Network, message, None)
  }

  pub fn timeout(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Timeout, message, None)
  }

  /// Classify a received HTTP status, with an optional server-sent message.
  pub fn from_status(status: u16, message: Option<String>) -> Self {
    let kind = match status {
      400 => ErrorKind::Validation,
      401 | 403 => ErrorKind::Auth,
      404 => ErrorKind::NotFound,
      s if (400..500).contains(&s) => ErrorKind::Validation,
      _ => ErrorKind::Server,
    };
    let message = message.unwrap_or_else(|| format!("HTTP {}", status));
    Self::new(kind, message, Some(status))
  }

  /// Whether retrying the same request could plausibly succeed.
  ///
  /// Only transport-level failures qualify; a received response, whatever
  /// its status, is final.
  pub fn is_transient(&self) -> bool {
    matches!(self.kind, ErrorKind::Network | ErrorKind::Timeout)
  }
}

impl fmt::Display for ApiError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.status {
      Some(status) => write!(f, "{:?} (HTTP {}): {}", self.kind, status, self.message),
      None => write!(f, "{:?}: {}", self.kind, self.message),
    }
  }
}

impl std::error::Error for ApiError {}

/// Error payloads come back as `{"error": "..."}` or `{"message": "..."}`.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
  error: Option<String>,
  message: Option<String>,
}

/// Pull a human-readable message out of an error response body.
///
/// Falls back to the raw body when it is not the expected JSON shape, and
/// to None when the body is empty.
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
  if body.trim().is_empty() {
    return None;
  }
  let parsed = serde_json::from_str::<ApiErrorBody>(body)
    .ok()
    .and_then(|b| b.error.or(b.message));
  Some(parsed.unwrap_or_else(|| body.to_string()))
}
