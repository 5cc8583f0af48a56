//! HTTP client with per-attempt timeouts and bounded retry.
//!
//! Retries apply to transport failures only. A received response, success
//! or not, ends the attempt loop immediately: replaying a request the
//! server already processed is never safe to assume.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::error::{extract_error_message, ApiError, ErrorKind};
use crate::config::Config;

/// A received HTTP response, body read to completion.
#[derive(Debug, Clone)]
pub struct ApiResponse {
  pub status: u16,
  pub body: String,
}

/// HTTP client wrapper that turns an unreliable connection into a bounded,
/// classified outcome: at most `max_attempts` tries, each capped at
/// `timeout`, with a fixed delay in between.
#[derive(Clone)]
pub struct ResilientClient {
  http: reqwest::Client,
  base_url: Url,
  timeout: Duration,
  max_attempts: u32,
  retry_delay: Duration,
}

impl ResilientClient {
  pub fn new(config: &Config) -> Result<Self> {
    let base_url = Url::parse(&config.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url '{}': {}", config.api.base_url, e))?;
    Ok(Self::with_options(
      base_url,
      config.api.request_timeout(),
      config.api.max_attempts,
      config.api.retry_delay(),
    ))
  }

  pub fn with_options(
    base_url: Url,
    timeout: Duration,
    max_attempts: u32,
    retry_delay: Duration,
  ) -> Self {
    Self {
      http: reqwest::Client::new(),
      base_url,
      timeout,
      // Zero attempts would mean "never send anything".
      max_attempts: max_attempts.max(1),
      retry_delay,
    }
  }

  /// Issue a request, retrying transport failures up to the attempt limit.
  pub async fn send(
    &self,
    method: Method,
    path: &str,
    body: Option<&Value>,
    headers: Option<HeaderMap>,
  ) -> Result<ApiResponse, ApiError> {
    let url = self
      .base_url
      .join(path)
      .map_err(|e| ApiError::network(format!("invalid request path '{}': {}", path, e)))?;

    let mut last_failure = ApiError::network("no attempts were made");
    for attempt in 1..=self.max_attempts {
      let mut request = self
        .http
        .request(method.clone(), url.clone())
        .timeout(self.timeout);
      if let Some(headers) = &headers {
        request = request.headers(headers.clone());
      }
      if let Some(body) = body {
        request = request.json(body);
      }

      match request.send().await {
        Ok(response) => {
          let status = response.status();
          let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
              return Err(ApiError::network(format!(
                "failed to read response body: {}",
                e
              )))
            }
          };
          if status.is_success() {
            debug!(%url, status = status.as_u16(), attempt, "request ok");
            return Ok(ApiResponse {
              status: status.as_u16(),
              body,
            });
          }
          // A response was received; the server saw this request. Final.
          return Err(ApiError::from_status(
            status.as_u16(),
            extract_error_message(&body),
          ));
        }
        Err(e) => {
          last_failure = classify_transport(&e);
          warn!(
            %url,
            attempt,
            max_attempts = self.max_attempts,
            "request failed: {}",
            last_failure
          );
          if attempt < self.max_attempts {
            tokio::time::sleep(self.retry_delay).await;
          }
        }
      }
    }
    Err(last_failure)
  }

  pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
    let response = self.send(Method::GET, path, None, None).await?;
    decode_body(&response)
  }

  pub async fn post_json<T: DeserializeOwned>(
    &self,
    path: &str,
    body: &impl Serialize,
  ) -> Result<T, ApiError> {
    let body = encode_body(body)?;
    let response = self.send(Method::POST, path, Some(&body), None).await?;
    decode_body(&response)
  }

  pub async fn put_json<T: DeserializeOwned>(
    &self,
    path: &str,
    body: &impl Serialize,
  ) -> Result<T, ApiError> {
    let body = encode_body(body)?;
    let response = self.send(Method::PUT, path, Some(&body), None).await?;
    decode_body(&response)
  }

  pub async fn patch_json<T: DeserializeOwned>(
    &self,
    path: &str,
    body: &impl Serialize,
  ) -> Result<T, ApiError> {
    let body = encode_body(body)?;
    let response = self.send(Method::PATCH, path, Some(&body), None).await?;
    decode_body(&response)
  }

  pub async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
    let response = self.send(Method::DELETE, path, None, None).await?;
    decode_body(&response)
  }
}

fn classify_transport(err: &reqwest::Error) -> ApiError {
  if err.is_timeout() {
    ApiError::timeout(format!("request timed out: {}", err))
  } else {
    ApiError::network(format!("connection failed: {}", err))
  }
}

fn encode_body(body: &impl Serialize) -> Result<Value, ApiError> {
  serde_json::to_value(body).map_err(|e| {
    ApiError::new(
      ErrorKind::Validation,
      format!("failed to encode request body: {}", e),
      None,
    )
  })
}

/// Decode a 2xx body. A success status with an undecodable payload counts
/// as a server failure.
fn decode_body<T: DeserializeOwned>(response: &ApiResponse) -> Result<T, ApiError> {
  serde_json::from_str(&response.body).map_err(|e| {
    ApiError::new(
      ErrorKind::Server,
      format!("failed to decode response body: {}", e),
      Some(response.status),
    )
  })
}
