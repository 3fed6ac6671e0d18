//! Request and response descriptors, treated opaquely by the agent.

use serde::{Deserialize, Serialize};

/// An intercepted outbound request as the host saw it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
  pub method: String,
  /// Path or absolute URL. Kept verbatim; it is the request's cache identity.
  pub url: String,
  pub headers: Vec<(String, String)>,
}

impl Request {
  /// A GET request with no extra headers.
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.into(),
      headers: Vec::new(),
    }
  }
}

/// A response, fresh from the network or reconstructed from cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  /// Minimal synthetic response served when neither network nor cache has
  /// anything for a request.
  pub fn service_unavailable() -> Self {
    Self {
      status: 503,
      headers: Vec::new(),
      body: b"Offline".to_vec(),
    }
  }

  /// Whether the status is in the success range.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Body rendered as text, for display purposes.
  pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(&self.body)
  }
}
