//! Key and snapshot types for the response cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::net::{Request, Response};

/// Identity of a cache entry: the request's method plus its URL exactly as
/// the host saw it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
  /// Build the key for a request.
  pub fn of(request: &Request) -> Self {
    Self(format!("{} {}", request.method, request.url))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// SHA256 digest of the key, used as a stable fixed-length row key.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.0.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// Immutable copy of a response body and headers, captured at store time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl ResponseSnapshot {
  /// Duplicate a response into a snapshot.
  pub fn of(response: &Response) -> Self {
    Self {
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
    }
  }

  /// Reconstruct a response from the snapshot.
  pub fn into_response(self) -> Response {
    Response {
      status: self.status,
      headers: self.headers,
      body: self.body,
    }
  }
}

/// A cache entry together with its store-time metadata.
#[derive(Debug, Clone)]
pub struct StoredResponse {
  /// The stored snapshot
  pub snapshot: ResponseSnapshot,
  /// When the entry was written
  pub stored_at: DateTime<Utc>,
}
