use std::future::Future;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::config::Config;

use super::types::{Request, Response};

/// The host platform's single outbound fetch capability.
///
/// An `Err` means the transport failed (connection refused, timeout,
/// abort). An HTTP error status is still a successful fetch and comes back
/// as an `Ok` response.
pub trait Network: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// HTTP transport that resolves agent-relative paths against a configured
/// upstream origin.
pub struct HttpNetwork {
  base: Url,
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(config: &Config) -> Result<Self> {
    let base = Url::parse(&config.upstream.url)
      .map_err(|e| eyre!("Invalid upstream url {}: {}", config.upstream.url, e))?;

    // The transport's own timeout is what produces the "network failure"
    // condition consumed by the offline fallback.
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.network.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { base, client })
  }
}

impl Network for HttpNetwork {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send {
    async move {
      let url = self
        .base
        .join(&request.url)
        .map_err(|e| eyre!("Invalid request url {}: {}", request.url, e))?;

      let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|e| eyre!("Invalid request method {}: {}", request.method, e))?;

      let mut outgoing = self.client.request(method, url);
      for (name, value) in &request.headers {
        outgoing = outgoing.header(name.as_str(), value.as_str());
      }

      let incoming = outgoing
        .send()
        .await
        .map_err(|e| eyre!("Network fetch failed for {}: {}", request.url, e))?;

      let status = incoming.status().as_u16();
      let headers = incoming
        .headers()
        .iter()
        .map(|(name, value)| {
          (
            name.to_string(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
          )
        })
        .collect();

      let body = incoming
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read response body for {}: {}", request.url, e))?
        .to_vec();

      Ok(Response {
        status,
        headers,
        body,
      })
    }
  }
}
