//! The offline cache agent: install, activate, and fetch handling.
//!
//! The agent never initiates work on its own. Each handler is invoked by
//! the host and returns a future the host awaits before moving on; the
//! single exception is the cache write on the fetch success path, which
//! runs detached so the response is never delayed by it.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{CacheStore, RequestKey, ResponseSnapshot};
use crate::net::{Network, Request, Response};

/// Version-tagged name of the one current durable cache.
pub const CACHE_NAMESPACE: &str = "tareas-sheets-v1";

/// Path served from cache when the network is down and no entry matches.
pub const OFFLINE_PATH: &str = "/offline";

/// Assets fetched fresh and stored up front at install time.
pub const PRECACHE_MANIFEST: &[&str] = &[
  "/",
  "/offline",
  "/static/manifest.webmanifest",
  "/static/icons/icon-192.png",
  "/static/icons/icon-512.png",
];

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
  /// Fresh from the network
  Network,
  /// Cached entry for this exact request
  Cache,
  /// Cached offline placeholder page
  Placeholder,
  /// Synthesized 503; nothing else was available
  Unavailable,
}

impl std::fmt::Display for FetchSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      FetchSource::Network => write!(f, "network"),
      FetchSource::Cache => write!(f, "cache"),
      FetchSource::Placeholder => write!(f, "placeholder"),
      FetchSource::Unavailable => write!(f, "unavailable"),
    }
  }
}

/// Result of serving one intercepted request.
pub struct FetchOutcome {
  /// The response handed back to the caller
  pub response: Response,
  /// Where it came from
  pub source: FetchSource,
  /// Detached cache write on the success path. Returning the response never
  /// waits on it; tests can.
  pub cache_write: Option<JoinHandle<()>>,
}

/// The agent itself: one named cache, one network capability, three
/// host-driven operations.
pub struct OfflineAgent<S: CacheStore, N: Network> {
  store: Arc<S>,
  network: Arc<N>,
}

impl<S: CacheStore + 'static, N: Network> OfflineAgent<S, N> {
  pub fn new(store: S, network: N) -> Self {
    Self {
      store: Arc::new(store),
      network: Arc::new(network),
    }
  }

  /// Direct access to the backing store.
  pub fn store(&self) -> &S {
    &self.store
  }

  /// Whether the current namespace already holds a pre-cached manifest
  /// from an earlier host session.
  pub fn installed(&self) -> Result<bool> {
    Ok(!self.store.entry_keys(CACHE_NAMESPACE)?.is_empty())
  }

  /// Install: fetch every manifest asset fresh and store the whole batch.
  ///
  /// All-or-nothing: a single failed asset fetch (or a non-success status)
  /// fails the install and leaves no partial population behind.
  pub async fn handle_install(&self) -> Result<()> {
    self.store.open_namespace(CACHE_NAMESPACE)?;

    let mut entries = Vec::with_capacity(PRECACHE_MANIFEST.len());
    for path in PRECACHE_MANIFEST {
      let request = Request::get(*path);
      let response = self
        .network
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Failed to pre-cache {}: {}", path, e))?;

      if !response.is_success() {
        return Err(eyre!(
          "Failed to pre-cache {}: upstream answered {}",
          path,
          response.status
        ));
      }

      entries.push((RequestKey::of(&request), ResponseSnapshot::of(&response)));
    }

    self.store.put_many(CACHE_NAMESPACE, &entries)?;
    info!("installed {} pre-cached assets into {}", entries.len(), CACHE_NAMESPACE);

    Ok(())
  }

  /// Activate: delete every namespace that is not the current one.
  ///
  /// Individual deletions fail independently and are never surfaced;
  /// a stale cache that refuses to go away is not worth failing over.
  pub async fn handle_activate(&self) -> Result<()> {
    for namespace in self.store.namespaces()? {
      if namespace == CACHE_NAMESPACE {
        continue;
      }
      match self.store.remove_namespace(&namespace) {
        Ok(_) => debug!("pruned stale cache {}", namespace),
        Err(e) => debug!("failed to prune stale cache {}: {}", namespace, e),
      }
    }
    Ok(())
  }

  /// Fetch: network first, cache fallback.
  ///
  /// On success the response is returned as-is and a copy is stored on a
  /// detached task. On network failure the fallback chain is: cached entry
  /// for this request, then the cached offline placeholder, then a
  /// synthetic 503. The chain is strictly ordered and the first hit wins.
  pub async fn handle_fetch(&self, request: Request) -> Result<FetchOutcome> {
    let key = RequestKey::of(&request);

    match self.network.fetch(&request).await {
      Ok(response) => {
        let snapshot = ResponseSnapshot::of(&response);
        let store = Arc::clone(&self.store);
        let write = tokio::spawn(async move {
          let written = store
            .open_namespace(CACHE_NAMESPACE)
            .and_then(|_| store.put(CACHE_NAMESPACE, &key, &snapshot));
          if let Err(e) = written {
            debug!("cache write for {} failed: {}", key, e);
          }
        });

        Ok(FetchOutcome {
          response,
          source: FetchSource::Network,
          cache_write: Some(write),
        })
      }
      Err(e) => {
        debug!("network fetch for {} failed, falling back to cache: {}", key, e);
        self.store.open_namespace(CACHE_NAMESPACE)?;

        if let Some(stored) = self.store.lookup(CACHE_NAMESPACE, &key)? {
          debug!("serving {} from cache (stored {})", key, stored.stored_at);
          return Ok(FetchOutcome {
            response: stored.snapshot.into_response(),
            source: FetchSource::Cache,
            cache_write: None,
          });
        }

        let placeholder = RequestKey::of(&Request::get(OFFLINE_PATH));
        if let Some(stored) = self.store.lookup(CACHE_NAMESPACE, &placeholder)? {
          debug!("serving offline placeholder (stored {})", stored.stored_at);
          return Ok(FetchOutcome {
            response: stored.snapshot.into_response(),
            source: FetchSource::Placeholder,
            cache_write: None,
          });
        }

        Ok(FetchOutcome {
          response: Response::service_unavailable(),
          source: FetchSource::Unavailable,
          cache_write: None,
        })
      }
    }
  }
}

impl<S: CacheStore, N: Network> Clone for OfflineAgent<S, N> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      network: Arc::clone(&self.network),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;
  use std::collections::HashMap;
  use std::future::Future;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex;

  /// Scripted network: serves canned responses per URL, or fails everything
  /// while offline.
  #[derive(Clone, Default)]
  struct FakeNetwork {
    inner: Arc<FakeInner>,
  }

  #[derive(Default)]
  struct FakeInner {
    responses: Mutex<HashMap<String, Response>>,
    offline: AtomicBool,
    fetches: AtomicUsize,
  }

  impl FakeNetwork {
    fn online() -> Self {
      Self::default()
    }

    fn unreachable() -> Self {
      let network = Self::default();
      network.go_offline();
      network
    }

    fn serve(&self, url: &str, response: Response) {
      self
        .inner
        .responses
        .lock()
        .unwrap()
        .insert(url.to_string(), response);
    }

    fn serve_manifest(&self) {
      for path in PRECACHE_MANIFEST {
        self.serve(path, ok(&format!("asset {}", path)));
      }
    }

    fn go_offline(&self) {
      self.inner.offline.store(true, Ordering::SeqCst);
    }

    fn fetches(&self) -> usize {
      self.inner.fetches.load(Ordering::SeqCst)
    }
  }

  impl Network for FakeNetwork {
    fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send {
      self.inner.fetches.fetch_add(1, Ordering::SeqCst);
      let result = if self.inner.offline.load(Ordering::SeqCst) {
        Err(eyre!("network unreachable"))
      } else {
        self
          .inner
          .responses
          .lock()
          .unwrap()
          .get(&request.url)
          .cloned()
          .ok_or_else(|| eyre!("connection refused for {}", request.url))
      };
      async move { result }
    }
  }

  fn ok(body: &str) -> Response {
    Response {
      status: 200,
      headers: vec![("content-type".into(), "text/html".into())],
      body: body.as_bytes().to_vec(),
    }
  }

  fn agent_with(network: FakeNetwork) -> OfflineAgent<MemoryStore, FakeNetwork> {
    OfflineAgent::new(MemoryStore::new(), network)
  }

  #[tokio::test]
  async fn test_install_populates_every_manifest_entry() {
    let network = FakeNetwork::online();
    network.serve_manifest();
    let agent = agent_with(network);

    agent.handle_install().await.unwrap();

    let expected: Vec<String> = PRECACHE_MANIFEST
      .iter()
      .map(|path| format!("GET {}", path))
      .collect();
    assert_eq!(agent.store().entry_keys(CACHE_NAMESPACE).unwrap(), expected);
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let network = FakeNetwork::online();
    network.serve_manifest();
    // Drop one asset so its fetch fails
    network
      .inner
      .responses
      .lock()
      .unwrap()
      .remove("/static/icons/icon-512.png");
    let agent = agent_with(network);

    assert!(agent.handle_install().await.is_err());
    assert!(agent.store().entry_keys(CACHE_NAMESPACE).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_rejects_non_success_asset() {
    let network = FakeNetwork::online();
    network.serve_manifest();
    network.serve(
      "/static/manifest.webmanifest",
      Response {
        status: 500,
        headers: Vec::new(),
        body: Vec::new(),
      },
    );
    let agent = agent_with(network);

    assert!(agent.handle_install().await.is_err());
    assert!(agent.store().entry_keys(CACHE_NAMESPACE).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_twice_is_idempotent() {
    let network = FakeNetwork::online();
    network.serve_manifest();
    let agent = agent_with(network);

    agent.handle_install().await.unwrap();
    let after_first = agent.store().entry_keys(CACHE_NAMESPACE).unwrap();
    agent.handle_install().await.unwrap();

    assert_eq!(agent.store().entry_keys(CACHE_NAMESPACE).unwrap(), after_first);
  }

  #[tokio::test]
  async fn test_installed_reflects_precache_state() {
    let network = FakeNetwork::online();
    network.serve_manifest();
    let agent = agent_with(network);

    assert!(!agent.installed().unwrap());
    agent.handle_install().await.unwrap();
    assert!(agent.installed().unwrap());
  }

  #[tokio::test]
  async fn test_activate_prunes_stale_namespaces() {
    let network = FakeNetwork::online();
    network.serve_manifest();
    let agent = agent_with(network);
    agent.handle_install().await.unwrap();

    let stale_key = RequestKey::of(&Request::get("/"));
    let stale = ResponseSnapshot::of(&ok("old"));
    agent.store().put("tareas-sheets-v0", &stale_key, &stale).unwrap();

    agent.handle_activate().await.unwrap();

    assert_eq!(
      agent.store().namespaces().unwrap(),
      vec![CACHE_NAMESPACE.to_string()]
    );
  }

  #[tokio::test]
  async fn test_activate_with_only_current_namespace_is_noop() {
    let network = FakeNetwork::online();
    network.serve_manifest();
    let agent = agent_with(network);
    agent.handle_install().await.unwrap();

    agent.handle_activate().await.unwrap();

    assert_eq!(
      agent.store().namespaces().unwrap(),
      vec![CACHE_NAMESPACE.to_string()]
    );
    assert!(agent.installed().unwrap());
  }

  #[tokio::test]
  async fn test_fetch_success_returns_network_response() {
    let network = FakeNetwork::online();
    let canned = ok("<h1>tareas</h1>");
    network.serve("/x", canned.clone());
    let agent = agent_with(network);

    let outcome = agent.handle_fetch(Request::get("/x")).await.unwrap();

    assert_eq!(outcome.source, FetchSource::Network);
    assert_eq!(outcome.response, canned);
  }

  #[tokio::test]
  async fn test_fetch_success_write_settles_into_cache() {
    let network = FakeNetwork::online();
    let canned = ok("cache me");
    network.serve("/x", canned.clone());
    let agent = agent_with(network);

    let outcome = agent.handle_fetch(Request::get("/x")).await.unwrap();
    outcome.cache_write.unwrap().await.unwrap();

    let stored = agent
      .store()
      .lookup(CACHE_NAMESPACE, &RequestKey::of(&Request::get("/x")))
      .unwrap()
      .unwrap();
    assert_eq!(stored.snapshot, ResponseSnapshot::of(&canned));
  }

  #[tokio::test]
  async fn test_fetch_offline_serves_cached_entry() {
    let network = FakeNetwork::online();
    network.serve("/x", ok("seen while online"));
    let agent = agent_with(network.clone());

    let outcome = agent.handle_fetch(Request::get("/x")).await.unwrap();
    outcome.cache_write.unwrap().await.unwrap();

    network.go_offline();
    let outcome = agent.handle_fetch(Request::get("/x")).await.unwrap();

    assert_eq!(outcome.source, FetchSource::Cache);
    assert_eq!(outcome.response.body_text(), "seen while online");
  }

  #[tokio::test]
  async fn test_fetch_offline_falls_back_to_placeholder() {
    let network = FakeNetwork::online();
    network.serve_manifest();
    let agent = agent_with(network.clone());
    agent.handle_install().await.unwrap();

    network.go_offline();
    let outcome = agent.handle_fetch(Request::get("/never-seen")).await.unwrap();

    assert_eq!(outcome.source, FetchSource::Placeholder);
    assert_eq!(outcome.response.body_text(), "asset /offline");
  }

  #[tokio::test]
  async fn test_fetch_offline_prefers_exact_entry_over_placeholder() {
    let network = FakeNetwork::online();
    network.serve_manifest();
    network.serve("/x", ok("exact"));
    let agent = agent_with(network.clone());
    agent.handle_install().await.unwrap();

    let outcome = agent.handle_fetch(Request::get("/x")).await.unwrap();
    outcome.cache_write.unwrap().await.unwrap();

    network.go_offline();
    let outcome = agent.handle_fetch(Request::get("/x")).await.unwrap();

    assert_eq!(outcome.source, FetchSource::Cache);
    assert_eq!(outcome.response.body_text(), "exact");
  }

  #[tokio::test]
  async fn test_fetch_offline_with_empty_cache_is_unavailable() {
    let agent = agent_with(FakeNetwork::unreachable());

    let outcome = agent.handle_fetch(Request::get("/missing")).await.unwrap();

    assert_eq!(outcome.source, FetchSource::Unavailable);
    assert_eq!(outcome.response.status, 503);
    assert_eq!(outcome.response.body_text(), "Offline");
    assert!(outcome.cache_write.is_none());
  }

  #[tokio::test]
  async fn test_failed_fetch_never_mutates_cache() {
    let agent = agent_with(FakeNetwork::unreachable());

    agent.handle_fetch(Request::get("/x")).await.unwrap();

    assert!(agent.store().entry_keys(CACHE_NAMESPACE).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_http_error_status_still_counts_as_success() {
    let network = FakeNetwork::online();
    network.serve(
      "/gone",
      Response {
        status: 404,
        headers: Vec::new(),
        body: b"not here".to_vec(),
      },
    );
    let agent = agent_with(network.clone());

    let outcome = agent.handle_fetch(Request::get("/gone")).await.unwrap();
    assert_eq!(outcome.source, FetchSource::Network);
    assert_eq!(outcome.response.status, 404);
    outcome.cache_write.unwrap().await.unwrap();

    network.go_offline();
    let outcome = agent.handle_fetch(Request::get("/gone")).await.unwrap();
    assert_eq!(outcome.source, FetchSource::Cache);
    assert_eq!(outcome.response.status, 404);
  }

  #[tokio::test]
  async fn test_fetch_attempts_network_before_cache() {
    let network = FakeNetwork::online();
    network.serve("/x", ok("fresh"));
    let agent = agent_with(network.clone());

    // Seed the cache with an older body for the same request
    let key = RequestKey::of(&Request::get("/x"));
    agent
      .store()
      .put(CACHE_NAMESPACE, &key, &ResponseSnapshot::of(&ok("stale")))
      .unwrap();

    let outcome = agent.handle_fetch(Request::get("/x")).await.unwrap();

    assert_eq!(outcome.source, FetchSource::Network);
    assert_eq!(outcome.response.body_text(), "fresh");
    assert_eq!(network.fetches(), 1);
  }
}
