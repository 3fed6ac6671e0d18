//! Cache store trait and its SQLite and in-memory backends.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
#[cfg(test)]
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::types::{RequestKey, ResponseSnapshot, StoredResponse};

/// Trait for durable request/response cache backends.
///
/// Namespaces model independent named caches; exactly one of them is the
/// current one at any time and the rest are candidates for pruning.
pub trait CacheStore: Send + Sync {
  /// Register a namespace, creating it if absent.
  fn open_namespace(&self, namespace: &str) -> Result<()>;

  /// Store one entry, overwriting any previous entry for the same key.
  fn put(&self, namespace: &str, key: &RequestKey, snapshot: &ResponseSnapshot) -> Result<()>;

  /// Store a batch of entries. Either all entries land or none do.
  fn put_many(&self, namespace: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()>;

  /// Look up the entry for a key.
  fn lookup(&self, namespace: &str, key: &RequestKey) -> Result<Option<StoredResponse>>;

  /// List all registered namespaces.
  fn namespaces(&self) -> Result<Vec<String>>;

  /// Delete a namespace and everything in it. Returns whether it existed.
  fn remove_namespace(&self, namespace: &str) -> Result<bool>;

  /// List the stored request keys of a namespace in insertion order.
  fn entry_keys(&self, namespace: &str) -> Result<Vec<String>>;
}

/// SQLite-based cache store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offcache").join("cache.db"))
  }

  /// Run database migrations for the cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the cache tables.
const CACHE_SCHEMA: &str = r#"
-- Registry of named caches; one row per namespace
CREATE TABLE IF NOT EXISTS cache_registry (
    namespace TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots, keyed by request identity within a namespace
CREATE TABLE IF NOT EXISTS response_cache (
    namespace TEXT NOT NULL,
    request_digest TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, request_digest),
    FOREIGN KEY (namespace) REFERENCES cache_registry(namespace) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_response_cache_namespace ON response_cache(namespace);
"#;

impl CacheStore for SqliteStore {
  fn open_namespace(&self, namespace: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_registry (namespace) VALUES (?)",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to register cache {}: {}", namespace, e))?;

    Ok(())
  }

  fn put(&self, namespace: &str, key: &RequestKey, snapshot: &ResponseSnapshot) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_registry (namespace) VALUES (?)",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to register cache {}: {}", namespace, e))?;

    let headers = serde_json::to_string(&snapshot.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache (namespace, request_digest, request_key, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![namespace, key.digest(), key.as_str(), snapshot.status, headers, &snapshot.body],
      )
      .map_err(|e| eyre!("Failed to store entry for {}: {}", key, e))?;

    Ok(())
  }

  fn put_many(&self, namespace: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Single transaction: a failed batch leaves no partial population.
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx
      .execute(
        "INSERT OR IGNORE INTO cache_registry (namespace) VALUES (?)",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to register cache {}: {}", namespace, e))?;

    for (key, snapshot) in entries {
      let headers = serde_json::to_string(&snapshot.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO response_cache (namespace, request_digest, request_key, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![namespace, key.digest(), key.as_str(), snapshot.status, headers, &snapshot.body],
      )
      .map_err(|e| eyre!("Failed to store entry for {}: {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn lookup(&self, namespace: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, stored_at FROM response_cache
         WHERE namespace = ? AND request_digest = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![namespace, key.digest()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    match row {
      Some((status, headers, body, stored_at_str)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        let stored_at = parse_datetime(&stored_at_str)?;
        Ok(Some(StoredResponse {
          snapshot: ResponseSnapshot {
            status,
            headers,
            body,
          },
          stored_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT namespace FROM cache_registry ORDER BY namespace")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let namespaces = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(namespaces)
  }

  fn remove_namespace(&self, namespace: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM response_cache WHERE namespace = ?",
      params![namespace],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", namespace, e))?;

    let removed = tx
      .execute(
        "DELETE FROM cache_registry WHERE namespace = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to delete cache {}: {}", namespace, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn entry_keys(&self, namespace: &str) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT request_key FROM response_cache WHERE namespace = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![namespace], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list entries: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(keys)
  }
}

/// In-memory cache store for tests. Nothing survives the process.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
  caches: Mutex<BTreeMap<String, Vec<(RequestKey, StoredResponse)>>>,
}

#[cfg(test)]
impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[cfg(test)]
impl CacheStore for MemoryStore {
  fn open_namespace(&self, namespace: &str) -> Result<()> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    caches.entry(namespace.to_string()).or_default();
    Ok(())
  }

  fn put(&self, namespace: &str, key: &RequestKey, snapshot: &ResponseSnapshot) -> Result<()> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let entries = caches.entry(namespace.to_string()).or_default();
    let stored = StoredResponse {
      snapshot: snapshot.clone(),
      stored_at: Utc::now(),
    };

    match entries.iter_mut().find(|(k, _)| k == key) {
      Some((_, existing)) => *existing = stored,
      None => entries.push((key.clone(), stored)),
    }

    Ok(())
  }

  fn put_many(&self, namespace: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()> {
    for (key, snapshot) in entries {
      self.put(namespace, key, snapshot)?;
    }
    Ok(())
  }

  fn lookup(&self, namespace: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    let caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(caches.get(namespace).and_then(|entries| {
      entries
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, stored)| stored.clone())
    }))
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    let caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(caches.keys().cloned().collect())
  }

  fn remove_namespace(&self, namespace: &str) -> Result<bool> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(caches.remove(namespace).is_some())
  }

  fn entry_keys(&self, namespace: &str) -> Result<Vec<String>> {
    let caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      caches
        .get(namespace)
        .map(|entries| entries.iter().map(|(k, _)| k.as_str().to_string()).collect())
        .unwrap_or_default(),
    )
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
