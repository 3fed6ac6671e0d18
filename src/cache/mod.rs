//! Durable request/response cache backing the offline fallback path.
//!
//! This module is agnostic of the fetch strategy layered on top. It:
//! - Keeps one named cache per version tag (a "namespace")
//! - Stores immutable response snapshots keyed by request identity
//! - Supports whole-namespace deletion for version-bump cleanup
//! - Provides a durable SQLite backend and an in-memory one for tests

mod store;
mod types;

#[cfg(test)]
pub use store::MemoryStore;
pub use store::{CacheStore, SqliteStore};
pub use types::{RequestKey, ResponseSnapshot, StoredResponse};
