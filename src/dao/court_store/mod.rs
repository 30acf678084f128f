#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;

use std::collections::HashMap;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::dao::{models::HistoryEntity, storage::StorageResult};

/// Abstraction over the persistence layer for court snapshots and the match history journal.
pub trait CourtStore: Send + Sync {
    /// Replace the stored snapshot of a court.
    fn persist_snapshot(&self, kort_id: String, snapshot: Value) -> BoxFuture<'static, StorageResult<()>>;
    /// Every stored snapshot keyed by court id.
    fn load_snapshots(&self) -> BoxFuture<'static, StorageResult<HashMap<String, Value>>>;
    fn append_history(&self, entry: HistoryEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Remove and return the most recently appended entry.
    fn delete_latest_history(&self) -> BoxFuture<'static, StorageResult<Option<HistoryEntity>>>;
    /// History entries, newest first.
    fn list_history(&self) -> BoxFuture<'static, StorageResult<Vec<HistoryEntity>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
