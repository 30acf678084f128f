//! Process-local [`CourtStore`], used when no database is configured and in tests.

use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Mutex;

use super::CourtStore;
use crate::dao::{
    models::{HistoryEntity, SnapshotEntity},
    storage::StorageResult,
};

#[derive(Default)]
struct Inner {
    snapshots: HashMap<String, SnapshotEntity>,
    history: Vec<HistoryEntity>,
}

#[derive(Clone, Default)]
pub struct MemoryCourtStore {
    inner: Arc<Mutex<Inner>>,
}

impl CourtStore for MemoryCourtStore {
    fn persist_snapshot(&self, kort_id: String, snapshot: Value) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            guard.snapshots.insert(
                kort_id.clone(),
                SnapshotEntity {
                    kort_id,
                    state: snapshot,
                },
            );
            Ok(())
        })
    }

    fn load_snapshots(&self) -> BoxFuture<'static, StorageResult<HashMap<String, Value>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let guard = inner.lock().await;
            Ok(guard
                .snapshots
                .values()
                .map(|entity| (entity.kort_id.clone(), entity.state.clone()))
                .collect())
        })
    }

    fn append_history(&self, entry: HistoryEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.lock().await.history.push(entry);
            Ok(())
        })
    }

    fn delete_latest_history(&self) -> BoxFuture<'static, StorageResult<Option<HistoryEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.lock().await.history.pop()) })
    }

    fn list_history(&self) -> BoxFuture<'static, StorageResult<Vec<HistoryEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let guard = inner.lock().await;
            Ok(guard.history.iter().rev().cloned().collect())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn entry(kort_id: &str) -> HistoryEntity {
        HistoryEntity {
            id: Uuid::new_v4(),
            kort_id: kort_id.into(),
            player_a: "Nadal".into(),
            player_b: "Djokovic".into(),
            sets: Vec::new(),
            winner: Some("A".into()),
            duration_seconds: 3600,
            category: None,
            phase: None,
            started_at: None,
            finished_at: "2024-06-01T12:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn snapshots_are_replaced_per_court() {
        let store = MemoryCourtStore::default();
        store.persist_snapshot("1".into(), json!({"n": 1})).await.unwrap();
        store.persist_snapshot("1".into(), json!({"n": 2})).await.unwrap();
        store.persist_snapshot("2".into(), json!({"n": 3})).await.unwrap();

        let snapshots = store.load_snapshots().await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots["1"], json!({"n": 2}));
    }

    #[tokio::test]
    async fn delete_latest_pops_newest_entry() {
        let store = MemoryCourtStore::default();
        assert!(store.delete_latest_history().await.unwrap().is_none());

        store.append_history(entry("1")).await.unwrap();
        store.append_history(entry("2")).await.unwrap();

        let listed = store.list_history().await.unwrap();
        assert_eq!(listed[0].kort_id, "2");

        let removed = store.delete_latest_history().await.unwrap().unwrap();
        assert_eq!(removed.kort_id, "2");
        assert_eq!(store.list_history().await.unwrap().len(), 1);
    }
}
