//! Background writer that moves snapshots and finished matches to the court store.
//!
//! Mutations only push onto an unbounded channel; the writer batches whatever is pending and
//! keeps just the newest snapshot per court.

use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::{
    dao::{court_store::CourtStore, models::HistoryEntity},
    state::{SharedState, store::StateSink},
};

/// Unit of work for the writer.
#[derive(Debug)]
pub enum PersistJob {
    Snapshot { kort_id: String, data: Value },
    History(HistoryEntity),
}

/// [`StateSink`] feeding the writer task.
#[derive(Clone)]
pub struct PersistenceWriter {
    tx: mpsc::UnboundedSender<PersistJob>,
}

/// Receiving side consumed by [`run`].
pub struct PersistenceQueue {
    rx: mpsc::UnboundedReceiver<PersistJob>,
}

impl PersistenceWriter {
    pub fn channel() -> (Self, PersistenceQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, PersistenceQueue { rx })
    }

    fn push(&self, job: PersistJob) {
        if self.tx.send(job).is_err() {
            warn!("persistence writer stopped; job dropped");
        }
    }
}

impl StateSink for PersistenceWriter {
    fn persist_snapshot(&self, kort_id: &str, snapshot: &Value) {
        self.push(PersistJob::Snapshot {
            kort_id: kort_id.to_string(),
            data: snapshot.clone(),
        });
    }

    fn append_history(&self, entry: HistoryEntity) {
        self.push(PersistJob::History(entry));
    }
}

#[derive(Default)]
struct Batch {
    snapshots: IndexMap<String, Value>,
    history: Vec<HistoryEntity>,
}

impl Batch {
    fn add(&mut self, job: PersistJob) {
        match job {
            PersistJob::Snapshot { kort_id, data } => {
                self.snapshots.insert(kort_id, data);
            }
            PersistJob::History(entry) => self.history.push(entry),
        }
    }
}

/// Drain jobs until every writer handle is dropped.
pub async fn run(state: SharedState, mut queue: PersistenceQueue) {
    while let Some(job) = queue.rx.recv().await {
        let mut batch = Batch::default();
        batch.add(job);
        while let Ok(job) = queue.rx.try_recv() {
            batch.add(job);
        }

        match state.court_store().await {
            Some(store) => write_batch(store.as_ref(), batch).await,
            None => {
                debug!(
                    snapshots = batch.snapshots.len(),
                    "no court store installed; snapshots not persisted"
                );
                for entry in batch.history {
                    error!(
                        kort_id = %entry.kort_id,
                        entry_id = %entry.id,
                        "no court store installed; history entry lost"
                    );
                }
            }
        }
    }
    debug!("persistence writer finished");
}

async fn write_batch(store: &dyn CourtStore, batch: Batch) {
    for (kort_id, data) in batch.snapshots {
        if let Err(err) = store.persist_snapshot(kort_id.clone(), data).await {
            error!(kort_id, error = %err, "failed to persist court snapshot");
        }
    }
    for entry in batch.history {
        let kort_id = entry.kort_id.clone();
        if let Err(err) = store.append_history(entry).await {
            error!(kort_id, error = %err, "failed to append match history");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dao::court_store::memory::MemoryCourtStore;

    #[tokio::test]
    async fn batch_keeps_newest_snapshot_per_court() {
        let (writer, mut queue) = PersistenceWriter::channel();
        writer.persist_snapshot("1", &json!({"n": 1}));
        writer.persist_snapshot("2", &json!({"n": 2}));
        writer.persist_snapshot("1", &json!({"n": 3}));
        drop(writer);

        let mut batch = Batch::default();
        while let Some(job) = queue.rx.recv().await {
            batch.add(job);
        }
        assert_eq!(batch.snapshots.len(), 2);
        assert_eq!(batch.snapshots.get_index(0).unwrap().0, "1");
        assert_eq!(batch.snapshots["1"], json!({"n": 3}));

        let store = MemoryCourtStore::default();
        write_batch(&store, batch).await;
        assert_eq!(store.load_snapshots().await.unwrap()["1"], json!({"n": 3}));
    }
}
