use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::dao::models::{HistoryEntity, SnapshotEntity};

pub const SNAPSHOT_PREFIX: &str = "snapshot::";
pub const HISTORY_PREFIX: &str = "history::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchSnapshotDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub snapshot: SnapshotEntity,
}

impl From<(SnapshotEntity, Option<String>)> for CouchSnapshotDocument {
    fn from((snapshot, rev): (SnapshotEntity, Option<String>)) -> Self {
        Self {
            id: snapshot_doc_id(&snapshot.kort_id),
            rev,
            snapshot,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchHistoryDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub entry: HistoryEntity,
}

impl From<HistoryEntity> for CouchHistoryDocument {
    fn from(entry: HistoryEntity) -> Self {
        Self {
            id: history_doc_id(&entry, OffsetDateTime::now_utc()),
            rev: None,
            entry,
        }
    }
}

pub fn snapshot_doc_id(kort_id: &str) -> String {
    format!("{SNAPSHOT_PREFIX}{kort_id}")
}

/// History ids sort by insertion time so `_all_docs` returns the journal in order.
pub fn history_doc_id(entry: &HistoryEntity, recorded_at: OffsetDateTime) -> String {
    let nanos = recorded_at.unix_timestamp_nanos().max(0);
    format!("{HISTORY_PREFIX}{nanos:020}::{}", entry.id)
}
