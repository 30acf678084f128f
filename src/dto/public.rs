use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

/// Point-in-time view of every court.
#[derive(Debug, Serialize, ToSchema)]
pub struct SnapshotResponse {
    /// Public snapshot keyed by court id.
    #[schema(value_type = Object)]
    pub courts: BTreeMap<String, Value>,
}
