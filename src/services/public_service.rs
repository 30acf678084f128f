use crate::{dto::public::SnapshotResponse, state::SharedState};

/// Snapshot of every court, each serialized under the court lock.
pub async fn snapshot(state: &SharedState) -> SnapshotResponse {
    SnapshotResponse {
        courts: state.scores().snapshot_all_public().await,
    }
}
