use tracing::info;

use crate::common::ServerError;
use crate::domains::files::{ColonyFile, Snapshot};
use crate::kernel::security;
use crate::server::app::AppState;
use crate::server::handlers::HandlerResult;
use crate::server::messages::{
    AddFileMsg, AddSnapshotMsg, GetFileLabelsMsg, GetFileMsg, GetFilesMsg, GetSnapshotMsg,
    GetSnapshotsMsg, RemoveFileMsg, RemoveSnapshotMsg,
};

pub async fn add_file(state: &AppState, caller: &str, msg: AddFileMsg) -> HandlerResult {
    security::require_member(caller, &msg.file.colony_name, &state.pool).await?;

    if msg.file.label.is_empty() || msg.file.name.is_empty() {
        return Err(ServerError::Validation(
            "file label and name must not be empty".to_string(),
        ));
    }
    if msg.file.checksum.is_empty() {
        return Err(ServerError::Validation(
            "file checksum must not be empty".to_string(),
        ));
    }

    let file = msg.file.insert(&state.pool).await?;
    info!(
        file_id = %file.id,
        label = %file.label,
        name = %file.name,
        revision = file.sequence_nr,
        "file added"
    );
    Ok(serde_json::to_value(file)?)
}

pub async fn get_file(state: &AppState, caller: &str, msg: GetFileMsg) -> HandlerResult {
    security::require_member(caller, &msg.colony_name, &state.pool).await?;

    let file = if !msg.file_id.is_empty() {
        ColonyFile::find_by_id(&msg.colony_name, &msg.file_id, &state.pool).await?
    } else {
        ColonyFile::find_latest(&msg.colony_name, &msg.label, &msg.name, &state.pool).await?
    };
    let file = file.ok_or_else(|| ServerError::NotFound("file does not exist".to_string()))?;
    Ok(serde_json::to_value(file)?)
}

pub async fn get_files(state: &AppState, caller: &str, msg: GetFilesMsg) -> HandlerResult {
    security::require_member(caller, &msg.colony_name, &state.pool).await?;
    let files = ColonyFile::find_by_label(&msg.colony_name, &msg.label, &state.pool).await?;
    Ok(serde_json::to_value(files)?)
}

pub async fn get_file_labels(
    state: &AppState,
    caller: &str,
    msg: GetFileLabelsMsg,
) -> HandlerResult {
    security::require_member(caller, &msg.colony_name, &state.pool).await?;
    let labels = ColonyFile::list_labels(&msg.colony_name, &state.pool).await?;
    Ok(serde_json::to_value(labels)?)
}

pub async fn remove_file(state: &AppState, caller: &str, msg: RemoveFileMsg) -> HandlerResult {
    security::require_member(caller, &msg.colony_name, &state.pool).await?;

    let file = ColonyFile::find_by_id(&msg.colony_name, &msg.file_id, &state.pool)
        .await?
        .ok_or_else(|| {
            ServerError::NotFound(format!("file <{}> does not exist", msg.file_id))
        })?;

    // Drop the stored object first; losing metadata for a still-present
    // object beats a dangling metadata record.
    if let Some(s3) = &state.s3 {
        s3.remove(&file.reference.s3_object.object).await?;
    }
    ColonyFile::remove(&msg.colony_name, &file.id, &state.pool).await?;
    info!(file_id = %file.id, "file removed");
    Ok(serde_json::json!({}))
}

pub async fn add_snapshot(state: &AppState, caller: &str, msg: AddSnapshotMsg) -> HandlerResult {
    security::require_member(caller, &msg.colony_name, &state.pool).await?;

    if msg.name.is_empty() {
        return Err(ServerError::Validation(
            "snapshot name must not be empty".to_string(),
        ));
    }
    let snapshot = Snapshot::create(&msg.colony_name, &msg.label, &msg.name, &state.pool).await?;
    info!(
        snapshot_id = %snapshot.id,
        label = %snapshot.label,
        files = snapshot.file_ids.len(),
        "snapshot added"
    );
    Ok(serde_json::to_value(snapshot)?)
}

pub async fn get_snapshot(state: &AppState, caller: &str, msg: GetSnapshotMsg) -> HandlerResult {
    security::require_member(caller, &msg.colony_name, &state.pool).await?;

    let snapshot = if !msg.snapshot_id.is_empty() {
        Snapshot::find_by_id(&msg.colony_name, &msg.snapshot_id, &state.pool).await?
    } else {
        Snapshot::find_by_name(&msg.colony_name, &msg.name, &state.pool).await?
    };
    let snapshot =
        snapshot.ok_or_else(|| ServerError::NotFound("snapshot does not exist".to_string()))?;
    Ok(serde_json::to_value(snapshot)?)
}

pub async fn get_snapshots(state: &AppState, caller: &str, msg: GetSnapshotsMsg) -> HandlerResult {
    security::require_member(caller, &msg.colony_name, &state.pool).await?;
    let snapshots = Snapshot::find_by_colony(&msg.colony_name, &state.pool).await?;
    Ok(serde_json::to_value(snapshots)?)
}

pub async fn remove_snapshot(
    state: &AppState,
    caller: &str,
    msg: RemoveSnapshotMsg,
) -> HandlerResult {
    security::require_member(caller, &msg.colony_name, &state.pool).await?;
    Snapshot::remove(&msg.colony_name, &msg.name, &state.pool).await?;
    info!(snapshot_name = %msg.name, "snapshot removed");
    Ok(serde_json::json!({}))
}
