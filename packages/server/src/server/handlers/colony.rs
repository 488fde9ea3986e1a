use tracing::info;

use crate::common::ServerError;
use crate::domains::colony::Colony;
use crate::kernel::security;
use crate::server::app::AppState;
use crate::server::handlers::{require_member_or_owner, HandlerResult};
use crate::server::messages::{
    AddColonyMsg, ColonyStatisticsMsg, GetColonyMsg, RemoveColonyMsg,
};

pub async fn add_colony(state: &AppState, caller: &str, msg: AddColonyMsg) -> HandlerResult {
    security::require_server_owner(&state.server_id, caller)?;

    if msg.colony.id.len() != 64 {
        return Err(ServerError::Validation(
            "colony id must be a 64-char hex identity".to_string(),
        ));
    }
    if msg.colony.name.is_empty() {
        return Err(ServerError::Validation(
            "colony name must not be empty".to_string(),
        ));
    }

    let colony = msg.colony.insert(&state.pool).await?;
    info!(colony_name = %colony.name, "colony added");
    Ok(serde_json::to_value(colony)?)
}

pub async fn remove_colony(state: &AppState, caller: &str, msg: RemoveColonyMsg) -> HandlerResult {
    security::require_server_owner(&state.server_id, caller)?;
    Colony::remove(&msg.colony_name, &state.pool).await?;
    info!(colony_name = %msg.colony_name, "colony removed");
    Ok(serde_json::json!({}))
}

pub async fn get_colony(state: &AppState, caller: &str, msg: GetColonyMsg) -> HandlerResult {
    require_member_or_owner(state, caller, &msg.colony_name).await?;
    let colony = Colony::find_by_name(&msg.colony_name, &state.pool)
        .await?
        .ok_or_else(|| {
            ServerError::NotFound(format!("colony <{}> does not exist", msg.colony_name))
        })?;
    Ok(serde_json::to_value(colony)?)
}

pub async fn get_colonies(state: &AppState, caller: &str) -> HandlerResult {
    security::require_server_owner(&state.server_id, caller)?;
    let colonies = Colony::find_all(&state.pool).await?;
    Ok(serde_json::to_value(colonies)?)
}

pub async fn colony_statistics(
    state: &AppState,
    caller: &str,
    msg: ColonyStatisticsMsg,
) -> HandlerResult {
    require_member_or_owner(state, caller, &msg.colony_name).await?;
    let stats = Colony::statistics(&msg.colony_name, &state.pool).await?;
    Ok(serde_json::to_value(stats)?)
}
