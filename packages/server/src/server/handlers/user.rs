use tracing::info;

use crate::common::ServerError;
use crate::domains::user::User;
use crate::kernel::security;
use crate::server::app::AppState;
use crate::server::handlers::{require_member_or_owner, HandlerResult};
use crate::server::messages::{AddUserMsg, GetUserMsg, GetUsersMsg, RemoveUserMsg};

pub async fn add_user(state: &AppState, caller: &str, msg: AddUserMsg) -> HandlerResult {
    security::require_colony_owner(caller, &msg.user.colony_name, &state.pool).await?;

    if msg.user.id.len() != 64 {
        return Err(ServerError::Validation(
            "user id must be a 64-char hex identity".to_string(),
        ));
    }
    if msg.user.name.is_empty() {
        return Err(ServerError::Validation(
            "user name must not be empty".to_string(),
        ));
    }

    let user = msg.user.insert(&state.pool).await?;
    info!(user_name = %user.name, colony_name = %user.colony_name, "user added");
    Ok(serde_json::to_value(user)?)
}

pub async fn get_user(state: &AppState, caller: &str, msg: GetUserMsg) -> HandlerResult {
    require_member_or_owner(state, caller, &msg.colony_name).await?;
    let user = User::find_by_name(&msg.colony_name, &msg.name, &state.pool)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("user <{}> does not exist", msg.name)))?;
    Ok(serde_json::to_value(user)?)
}

pub async fn get_users(state: &AppState, caller: &str, msg: GetUsersMsg) -> HandlerResult {
    require_member_or_owner(state, caller, &msg.colony_name).await?;
    let users = User::find_by_colony(&msg.colony_name, &state.pool).await?;
    Ok(serde_json::to_value(users)?)
}

pub async fn remove_user(state: &AppState, caller: &str, msg: RemoveUserMsg) -> HandlerResult {
    security::require_colony_owner(caller, &msg.colony_name, &state.pool).await?;
    User::remove(&msg.colony_name, &msg.name, &state.pool).await?;
    info!(user_name = %msg.name, "user removed");
    Ok(serde_json::json!({}))
}
