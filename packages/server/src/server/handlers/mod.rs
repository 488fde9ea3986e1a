//! RPC handlers, one module per domain.

pub mod colony;
pub mod executor;
pub mod files;
pub mod generator;
pub mod process;
pub mod subscription;
pub mod user;

use crate::common::ServerError;
use crate::domains::colony::Colony;
use crate::kernel::security;
use crate::server::app::AppState;

pub type HandlerResult = Result<serde_json::Value, ServerError>;

/// The caller is the colony itself or one of its members.
pub(crate) async fn require_member_or_owner(
    state: &AppState,
    caller: &str,
    colony_name: &str,
) -> Result<(), ServerError> {
    let colony = Colony::find_by_name(colony_name, &state.pool)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("colony <{colony_name}> does not exist")))?;
    if colony.id == caller {
        return Ok(());
    }
    security::require_member(caller, colony_name, &state.pool)
        .await
        .map(|_| ())
}
