//! Caller authorization.
//!
//! The RPC layer recovers a caller ID from the payload signature; the
//! checks here decide what that identity may do. Three tiers:
//!
//! - server owner: register and remove colonies
//! - colony owner (caller ID = colony ID): manage executors and users
//! - colony member: an approved executor or a registered user of the colony
//!
//! Executor membership checks also stamp `last_heard_from_time`.

use sqlx::PgPool;

use crate::common::ServerError;
use crate::domains::colony::Colony;
use crate::domains::executor::Executor;
use crate::domains::user::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatorKind {
    Executor,
    User,
}

/// The resolved identity behind a member-level call.
#[derive(Debug, Clone)]
pub struct Initiator {
    pub id: String,
    pub name: String,
    pub kind: InitiatorKind,
}

pub fn require_server_owner(server_id: &str, caller_id: &str) -> Result<(), ServerError> {
    if caller_id != server_id {
        return Err(ServerError::Forbidden(
            "only the server owner may manage colonies".to_string(),
        ));
    }
    Ok(())
}

/// The caller must be the colony itself (caller ID = colony ID).
pub async fn require_colony_owner(
    caller_id: &str,
    colony_name: &str,
    pool: &PgPool,
) -> Result<Colony, ServerError> {
    let colony = Colony::find_by_name(colony_name, pool)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("colony <{colony_name}> does not exist")))?;
    if colony.id != caller_id {
        return Err(ServerError::Forbidden(format!(
            "caller does not own colony <{colony_name}>"
        )));
    }
    Ok(colony)
}

/// The caller must be an approved executor or a registered user of the
/// colony.
pub async fn require_member(
    caller_id: &str,
    colony_name: &str,
    pool: &PgPool,
) -> Result<Initiator, ServerError> {
    if Colony::find_by_name(colony_name, pool).await?.is_none() {
        return Err(ServerError::NotFound(format!(
            "colony <{colony_name}> does not exist"
        )));
    }

    if let Some(executor) = Executor::find_by_id(caller_id, pool).await? {
        if executor.colony_name != colony_name {
            return Err(ServerError::Forbidden(format!(
                "executor is not a member of colony <{colony_name}>"
            )));
        }
        if !executor.is_approved() {
            return Err(ServerError::Forbidden(format!(
                "executor <{}> is not approved",
                executor.name
            )));
        }
        Executor::touch(&executor.id, pool).await?;
        return Ok(Initiator {
            id: executor.id,
            name: executor.name,
            kind: InitiatorKind::Executor,
        });
    }

    if let Some(user) = User::find_by_id(colony_name, caller_id, pool).await? {
        return Ok(Initiator {
            id: user.id,
            name: user.name,
            kind: InitiatorKind::User,
        });
    }

    Err(ServerError::Forbidden(format!(
        "caller is not a member of colony <{colony_name}>"
    )))
}

/// The caller must be an approved executor of the colony; users are not
/// allowed to pull work.
pub async fn require_approved_executor(
    caller_id: &str,
    colony_name: &str,
    pool: &PgPool,
) -> Result<Executor, ServerError> {
    let executor = Executor::find_by_id(caller_id, pool)
        .await?
        .ok_or_else(|| ServerError::Forbidden("caller is not an executor".to_string()))?;
    if executor.colony_name != colony_name {
        return Err(ServerError::Forbidden(format!(
            "executor is not a member of colony <{colony_name}>"
        )));
    }
    if !executor.is_approved() {
        return Err(ServerError::Forbidden(format!(
            "executor <{}> is not approved",
            executor.name
        )));
    }
    Executor::touch(&executor.id, pool).await?;
    Ok(executor)
}
