//! User model - SQL persistence layer.
//!
//! A user is an identity with submit rights in a colony but no pull rights.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::ServerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    #[serde(rename = "userid")]
    #[sqlx(rename = "user_id")]
    pub id: String,
    pub name: String,
    #[serde(rename = "colonyname")]
    #[sqlx(rename = "colony_name")]
    pub colony_name: String,
}

impl User {
    pub fn new(id: String, name: String, colony_name: String) -> Self {
        Self {
            id,
            name,
            colony_name,
        }
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<Self, ServerError> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO users (user_id, name, colony_name) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(&self.id)
        .bind(&self.name)
        .bind(&self.colony_name)
        .fetch_one(pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                ServerError::Conflict(format!("user <{}> already exists in colony", self.name))
            }
            other => other.into(),
        })
    }

    /// Look up a user by recovered identity, scoped to a colony.
    pub async fn find_by_id(
        colony_name: &str,
        id: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>, ServerError> {
        sqlx::query_as::<_, Self>("SELECT * FROM users WHERE colony_name = $1 AND user_id = $2")
            .bind(colony_name)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_name(
        colony_name: &str,
        name: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>, ServerError> {
        sqlx::query_as::<_, Self>("SELECT * FROM users WHERE colony_name = $1 AND name = $2")
            .bind(colony_name)
            .bind(name)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_colony(
        colony_name: &str,
        pool: &PgPool,
    ) -> Result<Vec<Self>, ServerError> {
        sqlx::query_as::<_, Self>("SELECT * FROM users WHERE colony_name = $1 ORDER BY name")
            .bind(colony_name)
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn remove(colony_name: &str, name: &str, pool: &PgPool) -> Result<(), ServerError> {
        let result = sqlx::query("DELETE FROM users WHERE colony_name = $1 AND name = $2")
            .bind(colony_name)
            .bind(name)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServerError::NotFound(format!(
                "user <{name}> does not exist"
            )));
        }
        Ok(())
    }
}
