//! Process attributes: named input/output/error key-value pairs.
//!
//! Attributes are keyed per (target process, type, key); re-adding an
//! existing key overwrites its value. The attribute ID is the digest of the
//! key triple so clients can compute it without a round-trip.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};

use crate::common::{crypto, ServerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
#[serde(into = "i32", try_from = "i32")]
pub enum AttributeType {
    In = 0,
    Out = 1,
    Err = 2,
}

impl From<AttributeType> for i32 {
    fn from(t: AttributeType) -> i32 {
        t as i32
    }
}

impl TryFrom<i32> for AttributeType {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AttributeType::In),
            1 => Ok(AttributeType::Out),
            2 => Ok(AttributeType::Err),
            other => Err(format!("unknown attribute type {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attribute {
    #[serde(rename = "attributeid", default)]
    #[sqlx(rename = "attribute_id")]
    pub id: String,
    #[serde(rename = "targetid")]
    #[sqlx(rename = "target_id")]
    pub target_id: String,
    #[serde(rename = "targetcolonyname", default)]
    #[sqlx(rename = "target_colony_name")]
    pub target_colony_name: String,
    #[serde(rename = "attributetype")]
    #[sqlx(rename = "attribute_type")]
    pub attribute_type: AttributeType,
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(
        target_id: &str,
        target_colony_name: &str,
        attribute_type: AttributeType,
        key: &str,
        value: &str,
    ) -> Self {
        let id = crypto::hash_id(
            format!("{}:{}:{}", target_id, i32::from(attribute_type), key).as_bytes(),
        );
        Self {
            id,
            target_id: target_id.to_string(),
            target_colony_name: target_colony_name.to_string(),
            attribute_type,
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<Self, ServerError> {
        sqlx::query_as::<_, Self>(UPSERT_SQL)
            .bind(&self.id)
            .bind(&self.target_id)
            .bind(&self.target_colony_name)
            .bind(self.attribute_type)
            .bind(&self.key)
            .bind(&self.value)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn insert_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<(), ServerError> {
        sqlx::query(UPSERT_SQL)
            .bind(&self.id)
            .bind(&self.target_id)
            .bind(&self.target_colony_name)
            .bind(self.attribute_type)
            .bind(&self.key)
            .bind(&self.value)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn find_by_id(id: &str, pool: &PgPool) -> Result<Option<Self>, ServerError> {
        sqlx::query_as::<_, Self>("SELECT * FROM attributes WHERE attribute_id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_target(
        target_id: &str,
        attribute_type: AttributeType,
        pool: &PgPool,
    ) -> Result<Vec<Self>, ServerError> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM attributes WHERE target_id = $1 AND attribute_type = $2 ORDER BY key",
        )
        .bind(target_id)
        .bind(attribute_type)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn remove_by_target(target_id: &str, pool: &PgPool) -> Result<(), ServerError> {
        sqlx::query("DELETE FROM attributes WHERE target_id = $1")
            .bind(target_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

const UPSERT_SQL: &str = "INSERT INTO attributes (
        attribute_id, target_id, target_colony_name, attribute_type, key, value
     )
     VALUES ($1, $2, $3, $4, $5, $6)
     ON CONFLICT (target_id, attribute_type, key) DO UPDATE SET value = EXCLUDED.value
     RETURNING *";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_id_is_deterministic() {
        let a = Attribute::new("p1", "dev", AttributeType::In, "arg", "x");
        let b = Attribute::new("p1", "dev", AttributeType::In, "arg", "y");
        let c = Attribute::new("p1", "dev", AttributeType::Out, "arg", "x");
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_attribute_type_wire_format() {
        assert_eq!(serde_json::to_string(&AttributeType::Err).unwrap(), "2");
        let t: AttributeType = serde_json::from_str("0").unwrap();
        assert_eq!(t, AttributeType::In);
    }
}
