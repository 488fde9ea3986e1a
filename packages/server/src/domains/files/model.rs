//! File and snapshot metadata - SQL persistence layer.
//!
//! Files are content-addressed metadata records (SHA-256 checksums)
//! pointing at objects in S3-compatible storage. Labels are slash-delimited
//! paths; adding a file under an existing (colony, label, name) creates a
//! new revision. A snapshot pins the latest revision of every file under a
//! label prefix at creation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::common::{crypto, ServerError};

/// SHA-256 content checksum, hex encoded. This is the algorithm behind
/// `checksum_alg = "SHA256"` in file records; clients compute it before
/// upload and tooling built on this crate re-verifies with it.
pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct S3Object {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub port: i32,
    #[serde(default)]
    pub tls: bool,
    #[serde(rename = "accesskey", default)]
    pub access_key: String,
    #[serde(rename = "secretkey", default)]
    pub secret_key: String,
    #[serde(default)]
    pub region: String,
    #[serde(rename = "encryptionkey", default)]
    pub encryption_key: String,
    #[serde(rename = "encryptionalg", default)]
    pub encryption_alg: String,
    /// Opaque object key in the bucket.
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub bucket: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileReference {
    #[serde(default)]
    pub protocol: String,
    #[serde(rename = "s3object", default)]
    pub s3_object: S3Object,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ColonyFile {
    #[serde(rename = "fileid")]
    #[sqlx(rename = "file_id")]
    pub id: String,
    #[serde(rename = "colonyname")]
    #[sqlx(rename = "colony_name")]
    pub colony_name: String,
    pub label: String,
    pub name: String,
    pub size: i64,
    pub checksum: String,
    #[serde(rename = "checksumalg")]
    #[sqlx(rename = "checksum_alg")]
    pub checksum_alg: String,
    #[serde(rename = "ref")]
    #[sqlx(json)]
    pub reference: FileReference,
    #[serde(rename = "sequencenr")]
    #[sqlx(rename = "sequence_nr")]
    pub sequence_nr: i64,
    pub added: DateTime<Utc>,
}

impl ColonyFile {
    /// Insert a file, assigning the next revision number for its
    /// (colony, label, name).
    pub async fn insert(mut self, pool: &PgPool) -> Result<Self, ServerError> {
        if self.id.is_empty() {
            self.id = crypto::random_id();
        }
        let mut tx = pool.begin().await?;

        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence_nr), 0) + 1 FROM files
             WHERE colony_name = $1 AND label = $2 AND name = $3",
        )
        .bind(&self.colony_name)
        .bind(&self.label)
        .bind(&self.name)
        .fetch_one(&mut *tx)
        .await?;
        self.sequence_nr = next;
        self.added = Utc::now();

        sqlx::query(
            "INSERT INTO files (
                file_id, colony_name, label, name, size, checksum,
                checksum_alg, reference, sequence_nr, added
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&self.id)
        .bind(&self.colony_name)
        .bind(&self.label)
        .bind(&self.name)
        .bind(self.size)
        .bind(&self.checksum)
        .bind(&self.checksum_alg)
        .bind(serde_json::to_value(&self.reference)?)
        .bind(self.sequence_nr)
        .bind(self.added)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(self)
    }

    pub async fn find_by_id(
        colony_name: &str,
        id: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>, ServerError> {
        sqlx::query_as::<_, Self>("SELECT * FROM files WHERE colony_name = $1 AND file_id = $2")
            .bind(colony_name)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Latest revision of a named file under a label.
    pub async fn find_latest(
        colony_name: &str,
        label: &str,
        name: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>, ServerError> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM files
             WHERE colony_name = $1 AND label = $2 AND name = $3
             ORDER BY sequence_nr DESC LIMIT 1",
        )
        .bind(colony_name)
        .bind(label)
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    /// Latest revision of every file under a label.
    pub async fn find_by_label(
        colony_name: &str,
        label: &str,
        pool: &PgPool,
    ) -> Result<Vec<Self>, ServerError> {
        sqlx::query_as::<_, Self>(
            "SELECT DISTINCT ON (name) * FROM files
             WHERE colony_name = $1 AND label = $2
             ORDER BY name, sequence_nr DESC",
        )
        .bind(colony_name)
        .bind(label)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Latest revision of every file under a label or any of its
    /// slash-nested sublabels.
    pub async fn find_by_label_prefix(
        colony_name: &str,
        label: &str,
        pool: &PgPool,
    ) -> Result<Vec<Self>, ServerError> {
        sqlx::query_as::<_, Self>(
            "SELECT DISTINCT ON (label, name) * FROM files
             WHERE colony_name = $1 AND (label = $2 OR label LIKE $3)
             ORDER BY label, name, sequence_nr DESC",
        )
        .bind(colony_name)
        .bind(label)
        .bind(format!("{}/%", label.trim_end_matches('/')))
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn list_labels(colony_name: &str, pool: &PgPool) -> Result<Vec<String>, ServerError> {
        sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT label FROM files WHERE colony_name = $1 ORDER BY label",
        )
        .bind(colony_name)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn remove(colony_name: &str, id: &str, pool: &PgPool) -> Result<(), ServerError> {
        let result = sqlx::query("DELETE FROM files WHERE colony_name = $1 AND file_id = $2")
            .bind(colony_name)
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServerError::NotFound(format!("file <{id}> does not exist")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Snapshot {
    #[serde(rename = "snapshotid")]
    #[sqlx(rename = "snapshot_id")]
    pub id: String,
    #[serde(rename = "colonyname")]
    #[sqlx(rename = "colony_name")]
    pub colony_name: String,
    pub label: String,
    pub name: String,
    #[serde(rename = "fileids")]
    #[sqlx(rename = "file_ids")]
    pub file_ids: Vec<String>,
    pub added: DateTime<Utc>,
}

impl Snapshot {
    /// Create a snapshot pinning the latest file IDs under `label`.
    pub async fn create(
        colony_name: &str,
        label: &str,
        name: &str,
        pool: &PgPool,
    ) -> Result<Self, ServerError> {
        let files = ColonyFile::find_by_label_prefix(colony_name, label, pool).await?;
        let snapshot = Self {
            id: crypto::random_id(),
            colony_name: colony_name.to_string(),
            label: label.to_string(),
            name: name.to_string(),
            file_ids: files.into_iter().map(|f| f.id).collect(),
            added: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO snapshots (snapshot_id, colony_name, label, name, file_ids, added)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.colony_name)
        .bind(&snapshot.label)
        .bind(&snapshot.name)
        .bind(&snapshot.file_ids)
        .bind(snapshot.added)
        .execute(pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                ServerError::Conflict(format!("snapshot <{name}> already exists"))
            }
            other => ServerError::from(other),
        })?;

        Ok(snapshot)
    }

    pub async fn find_by_id(
        colony_name: &str,
        id: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>, ServerError> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM snapshots WHERE colony_name = $1 AND snapshot_id = $2",
        )
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
        sqlx::query_as::<_, Self>("SELECT * FROM snapshots WHERE colony_name = $1 AND name = $2")
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
        sqlx::query_as::<_, Self>(
            "SELECT * FROM snapshots WHERE colony_name = $1 ORDER BY added DESC",
        )
        .bind(colony_name)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn remove(colony_name: &str, name: &str, pool: &PgPool) -> Result<(), ServerError> {
        let result = sqlx::query("DELETE FROM snapshots WHERE colony_name = $1 AND name = $2")
            .bind(colony_name)
            .bind(name)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServerError::NotFound(format!(
                "snapshot <{name}> does not exist"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_sha256_hex() {
        let sum = checksum(b"hello colonies");
        assert_eq!(sum.len(), 64);
        assert_eq!(sum, checksum(b"hello colonies"));
        assert_ne!(sum, checksum(b"hello colonie"));
    }

    #[test]
    fn test_file_json_roundtrip() {
        let file = ColonyFile {
            id: "f".repeat(64),
            colony_name: "dev".to_string(),
            label: "/data/models".to_string(),
            name: "weights.bin".to_string(),
            size: 1024,
            checksum: "a".repeat(64),
            checksum_alg: "SHA256".to_string(),
            reference: FileReference {
                protocol: "s3".to_string(),
                s3_object: S3Object {
                    server: "minio.local".to_string(),
                    port: 9000,
                    object: "o".repeat(64),
                    bucket: "colonies".to_string(),
                    ..Default::default()
                },
            },
            sequence_nr: 1,
            added: Utc::now(),
        };
        let json = serde_json::to_string(&file).unwrap();
        assert!(json.contains("\"fileid\""));
        assert!(json.contains("\"s3object\""));
        let back: ColonyFile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, file);
    }
}
