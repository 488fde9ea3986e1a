//! S3 object-storage driver.
//!
//! Thin wrapper over the AWS SDK against any S3-compatible endpoint
//! (MinIO in development). Object keys are opaque IDs; all naming lives in
//! the file metadata records.

use std::path::Path;

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::debug;

use crate::common::ServerError;
use crate::config::S3Config;

/// Object-storage driver interface. Keys are opaque; all naming lives in
/// the file metadata records.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        local_dir: &Path,
        name: &str,
        object_key: &str,
    ) -> Result<(), ServerError>;
    async fn download(
        &self,
        name: &str,
        object_key: &str,
        local_dir: &Path,
    ) -> Result<(), ServerError>;
    async fn remove(&self, object_key: &str) -> Result<(), ServerError>;
}

#[derive(Clone)]
pub struct S3Driver {
    client: Client,
    bucket: String,
}

impl S3Driver {
    pub async fn new(cfg: &S3Config) -> Self {
        let scheme = if cfg.tls { "https" } else { "http" };
        let region_provider =
            RegionProviderChain::default_provider().or_else(Region::new(cfg.region.clone()));
        let credentials = Credentials::new(
            cfg.access_key.clone(),
            cfg.secret_key.clone(),
            None,
            None,
            "colonies",
        );
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .endpoint_url(format!("{scheme}://{}", cfg.endpoint))
            .credentials_provider(credentials)
            .load()
            .await;
        // MinIO and friends need path-style addressing.
        let config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();
        Self {
            client: Client::from_conf(config),
            bucket: cfg.bucket.clone(),
        }
    }

    /// Ensure the configured bucket exists.
    pub async fn ensure_bucket(&self) -> Result<(), ServerError> {
        let exists = self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok();
        if !exists {
            self.client
                .create_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .map_err(|e| ServerError::Transient(format!("cannot create bucket: {e}")))?;
            debug!(bucket = %self.bucket, "created object-storage bucket");
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for S3Driver {
    async fn upload(
        &self,
        local_dir: &Path,
        name: &str,
        object_key: &str,
    ) -> Result<(), ServerError> {
        let body = ByteStream::from_path(local_dir.join(name))
            .await
            .map_err(|e| ServerError::Validation(format!("cannot read <{name}>: {e}")))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(object_key)
            .body(body)
            .send()
            .await
            .map_err(|e| ServerError::Transient(format!("object upload failed: {e}")))?;
        Ok(())
    }

    async fn download(
        &self,
        name: &str,
        object_key: &str,
        local_dir: &Path,
    ) -> Result<(), ServerError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(object_key)
            .send()
            .await
            .map_err(|e| ServerError::Transient(format!("object download failed: {e}")))?;
        let bytes = object
            .body
            .collect()
            .await
            .map_err(|e| ServerError::Transient(format!("object download failed: {e}")))?;
        tokio::fs::write(local_dir.join(name), bytes.into_bytes())
            .await
            .map_err(|e| ServerError::Internal(format!("cannot write <{name}>: {e}")))?;
        Ok(())
    }

    async fn remove(&self, object_key: &str) -> Result<(), ServerError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(object_key)
            .send()
            .await
            .map_err(|e| ServerError::Transient(format!("object delete failed: {e}")))?;
        Ok(())
    }
}
