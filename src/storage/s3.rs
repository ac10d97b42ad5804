//! AWS S3 snapshot store, for runs without a persistent disk.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;

use crate::error::{AppError, Result};
use crate::models::Record;
use crate::storage::SnapshotStore;

const DEFAULT_KEY: &str = "previous_run.json";

/// Snapshot kept as a JSON object in a bucket.
pub struct S3SnapshotStore {
    client: Client,
    bucket: String,
    key: String,
}

impl S3SnapshotStore {
    pub fn new(client: Client, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Build from `SNAPSHOT_S3_BUCKET` and `SNAPSHOT_S3_KEY`.
    pub async fn from_env() -> Result<Self> {
        let bucket = std::env::var("SNAPSHOT_S3_BUCKET")
            .map_err(|_| AppError::config("SNAPSHOT_S3_BUCKET is not set"))?;
        let key = std::env::var("SNAPSHOT_S3_KEY").unwrap_or_else(|_| DEFAULT_KEY.to_string());

        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Ok(Self::new(Client::new(&config), bucket, key))
    }
}

#[async_trait]
impl SnapshotStore for S3SnapshotStore {
    async fn load(&self) -> Result<Vec<Record>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| AppError::S3(e.to_string()))?;
                Ok(serde_json::from_slice(&bytes.into_bytes())?)
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    log::info!("No previous run at {}", self.location());
                    Ok(Vec::new())
                } else {
                    Err(AppError::S3(service_err.to_string()))
                }
            }
        }
    }

    async fn save(&self, records: &[Record]) -> Result<()> {
        let body = ByteStream::from(serde_json::to_vec(records)?);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .body(body)
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| AppError::S3(e.to_string()))?;
        Ok(())
    }

    fn location(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}
