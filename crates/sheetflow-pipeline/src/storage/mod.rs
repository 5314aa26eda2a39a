//! Object storage holding uploaded archives

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use tracing::{debug, info, instrument};

use crate::error::{PipelineError, PipelineResult};

pub mod config;

/// Where the pipeline reads archives from
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Fetch the raw bytes of the archive stored under `archive_id`
    async fn fetch(&self, archive_id: &str) -> PipelineResult<Vec<u8>>;
}

#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
}

impl Storage {
    pub fn new(config: config::StorageConfig) -> Self {
        debug!(
            bucket = %config.bucket,
            endpoint = ?config.endpoint,
            "Initializing storage"
        );

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "sheetflow-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("Storage client initialized for bucket: {}", config.bucket);

        Self {
            client,
            bucket: config.bucket,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self, data), fields(bucket = %self.bucket))]
    pub async fn upload(&self, key: &str, data: Vec<u8>) -> Result<UploadResult> {
        let checksum = calculate_sha256(&data);
        let size = data.len() as i64;

        debug!("Uploading {} bytes to s3://{}/{}", size, self.bucket, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/zip")
            .body(ByteStream::from(data))
            .send()
            .await
            .context("Failed to upload to S3")?;

        info!("Successfully uploaded to s3://{}/{}", self.bucket, key);

        Ok(UploadResult {
            key: key.to_string(),
            checksum,
            size,
        })
    }
}

#[async_trait]
impl ArchiveSource for Storage {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn fetch(&self, archive_id: &str) -> PipelineResult<Vec<u8>> {
        debug!("Downloading from s3://{}/{}", self.bucket, archive_id);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(archive_id)
            .send()
            .await
            .map_err(|err| {
                let err = err.into_service_error();
                if err.is_no_such_key() {
                    PipelineError::NotFound(format!("s3://{}/{}", self.bucket, archive_id))
                } else {
                    PipelineError::TransientIo(format!(
                        "Failed to download s3://{}/{}: {}",
                        self.bucket, archive_id, err
                    ))
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|err| {
                PipelineError::TransientIo(format!("Failed to read S3 response body: {}", err))
            })?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), self.bucket, archive_id);

        Ok(data)
    }
}

#[derive(Debug, Clone)]
pub struct UploadResult {
    pub key: String,
    pub checksum: String,
    pub size: i64,
}

pub(crate) fn calculate_sha256(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
