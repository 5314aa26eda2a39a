use serde::{Deserialize, Serialize};
use sheetflow_common::env;

use crate::error::PipelineResult;

/// Bucket archives are uploaded to unless `S3_BUCKET` says otherwise.
pub const DEFAULT_BUCKET: &str = "zip-container";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    #[serde(skip_serializing)]
    pub access_key: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub path_style: bool,
}

impl StorageConfig {
    pub fn from_env() -> PipelineResult<Self> {
        Ok(Self {
            endpoint: env::optional("S3_ENDPOINT"),
            region: env::var_or("S3_REGION", "us-east-1"),
            bucket: env::var_or("S3_BUCKET", DEFAULT_BUCKET),
            access_key: env::optional("S3_ACCESS_KEY")
                .or_else(|| env::optional("AWS_ACCESS_KEY_ID"))
                .unwrap_or_else(|| "minioadmin".to_string()),
            secret_key: env::optional("S3_SECRET_KEY")
                .or_else(|| env::optional("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_else(|| "minioadmin".to_string()),
            path_style: env::parse_or("S3_PATH_STYLE", false)?,
        })
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
        }
    }
}
