use async_trait::async_trait;
use std::time::Duration;

use aws_sdk_s3::{
    config::{timeout::TimeoutConfig, BehaviorVersion, Credentials, Region},
    primitives::ByteStream,
    Client,
};
use tracing::{debug, info, instrument};

use super::ArchiveStore;
use crate::config::S3Config;
use crate::error::{IngestError, Result};

/// S3-compatible object storage (AWS, MinIO, ...)
#[derive(Clone)]
pub struct S3Archive {
    client: Client,
    bucket: String,
}

impl S3Archive {
    /// Static keys when configured, otherwise the default AWS credential chain.
    pub async fn new(config: &S3Config) -> Result<Self> {
        let mut builder = if config.access_key.is_empty() {
            let shared = aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(config.region.clone()))
                .load()
                .await;
            aws_sdk_s3::config::Builder::from(&shared)
        } else {
            let credentials = Credentials::new(
                &config.access_key,
                &config.secret_key,
                None,
                None,
                "swim-ingest",
            );
            aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .credentials_provider(credentials)
                .region(Region::new(config.region.clone()))
        };

        let timeouts = TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(config.timeout_secs))
            .build();
        builder = builder
            .force_path_style(config.path_style)
            .timeout_config(timeouts);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());
        info!(bucket = %config.bucket, timeout_secs = config.timeout_secs, "Archive client initialized");

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|service| service.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    Ok(false)
                } else {
                    Err(IngestError::Archive(format!("head s3://{}/{}: {}", self.bucket, key, e)))
                }
            },
        }
    }
}

#[async_trait]
impl ArchiveStore for S3Archive {
    #[instrument(skip(self, bytes), fields(bucket = %self.bucket, size = bytes.len()))]
    async fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<bool> {
        if self.exists(key).await? {
            debug!("Object exists, skipping upload");
            return Ok(false);
        }

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/xml")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| IngestError::Archive(format!("put s3://{}/{}: {}", self.bucket, key, e)))?;

        info!("Uploaded to s3://{}/{}", self.bucket, key);
        Ok(true)
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_operation_timeout_from_config() {
        let config = S3Config {
            endpoint: Some("http://127.0.0.1:9000".to_string()),
            region: "us-east-1".to_string(),
            bucket: "swim-results".to_string(),
            access_key: "minio".to_string(),
            secret_key: "minio123".to_string(),
            path_style: true,
            timeout_secs: 7,
        };

        let archive = S3Archive::new(&config).await.unwrap();
        let timeouts = archive.client.config().timeout_config().unwrap();
        assert_eq!(timeouts.operation_timeout(), Some(Duration::from_secs(7)));
        assert_eq!(archive.describe(), "s3://swim-results");
    }
}
