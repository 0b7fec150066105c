use std::time::Duration;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;

use iproxy_config::S3Config;

const S3_TIMEOUT: Duration = Duration::from_secs(20);

/// Thin wrapper over the S3 client configured for a custom endpoint with
/// path-style addressing (MinIO-compatible).
pub(crate) struct S3Mirror {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Mirror {
    pub(crate) fn from_config(config: &S3Config) -> Option<Self> {
        if !config.is_valid() {
            return None;
        }
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "runtime-config",
        );
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());
        let sdk_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .endpoint_url(config.endpoint.clone())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        Some(Self {
            client: aws_sdk_s3::Client::from_conf(sdk_config),
            bucket: config.bucket.clone(),
        })
    }

    pub(crate) async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), String> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send();
        match tokio::time::timeout(S3_TIMEOUT, request).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err("s3 put timed out".to_string()),
        }
    }

    pub(crate) async fn delete(&self, key: &str) -> Result<(), String> {
        let request = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send();
        match tokio::time::timeout(S3_TIMEOUT, request).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err("s3 delete timed out".to_string()),
        }
    }
}
