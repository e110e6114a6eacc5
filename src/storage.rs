use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;

use crate::config::StorageConfig;

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Stores `body` under `key`, replacing any previous object, and returns
    /// the public URL it is served from.
    async fn upload(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<String>;
}

#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
    public_url: String,
}

impl Storage {
    pub async fn new(cfg: &StorageConfig) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.minio_region.clone()))
            .credentials_provider(Credentials::new(
                &cfg.minio_access_key,
                &cfg.minio_secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.minio_endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.minio_endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: cfg.minio_bucket.clone(),
            public_url: cfg.minio_public_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ImageStore for Storage {
    async fn upload(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("s3 put_object {}", key))?;
        Ok(format!("{}/{}/{}", self.public_url, self.bucket, key))
    }
}

pub fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_ext_from_mime() {
        assert_eq!(super::ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(super::ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(super::ext_from_mime("image/png"), Some("png"));
        assert_eq!(super::ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(super::ext_from_mime("application/octet-stream"), None);
        assert_eq!(super::ext_from_mime("whatever/else"), None);
    }
}
