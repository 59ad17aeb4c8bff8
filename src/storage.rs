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

use crate::config::MediaConfig;

/// Remote media host holding avatars and cover images.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()>;
    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;
    fn public_url(&self, key: &str) -> String;

    /// Inverse of `public_url`; `None` for URLs this host did not produce.
    fn key_for_url(&self, url: &str) -> Option<String>;
}

pub(crate) fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}

pub(crate) fn strip_base(base: &str, url: &str) -> Option<String> {
    let prefix = format!("{}/", base.trim_end_matches('/'));
    url.strip_prefix(&prefix)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    public_base: String,
}

impl S3Storage {
    pub async fn new(cfg: &MediaConfig) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
            public_base: cfg.public_url.clone(),
        })
    }
}

#[async_trait]
impl StorageClient for S3Storage {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .context("s3 put_object")?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("s3 delete_object")?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_base, key)
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        strip_base(&self.public_base, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_and_key_are_inverse() {
        let base = "https://media.example.com/playtube/";
        let url = join_url(base, "users/1/avatar-2.png");
        assert_eq!(url, "https://media.example.com/playtube/users/1/avatar-2.png");
        assert_eq!(strip_base(base, &url).as_deref(), Some("users/1/avatar-2.png"));
    }

    #[test]
    fn foreign_urls_have_no_key() {
        let base = "https://media.example.com/playtube";
        assert_eq!(strip_base(base, "https://elsewhere.net/a.png"), None);
        assert_eq!(strip_base(base, "https://media.example.com/playtube/"), None);
    }
}
