//! Object storage capability consumed by the handler, and its S3 backing.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Tag, Tagging};
use bytes::Bytes;

/// A new object to write, with its annotations.
#[derive(Debug, Clone)]
pub struct PutObject {
    pub key: String,
    pub body: Bytes,
    pub content_type: String,
    /// URL-encoded `key=value&...` tag set.
    pub tagging: String,
    pub metadata: HashMap<String, String>,
}

/// The storage operations an ingest needs. Implementations are bound to one
/// bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, key: &str) -> Result<Bytes>;

    /// Replace the tag set of an existing object.
    async fn put_object_tags(&self, key: &str, tags: &[(String, String)]) -> Result<()>;

    /// Create or overwrite an object.
    async fn put_object(&self, object: PutObject) -> Result<()>;
}

pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get_object(&self, key: &str) -> Result<Bytes> {
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("download s3://{}/{}", self.bucket, key))?;
        let data = obj
            .body
            .collect()
            .await
            .with_context(|| format!("read body of s3://{}/{}", self.bucket, key))?;
        Ok(data.into_bytes())
    }

    async fn put_object_tags(&self, key: &str, tags: &[(String, String)]) -> Result<()> {
        let tag_set = tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("build tag set")?;
        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .context("build tagging")?;
        self.client
            .put_object_tagging()
            .bucket(&self.bucket)
            .key(key)
            .tagging(tagging)
            .send()
            .await
            .with_context(|| format!("tag s3://{}/{}", self.bucket, key))?;
        Ok(())
    }

    async fn put_object(&self, object: PutObject) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object.key)
            .body(ByteStream::from(object.body))
            .content_type(object.content_type)
            .tagging(object.tagging)
            .set_metadata(Some(object.metadata))
            .send()
            .await
            .with_context(|| format!("upload s3://{}/{}", self.bucket, object.key))?;
        Ok(())
    }
}
