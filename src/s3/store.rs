// src/s3/store.rs

use anyhow::{anyhow, Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::{ByteStream, Length},
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use std::path::Path;
use tracing::debug;

use crate::config::AwsConfig;

/// A byte range of a local file that becomes one multipart part.
#[derive(Debug, Clone, Copy)]
pub struct PartSource<'a> {
    pub path: &'a Path,
    pub offset: u64,
    pub len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: i32,
    pub e_tag: String,
}

/// The object-store calls an upload is made of.
#[allow(async_fn_in_trait)]
pub trait ObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, path: &Path) -> Result<()>;

    /// Returns the upload id.
    async fn create_multipart(&self, bucket: &str, key: &str) -> Result<String>;

    /// Returns the part's ETag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        part: PartSource<'_>,
    ) -> Result<String>;

    /// `parts` are sorted by part number.
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()>;

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;
}

/// `ObjectStore` backed by the AWS SDK.
#[derive(Clone, Debug)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Build a client with static credentials from `cfg`.
    pub async fn connect(cfg: &AwsConfig) -> Self {
        let creds = Credentials::new(
            cfg.key_id.clone(),
            cfg.secret_key.clone(),
            None,
            None,
            "std-traffic",
        );
        let sdk = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(creds)
            .load()
            .await;
        debug!(region = %cfg.region, "S3 client ready");
        Self {
            client: Client::new(&sdk),
        }
    }
}

impl ObjectStore for S3Store {
    async fn put_object(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .with_context(|| format!("PutObject s3://{}/{}", bucket, key))?;
        Ok(())
    }

    async fn create_multipart(&self, bucket: &str, key: &str) -> Result<String> {
        let out = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("CreateMultipartUpload s3://{}/{}", bucket, key))?;
        out.upload_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("CreateMultipartUpload returned no upload id"))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        part: PartSource<'_>,
    ) -> Result<String> {
        let body = ByteStream::read_from()
            .path(part.path)
            .offset(part.offset)
            .length(Length::Exact(part.len))
            .build()
            .await
            .with_context(|| format!("reading part {} of {}", part_number, part.path.display()))?;
        let out = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(body)
            .send()
            .await
            .with_context(|| format!("UploadPart {} of s3://{}/{}", part_number, bucket, key))?;
        out.e_tag()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("UploadPart {} returned no ETag", part_number))
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<()> {
        let completed: Vec<CompletedPart> = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(p.e_tag.clone())
                    .build()
            })
            .collect();
        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .with_context(|| format!("CompleteMultipartUpload s3://{}/{}", bucket, key))?;
        Ok(())
    }

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .with_context(|| format!("AbortMultipartUpload s3://{}/{}", bucket, key))?;
        Ok(())
    }
}
