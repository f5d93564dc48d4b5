// src/storage/s3.rs
//
// StorageClient implementation over the AWS Rust SDK. One instance per
// endpoint (source and destination each get their own), with static
// credentials and path-style addressing for MinIO/RustFS compatibility.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as AwsCompletedPart};
use aws_sdk_s3::Client;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types_convert::date_time::DateTimeExt;
use bytes::Bytes;
use futures::stream::BoxStream;
use tracing::debug;

use crate::config::S3Config;
use crate::constants::DEFAULT_REGION;
use crate::storage::{
    normalize_endpoint, trim_etag, CompletedPart, ObjectInfo, PutOptions, SourceObject,
    StorageClient,
};

/// How many listed entries may buffer between the paginator task and the
/// consuming stream before backpressure kicks in.
const LIST_CHANNEL_DEPTH: usize = 256;

pub struct S3Client {
    client: Client,
}

impl S3Client {
    /// Build a client for one endpoint. Region resolution follows the
    /// environment first and falls back to a fixed default, since
    /// S3-compatible services only need a region for v4 signing.
    pub async fn connect(cfg: &S3Config) -> Result<Self> {
        let endpoint = normalize_endpoint(&cfg.endpoint, cfg.secure)?;
        debug!(endpoint = %endpoint, "building S3 client");

        let credentials = Credentials::new(
            cfg.access_key.clone(),
            cfg.secret_key.clone(),
            None,
            None,
            "s3migrate-config",
        );
        let region = RegionProviderChain::first_try(
            std::env::var("AWS_REGION").ok().map(Region::new),
        )
        .or_else(Region::new(DEFAULT_REGION));

        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region)
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .load()
            .await;

        // Path-style addressing: virtual-hosted style (bucket.endpoint) does
        // not resolve against custom endpoints.
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
        })
    }
}

/// Render an SDK error with its full context (HTTP status, service code,
/// message) so retry classification can see the interesting parts.
fn sdk_err<E, R>(err: SdkError<E, R>) -> anyhow::Error
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    anyhow!("{}", DisplayErrorContext(&err))
}

fn metadata_map(meta: Option<&HashMap<String, String>>) -> HashMap<String, String> {
    meta.cloned().unwrap_or_default()
}

#[async_trait]
impl StorageClient for S3Client {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<SourceObject> {
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_err)
            .with_context(|| format!("get object {bucket}/{key}"))?;

        let info = ObjectInfo {
            key: key.to_string(),
            size: out.content_length().unwrap_or(0),
            etag: trim_etag(out.e_tag().unwrap_or_default()),
            last_modified: out.last_modified().and_then(|t| t.to_chrono_utc().ok()),
            content_type: out.content_type().unwrap_or_default().to_string(),
            metadata: metadata_map(out.metadata()),
        };
        Ok(SourceObject {
            info,
            body: out.body,
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        size: i64,
        opts: &PutOptions,
    ) -> Result<()> {
        let mut req = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(size)
            .body(body);
        if !opts.content_type.is_empty() {
            req = req.content_type(&opts.content_type);
        }
        if !opts.metadata.is_empty() {
            req = req.set_metadata(Some(opts.metadata.clone()));
        }
        req.send()
            .await
            .map_err(sdk_err)
            .with_context(|| format!("put object {bucket}/{key}"))?;
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        let out = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_err)
            .with_context(|| format!("head object {bucket}/{key}"))?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: out.content_length().unwrap_or(0),
            etag: trim_etag(out.e_tag().unwrap_or_default()),
            last_modified: out.last_modified().and_then(|t| t.to_chrono_utc().ok()),
            content_type: out.content_type().unwrap_or_default().to_string(),
            metadata: metadata_map(out.metadata()),
        })
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> BoxStream<'static, Result<ObjectInfo>> {
        let (tx, rx) = async_channel::bounded::<Result<ObjectInfo>>(LIST_CHANNEL_DEPTH);
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();

        // The paginator runs in its own task and feeds a bounded channel, so
        // a slow consumer backpressures the listing instead of buffering the
        // whole bucket.
        tokio::spawn(async move {
            let mut continuation: Option<String> = None;
            loop {
                let mut req = client.list_objects_v2().bucket(&bucket).prefix(&prefix);
                if let Some(token) = &continuation {
                    req = req.continuation_token(token);
                }
                let page = match req.send().await {
                    Ok(page) => page,
                    Err(e) => {
                        let err = sdk_err(e).context(format!("list objects {bucket}/{prefix}"));
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };
                for obj in page.contents() {
                    let info = ObjectInfo {
                        key: obj.key().unwrap_or_default().to_string(),
                        size: obj.size().unwrap_or(0),
                        etag: trim_etag(obj.e_tag().unwrap_or_default()),
                        last_modified: obj.last_modified().and_then(|t| t.to_chrono_utc().ok()),
                        content_type: String::new(),
                        metadata: HashMap::new(),
                    };
                    if tx.send(Ok(info)).await.is_err() {
                        // consumer went away, stop paginating
                        return;
                    }
                }
                continuation = page.next_continuation_token().map(str::to_string);
                if continuation.is_none() {
                    return;
                }
            }
        });

        Box::pin(rx)
    }

    async fn new_multipart(&self, bucket: &str, key: &str, opts: &PutOptions) -> Result<String> {
        let mut req = self.client.create_multipart_upload().bucket(bucket).key(key);
        if !opts.content_type.is_empty() {
            req = req.content_type(&opts.content_type);
        }
        if !opts.metadata.is_empty() {
            req = req.set_metadata(Some(opts.metadata.clone()));
        }
        let out = req
            .send()
            .await
            .map_err(sdk_err)
            .with_context(|| format!("create multipart upload {bucket}/{key}"))?;
        out.upload_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("create multipart upload {bucket}/{key} returned no upload id"))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String> {
        let out = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(sdk_err)
            .with_context(|| format!("upload part {part_number} of {bucket}/{key}"))?;
        Ok(trim_etag(out.e_tag().unwrap_or_default()))
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        let completed = parts
            .into_iter()
            .map(|p| {
                AwsCompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(p.etag)
                    .build()
            })
            .collect::<Vec<_>>();
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
            .map_err(sdk_err)
            .with_context(|| format!("complete multipart upload {bucket}/{key}"))?;
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
            .map_err(sdk_err)
            .with_context(|| format!("abort multipart upload {bucket}/{key}"))?;
        Ok(())
    }
}
