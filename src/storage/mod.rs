// src/storage/mod.rs
//
// Pluggable client abstraction over S3-compatible object stores.
// The migration engine only ever talks to this trait; the aws-sdk-s3
// implementation lives in storage/s3.rs and tests substitute in-memory fakes.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

pub mod s3;

pub use aws_sdk_s3::primitives::ByteStream;
pub use s3::S3Client;

/// Object metadata as returned by HEAD and LIST operations.
/// LIST responses leave `content_type` and `metadata` empty; S3 does not
/// return them there.
#[derive(Debug, Clone, Default)]
pub struct ObjectInfo {
    pub key: String,
    pub size: i64,
    pub etag: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

/// Options applied to single-shot and multipart uploads.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

/// One finished part of a multipart upload, in completion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// A source object opened for reading: its metadata plus the body stream.
/// Dropping the stream releases the underlying connection on every exit path.
pub struct SourceObject {
    pub info: ObjectInfo,
    pub body: ByteStream,
}

/// Uniform S3 object operations consumed by the migration engine.
///
/// Listing is a lazy stream; enumeration errors arrive in-band as `Err`
/// items and terminate the stream.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Open an object for streaming read.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<SourceObject>;

    /// Upload exactly `size` bytes from `body` as a single object.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        size: i64,
        opts: &PutOptions,
    ) -> Result<()>;

    /// Fetch object metadata; fails when the object does not exist.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo>;

    /// Recursively enumerate objects under `prefix`. The stream is finite
    /// and not restartable.
    fn list_objects(&self, bucket: &str, prefix: &str) -> BoxStream<'static, Result<ObjectInfo>>;

    /// Initiate a multipart upload and return its upload id.
    async fn new_multipart(&self, bucket: &str, key: &str, opts: &PutOptions) -> Result<String>;

    /// Upload one part; returns the part's ETag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String>;

    /// Complete a multipart upload from parts sorted by ascending part number.
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()>;

    /// Abort a multipart upload, discarding any parts written so far.
    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;
}

/// Normalize a configured endpoint into a full URL for the SDK.
///
/// Accepts `host[:port]` or `http[s]://host[:port]`; anything with a path is
/// rejected. The `secure` flag alone decides the final scheme, regardless of
/// any scheme embedded in the input.
pub fn normalize_endpoint(endpoint: &str, secure: bool) -> Result<String> {
    if endpoint.is_empty() {
        bail!("endpoint cannot be empty");
    }

    let host = match endpoint
        .strip_prefix("http://")
        .or_else(|| endpoint.strip_prefix("https://"))
    {
        Some(rest) => rest.strip_suffix('/').unwrap_or(rest),
        None => endpoint,
    };

    if host.is_empty() {
        bail!("endpoint {endpoint:?} has no host");
    }
    if host.contains('/') {
        bail!("endpoint {endpoint:?} must not contain a path, only host[:port] is allowed");
    }

    let scheme = if secure { "https" } else { "http" };
    Ok(format!("{scheme}://{host}"))
}

/// S3 returns ETags wrapped in double quotes; strip them for comparisons.
pub(crate) fn trim_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}
