// tests/common/mod.rs
//
// In-memory fakes shared by the processor and pipeline integration tests:
// a scriptable storage client and a checkpoint store backed by a HashMap.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use s3migrate::checkpoint::CLOSED_SENTINEL;
use s3migrate::{
    ByteStream, CheckpointStore, CompletedPart, ObjectInfo, PutOptions, SourceObject,
    StorageClient, TaskRecord,
};

/// Deterministic pseudo-etag derived from content, so an object uploaded by
/// the fake ends up with the same etag a seeded copy of the same bytes gets.
pub fn content_etag(data: &[u8]) -> String {
    // FNV-1a, good enough for equality checks in tests
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:016x}")
}

#[derive(Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub info: ObjectInfo,
}

struct PendingUpload {
    bucket: String,
    key: String,
    opts: PutOptions,
    parts: BTreeMap<i32, (Bytes, String)>,
}

#[derive(Default)]
struct FakeState {
    objects: HashMap<(String, String), StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    next_upload_id: u64,
    get_failures: VecDeque<String>,
    put_failure: Option<String>,
    part_failure: Option<(i32, String)>,
    cancel_after_part: Option<(i32, CancellationToken)>,
    list_failure: Option<(usize, String)>,
}

/// Scriptable in-memory stand-in for an S3-compatible store.
#[derive(Default)]
pub struct FakeStorageClient {
    state: Mutex<FakeState>,
    pub get_calls: AtomicUsize,
    pub put_calls: AtomicUsize,
    pub head_calls: AtomicUsize,
    pub multipart_creates: AtomicUsize,
    pub part_uploads: AtomicUsize,
    pub completes: AtomicUsize,
    pub aborts: AtomicUsize,
}

impl FakeStorageClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>, etag: &str) {
        let data = data.into();
        let info = ObjectInfo {
            key: key.to_string(),
            size: data.len() as i64,
            etag: etag.to_string(),
            last_modified: None,
            content_type: "application/octet-stream".to_string(),
            metadata: HashMap::new(),
        };
        self.state
            .lock()
            .unwrap()
            .objects
            .insert((bucket.to_string(), key.to_string()), StoredObject { data, info });
    }

    /// Seed an object whose etag is derived from its content, matching what
    /// the fake's own uploads produce.
    pub fn insert_object_hashed(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let etag = content_etag(&data);
        self.insert_object(bucket, key, data, &etag);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    /// Queue error messages; each subsequent `get_object` pops one until the
    /// queue is empty.
    pub fn fail_next_gets(&self, messages: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state
            .get_failures
            .extend(messages.iter().map(|m| m.to_string()));
    }

    /// Make every `put_object` fail with `message`.
    pub fn fail_puts(&self, message: &str) {
        self.state.lock().unwrap().put_failure = Some(message.to_string());
    }

    pub fn clear_put_failure(&self) {
        self.state.lock().unwrap().put_failure = None;
    }

    /// Make the upload of part `part_number` fail with `message`.
    pub fn fail_part(&self, part_number: i32, message: &str) {
        self.state.lock().unwrap().part_failure = Some((part_number, message.to_string()));
    }

    /// Cancel `token` right after part `part_number` uploads successfully.
    pub fn cancel_after_part(&self, part_number: i32, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after_part = Some((part_number, token));
    }

    pub fn clear_cancel_trigger(&self) {
        self.state.lock().unwrap().cancel_after_part = None;
    }

    /// Make listing fail after yielding `after` objects.
    pub fn fail_list_after(&self, after: usize, message: &str) {
        self.state.lock().unwrap().list_failure = Some((after, message.to_string()));
    }

    pub fn pending_upload_count(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }
}

#[async_trait]
impl StorageClient for FakeStorageClient {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<SourceObject> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.get_failures.pop_front() {
            return Err(anyhow!(message));
        }
        let stored = state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| anyhow!("NoSuchKey: {bucket}/{key}"))?;
        Ok(SourceObject {
            info: stored.info.clone(),
            body: ByteStream::from(stored.data.to_vec()),
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
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.state.lock().unwrap().put_failure.clone() {
            return Err(anyhow!(message));
        }
        let data = body
            .collect()
            .await
            .map_err(|e| anyhow!("body read failed: {e}"))?
            .into_bytes();
        if data.len() as i64 != size {
            bail!("put of {bucket}/{key} declared {size} bytes but sent {}", data.len());
        }
        let etag = content_etag(&data);
        let info = ObjectInfo {
            key: key.to_string(),
            size,
            etag: etag.clone(),
            last_modified: None,
            content_type: opts.content_type.clone(),
            metadata: opts.metadata.clone(),
        };
        self.state
            .lock()
            .unwrap()
            .objects
            .insert((bucket.to_string(), key.to_string()), StoredObject { data, info });
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|stored| stored.info.clone())
            .ok_or_else(|| anyhow!("NoSuchKey: {bucket}/{key}"))
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> BoxStream<'static, Result<ObjectInfo>> {
        let state = self.state.lock().unwrap();
        let mut infos: Vec<ObjectInfo> = state
            .objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|(_, stored)| stored.info.clone())
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));

        let items: Vec<Result<ObjectInfo>> = match &state.list_failure {
            Some((after, message)) => infos
                .into_iter()
                .take(*after)
                .map(Ok)
                .chain(std::iter::once(Err(anyhow!(message.clone()))))
                .collect(),
            None => infos.into_iter().map(Ok).collect(),
        };
        Box::pin(futures::stream::iter(items))
    }

    async fn new_multipart(&self, bucket: &str, key: &str, opts: &PutOptions) -> Result<String> {
        self.multipart_creates.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.next_upload_id += 1;
        let upload_id = format!("upload-{}", state.next_upload_id);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                opts: opts.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String> {
        self.part_uploads.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if let Some((fail_at, message)) = &state.part_failure {
            if *fail_at == part_number {
                return Err(anyhow!(message.clone()));
            }
        }
        let etag = content_etag(&body);
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| anyhow!("NoSuchUpload: {upload_id}"))?;
        upload.parts.insert(part_number, (body, etag.clone()));
        if let Some((after, token)) = &state.cancel_after_part {
            if *after == part_number {
                token.cancel();
            }
        }
        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        self.completes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| anyhow!("NoSuchUpload: {upload_id}"))?;

        // the completion list must arrive sorted by ascending part number
        for window in parts.windows(2) {
            if window[0].part_number >= window[1].part_number {
                bail!("completion list not sorted by part number");
            }
        }

        let mut data = Vec::new();
        for part in &parts {
            let (bytes, etag) = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| anyhow!("InvalidPart: part {} never uploaded", part.part_number))?;
            if etag != &part.etag {
                bail!("InvalidPart: etag mismatch for part {}", part.part_number);
            }
            data.extend_from_slice(bytes);
        }

        let data = Bytes::from(data);
        let etag = content_etag(&data);
        let info = ObjectInfo {
            key: key.to_string(),
            size: data.len() as i64,
            etag,
            last_modified: None,
            content_type: upload.opts.content_type.clone(),
            metadata: upload.opts.metadata.clone(),
        };
        state
            .objects
            .insert((bucket.to_string(), key.to_string()), StoredObject { data, info });
        Ok(())
    }

    async fn abort_multipart(&self, _bucket: &str, _key: &str, upload_id: &str) -> Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().uploads.remove(upload_id);
        Ok(())
    }
}

/// HashMap-backed checkpoint store honoring the same contract as the SQLite
/// implementation, including the closed sentinel.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    rows: Mutex<HashMap<(String, String), TaskRecord>>,
    closed: AtomicBool,
    pub saves: AtomicUsize,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: TaskRecord) {
        self.rows
            .lock()
            .unwrap()
            .insert((record.bucket.clone(), record.key.clone()), record);
    }

    pub fn row(&self, bucket: &str, key: &str) -> Option<TaskRecord> {
        self.rows
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            bail!("checkpoint {CLOSED_SENTINEL}");
        }
        Ok(())
    }

    fn list_by(&self, status: s3migrate::TaskStatus) -> Vec<TaskRecord> {
        let rows = self.rows.lock().unwrap();
        let mut records: Vec<TaskRecord> = rows
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.updated_at);
        records
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get_task(&self, bucket: &str, key: &str) -> Result<Option<TaskRecord>> {
        self.ensure_open()?;
        Ok(self.row(bucket, key))
    }

    async fn save_task(&self, mut record: TaskRecord) -> Result<()> {
        self.ensure_open()?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        record.updated_at = Utc::now();
        self.insert(record);
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<TaskRecord>> {
        self.ensure_open()?;
        Ok(self.list_by(s3migrate::TaskStatus::Pending))
    }

    async fn list_failed(&self) -> Result<Vec<TaskRecord>> {
        self.ensure_open()?;
        Ok(self.list_by(s3migrate::TaskStatus::Failed))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
