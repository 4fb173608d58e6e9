//! In-memory storage backend
//!
//! Simulates a single-bucket S3-like provider, including the provider-side
//! multipart bookkeeping keyed by upload id. It is the reference backend for
//! the conformance suite and the backend tests wrap in a test double.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::multipart::{
    validate_part_number, MultipartUpload, DEFAULT_EXPIRE_AFTER_SECS, MAX_PART_SIZE,
};
use crate::traits::{Capabilities, StorageBackend};
use crate::types::*;

/// Storage class reported for every stored blob
const STORAGE_CLASS: &str = "STANDARD";

/// Page size when the caller does not set `max_keys`
const DEFAULT_MAX_KEYS: u32 = 1000;

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Vec<u8>,
    etag: String,
    last_modified: jiff::Timestamp,
    content_type: Option<String>,
    metadata: Metadata,
    dir_blob: bool,
}

impl StoredBlob {
    fn item(&self, key: &str) -> BlobItem {
        BlobItem {
            key: key.to_string(),
            etag: Some(self.etag.clone()),
            last_modified: Some(self.last_modified),
            size: self.data.len() as u64,
            storage_class: Some(STORAGE_CLASS.to_string()),
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    metadata: Metadata,
    content_type: Option<String>,
    initiated: jiff::Timestamp,
    parts: BTreeMap<u32, StoredPart>,
}

#[derive(Debug)]
struct StoredPart {
    data: Vec<u8>,
    etag: String,
}

#[derive(Debug, Default)]
struct State {
    exists: bool,
    blobs: BTreeMap<String, StoredBlob>,
    uploads: HashMap<String, PendingUpload>,
}

impl State {
    fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        if self.exists {
            Ok(())
        } else {
            Err(Error::NotFound(format!("bucket {bucket}")))
        }
    }

    fn blob(&self, key: &str) -> Result<&StoredBlob> {
        self.blobs
            .get(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    fn upload_mut(&mut self, upload_id: &str, key: &str) -> Result<&mut PendingUpload> {
        match self.uploads.get_mut(upload_id) {
            Some(upload) if upload.key == key => Ok(upload),
            _ => Err(Error::NoSuchUpload(upload_id.to_string())),
        }
    }
}

/// Single-bucket object store held in process memory
#[derive(Debug)]
pub struct MemoryBackend {
    bucket: String,
    capabilities: Capabilities,
    expire_after: Duration,
    state: RwLock<State>,
    requests: AtomicU64,
}

impl MemoryBackend {
    /// Create a backend with an existing, empty bucket
    pub fn new(bucket: impl Into<String>) -> Self {
        Self::with_bucket_state(bucket.into(), true)
    }

    /// Create a backend whose bucket does not exist yet
    pub fn without_bucket(bucket: impl Into<String>) -> Self {
        Self::with_bucket_state(bucket.into(), false)
    }

    fn with_bucket_state(bucket: String, exists: bool) -> Self {
        Self {
            bucket,
            capabilities: Capabilities::new("memory", MAX_PART_SIZE),
            expire_after: Duration::from_secs(DEFAULT_EXPIRE_AFTER_SECS),
            state: RwLock::new(State {
                exists,
                ..Default::default()
            }),
            requests: AtomicU64::new(0),
        }
    }

    /// Override the reported capabilities
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Default age threshold for expire sweeps
    pub fn with_expire_after(mut self, expire_after: Duration) -> Self {
        self.expire_after = expire_after;
        self
    }

    /// Bucket this backend serves
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Number of multipart uploads still in progress
    pub async fn pending_uploads(&self) -> usize {
        self.state.read().await.uploads.len()
    }

    fn request_id(&self) -> String {
        format!("mem-{}", self.requests.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

fn etag_of(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex::encode(&digest[..16])
}

/// S3-style multipart ETag: hash of the part ETags plus the part count
fn multipart_etag(part_etags: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for etag in part_etags {
        hasher.update(etag.as_bytes());
    }
    let digest = hasher.finalize();
    format!("{}-{}", hex::encode(&digest[..16]), part_etags.len())
}

fn head_output(key: &str, blob: &StoredBlob, request_id: String) -> HeadBlobOutput {
    HeadBlobOutput {
        item: blob.item(key),
        content_type: blob.content_type.clone(),
        is_dir_blob: blob.dir_blob,
        request_id,
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn init(&self, bucket: &str) -> Result<()> {
        if bucket != self.bucket {
            return Err(Error::NotFound(format!("bucket {bucket}")));
        }
        self.state.read().await.ensure_bucket(bucket)
    }

    async fn capabilities(&self) -> Result<Capabilities> {
        Ok(self.capabilities.clone())
    }

    async fn head_blob(&self, input: HeadBlobInput) -> Result<HeadBlobOutput> {
        let state = self.state.read().await;
        state.ensure_bucket(&self.bucket)?;
        let blob = state.blob(&input.key)?;
        Ok(head_output(&input.key, blob, self.request_id()))
    }

    async fn list_blobs(&self, input: ListBlobsInput) -> Result<ListBlobsOutput> {
        let state = self.state.read().await;
        state.ensure_bucket(&self.bucket)?;

        let prefix = input.prefix.as_deref().unwrap_or("");
        let max_keys = input.max_keys.unwrap_or(DEFAULT_MAX_KEYS).max(1) as usize;
        // The continuation token is the last key (or prefix) of the previous page
        let token = input.continuation_token.as_deref();
        let after = token.or(input.start_after.as_deref());

        let mut output = ListBlobsOutput {
            request_id: self.request_id(),
            ..Default::default()
        };
        let mut last_emitted: Option<String> = None;

        for (key, blob) in state.blobs.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            if after.is_some_and(|a| key.as_str() <= a) {
                continue;
            }

            let delimiter = input.delimiter.as_deref().filter(|d| !d.is_empty());
            let common_prefix = delimiter.and_then(|d| {
                let rest = &key[prefix.len()..];
                rest.find(d)
                    .map(|pos| key[..prefix.len() + pos + d.len()].to_string())
            });

            if let Some(p) = common_prefix {
                // start_after only skips keys, a prefix holding later keys is still listed
                if output.prefixes.last() == Some(&p) || token.is_some_and(|t| p.as_str() <= t) {
                    continue;
                }
                if output.prefixes.len() + output.items.len() == max_keys {
                    output.is_truncated = true;
                    break;
                }
                last_emitted = Some(p.clone());
                output.prefixes.push(p);
            } else {
                if output.prefixes.len() + output.items.len() == max_keys {
                    output.is_truncated = true;
                    break;
                }
                last_emitted = Some(key.clone());
                output.items.push(blob.item(key));
            }
        }

        if output.is_truncated {
            output.next_continuation_token = last_emitted.map(|k| {
                // A collapsed prefix must skip everything beneath it
                if output.prefixes.last() == Some(&k) {
                    format!("{k}\u{10FFFF}")
                } else {
                    k
                }
            });
        }

        Ok(output)
    }

    async fn delete_blob(&self, input: DeleteBlobInput) -> Result<DeleteBlobOutput> {
        let mut state = self.state.write().await;
        state.ensure_bucket(&self.bucket)?;
        state
            .blobs
            .remove(&input.key)
            .ok_or_else(|| Error::NotFound(input.key.clone()))?;
        debug!(key = %input.key, "deleted blob");
        Ok(DeleteBlobOutput {
            request_id: self.request_id(),
        })
    }

    async fn delete_blobs(&self, input: DeleteBlobsInput) -> Result<DeleteBlobsOutput> {
        let mut state = self.state.write().await;
        state.ensure_bucket(&self.bucket)?;

        let mut output = DeleteBlobsOutput {
            request_id: self.request_id(),
            ..Default::default()
        };
        for key in input.keys {
            if state.blobs.remove(&key).is_some() {
                output.deleted.push(key);
            } else {
                output.errors.push(DeleteBlobError {
                    message: format!("NoSuchKey: {key}"),
                    key,
                });
            }
        }
        Ok(output)
    }

    async fn rename_blob(&self, input: RenameBlobInput) -> Result<RenameBlobOutput> {
        let mut state = self.state.write().await;
        state.ensure_bucket(&self.bucket)?;
        let mut blob = state
            .blobs
            .remove(&input.source)
            .ok_or_else(|| Error::NotFound(input.source.clone()))?;
        blob.last_modified = jiff::Timestamp::now();
        state.blobs.insert(input.destination, blob);
        Ok(RenameBlobOutput {
            request_id: self.request_id(),
        })
    }

    async fn copy_blob(&self, input: CopyBlobInput) -> Result<CopyBlobOutput> {
        let mut state = self.state.write().await;
        state.ensure_bucket(&self.bucket)?;

        let source = state.blob(&input.source)?;
        if let Some(etag) = &input.etag {
            if *etag != source.etag {
                return Err(Error::PreconditionFailed(format!(
                    "{} has ETag {}, expected {etag}",
                    input.source, source.etag
                )));
            }
        }

        let mut copy = source.clone();
        copy.last_modified = jiff::Timestamp::now();
        if let Some(metadata) = input.metadata {
            copy.metadata = metadata;
        }
        state.blobs.insert(input.destination, copy);
        Ok(CopyBlobOutput {
            request_id: self.request_id(),
        })
    }

    async fn get_blob(&self, input: GetBlobInput) -> Result<GetBlobOutput> {
        let state = self.state.read().await;
        state.ensure_bucket(&self.bucket)?;
        let blob = state.blob(&input.key)?;

        if let Some(expected) = &input.if_match {
            if *expected != blob.etag {
                return Err(Error::PreconditionFailed(format!(
                    "{} has ETag {}, expected {expected}",
                    input.key, blob.etag
                )));
            }
        }

        let len = blob.data.len() as u64;
        let ranged = input.start > 0 || input.count > 0;
        if ranged && input.start >= len {
            return Err(Error::InvalidArgument(format!(
                "range start {} beyond size {len} of {}",
                input.start, input.key
            )));
        }
        let end = if input.count == 0 {
            len
        } else {
            input.start.saturating_add(input.count).min(len)
        };
        let body = blob.data[input.start as usize..end as usize].to_vec();

        let request_id = self.request_id();
        Ok(GetBlobOutput {
            head: head_output(&input.key, blob, request_id.clone()),
            body,
            request_id,
        })
    }

    async fn put_blob(&self, input: PutBlobInput) -> Result<PutBlobOutput> {
        if input.dir_blob && !input.body.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "directory blob {} must be empty",
                input.key
            )));
        }

        let mut state = self.state.write().await;
        state.ensure_bucket(&self.bucket)?;

        let blob = StoredBlob {
            etag: etag_of(&input.body),
            data: input.body,
            last_modified: jiff::Timestamp::now(),
            content_type: input.content_type,
            metadata: input.metadata,
            dir_blob: input.dir_blob,
        };
        let output = PutBlobOutput {
            etag: Some(blob.etag.clone()),
            last_modified: Some(blob.last_modified),
            storage_class: Some(STORAGE_CLASS.to_string()),
            request_id: self.request_id(),
        };
        state.blobs.insert(input.key, blob);
        Ok(output)
    }

    async fn multipart_blob_begin(
        &self,
        input: MultipartBlobBeginInput,
    ) -> Result<MultipartUpload> {
        let mut state = self.state.write().await;
        state.ensure_bucket(&self.bucket)?;

        let upload_id = uuid::Uuid::new_v4().simple().to_string();
        let handle = MultipartUpload::new(&upload_id, &input.key)
            .with_metadata(input.metadata.clone())
            .with_content_type(input.content_type.clone());

        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: input.key,
                metadata: input.metadata,
                content_type: input.content_type,
                initiated: handle.initiated,
                parts: BTreeMap::new(),
            },
        );
        debug!(upload_id = %upload_id, key = %handle.key, "began multipart upload");
        Ok(handle)
    }

    async fn multipart_blob_add(
        &self,
        input: MultipartBlobAddInput,
    ) -> Result<MultipartBlobAddOutput> {
        validate_part_number(input.part_number)?;

        let mut state = self.state.write().await;
        let upload = state.upload_mut(&input.upload_id, &input.key)?;
        let etag = etag_of(&input.body);
        upload.parts.insert(
            input.part_number,
            StoredPart {
                data: input.body,
                etag: etag.clone(),
            },
        );
        Ok(MultipartBlobAddOutput {
            part_id: etag,
            request_id: self.request_id(),
        })
    }

    async fn multipart_blob_copy(
        &self,
        input: MultipartBlobCopyInput,
    ) -> Result<MultipartBlobCopyOutput> {
        validate_part_number(input.part_number)?;

        let mut state = self.state.write().await;
        let source = state.blob(&input.copy_source)?;
        let len = source.data.len() as u64;
        let end = input.offset.saturating_add(input.size);
        if end > len {
            return Err(Error::InvalidArgument(format!(
                "copy range {}..{end} beyond size {len} of {}",
                input.offset, input.copy_source
            )));
        }
        let data = source.data[input.offset as usize..end as usize].to_vec();

        let upload = state.upload_mut(&input.upload_id, &input.key)?;
        let etag = etag_of(&data);
        upload.parts.insert(
            input.part_number,
            StoredPart {
                data,
                etag: etag.clone(),
            },
        );
        Ok(MultipartBlobCopyOutput {
            part_id: etag,
            request_id: self.request_id(),
        })
    }

    async fn multipart_blob_abort(
        &self,
        upload: &MultipartUpload,
    ) -> Result<MultipartBlobAbortOutput> {
        let mut state = self.state.write().await;
        state.upload_mut(&upload.upload_id, &upload.key)?;
        state.uploads.remove(&upload.upload_id);
        debug!(upload_id = %upload.upload_id, "aborted multipart upload");
        Ok(MultipartBlobAbortOutput {
            request_id: self.request_id(),
        })
    }

    async fn multipart_blob_commit(
        &self,
        upload: &MultipartUpload,
    ) -> Result<MultipartBlobCommitOutput> {
        let mut state = self.state.write().await;
        let pending = state.upload_mut(&upload.upload_id, &upload.key)?;
        let parts = upload.completed_parts()?;

        let mut data = Vec::new();
        let mut part_etags = Vec::with_capacity(parts.len());
        for (number, part_id) in &parts {
            match pending.parts.get(number) {
                Some(stored) if stored.etag == *part_id => {
                    data.extend_from_slice(&stored.data);
                    part_etags.push(stored.etag.as_str());
                }
                _ => {
                    return Err(Error::MissingParts(format!(
                        "upload {} has no part {number} with id {part_id}",
                        upload.upload_id
                    )));
                }
            }
        }

        if data.len() as u64 > self.capabilities.max_multipart_size {
            return Err(Error::InvalidArgument(format!(
                "assembled size {} exceeds {}",
                data.len(),
                self.capabilities.max_multipart_size
            )));
        }

        let blob = StoredBlob {
            etag: multipart_etag(&part_etags),
            data,
            last_modified: jiff::Timestamp::now(),
            content_type: pending.content_type.clone(),
            metadata: pending.metadata.clone(),
            dir_blob: false,
        };
        let output = MultipartBlobCommitOutput {
            etag: Some(blob.etag.clone()),
            last_modified: Some(blob.last_modified),
            request_id: self.request_id(),
        };

        let key = pending.key.clone();
        state.uploads.remove(&upload.upload_id);
        state.blobs.insert(key, blob);
        debug!(upload_id = %upload.upload_id, parts = parts.len(), "committed multipart upload");
        Ok(output)
    }

    async fn multipart_expire(&self, input: MultipartExpireInput) -> Result<MultipartExpireOutput> {
        let threshold = input.older_than.unwrap_or(self.expire_after);
        let threshold = jiff::SignedDuration::try_from(threshold)
            .map_err(|e| Error::InvalidArgument(format!("expire threshold: {e}")))?;
        let now = jiff::Timestamp::now();

        let mut state = self.state.write().await;
        state.ensure_bucket(&self.bucket)?;

        let prefix = input.prefix.as_deref().unwrap_or("");
        let mut expired: Vec<String> = state
            .uploads
            .iter()
            .filter(|(_, u)| {
                u.key.starts_with(prefix) && now.duration_since(u.initiated) >= threshold
            })
            .map(|(id, _)| id.clone())
            .collect();
        expired.sort();

        for id in &expired {
            state.uploads.remove(id);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), bucket = %self.bucket, "expired multipart uploads");
        }

        Ok(MultipartExpireOutput {
            expired,
            request_id: self.request_id(),
        })
    }

    async fn make_bucket(&self, _input: MakeBucketInput) -> Result<MakeBucketOutput> {
        let mut state = self.state.write().await;
        if state.exists {
            return Err(Error::Conflict(format!(
                "BucketAlreadyOwnedByYou: {}",
                self.bucket
            )));
        }
        state.exists = true;
        Ok(MakeBucketOutput {
            request_id: self.request_id(),
        })
    }

    async fn remove_bucket(&self, _input: RemoveBucketInput) -> Result<RemoveBucketOutput> {
        let mut state = self.state.write().await;
        state.ensure_bucket(&self.bucket)?;
        if !state.blobs.is_empty() {
            return Err(Error::Conflict(format!("BucketNotEmpty: {}", self.bucket)));
        }
        state.exists = false;
        state.uploads.clear();
        Ok(RemoveBucketOutput {
            request_id: self.request_id(),
        })
    }
}
