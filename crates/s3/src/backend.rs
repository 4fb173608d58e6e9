//! S3 backend implementation
//!
//! Wraps aws-sdk-s3 and implements the StorageBackend trait from
//! blobkit-core. One backend is bound to one bucket.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::RequestId;
use aws_sdk_s3::primitives::ByteStream;
use aws_smithy_types::DateTime;
use futures::stream::{self, StreamExt};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use blobkit_core::multipart::{validate_part_number, DEFAULT_EXPIRE_AFTER_SECS};
use blobkit_core::types::*;
use blobkit_core::{
    BackendConfig, Capabilities, Error, MultipartUpload, Result, StorageBackend,
};

use crate::capability::resolve_capabilities;

/// Keys per DeleteObjects request (S3 limit)
const DELETE_BATCH: usize = 1000;

/// Concurrent aborts during an expire sweep
const EXPIRE_CONCURRENCY: usize = 8;

/// S3 storage backend
pub struct S3Backend {
    inner: aws_sdk_s3::Client,
    bucket: String,
    region: Option<String>,
    endpoint: Option<url::Url>,
    capabilities: OnceCell<Capabilities>,
    expire_after: Duration,
}

impl S3Backend {
    /// Create a backend from the `[backend]` configuration section
    ///
    /// Credentials come from the SDK's default provider chain.
    pub async fn new(config: &BackendConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint_url()?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.path_style)
            .build();

        Ok(Self {
            inner: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint,
            capabilities: OnceCell::new(),
            expire_after: Duration::from_secs(DEFAULT_EXPIRE_AFTER_SECS),
        })
    }

    /// Default age threshold for `multipart_expire`
    pub fn with_expire_after(mut self, expire_after: Duration) -> Self {
        self.expire_after = expire_after;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }

    async fn abort(&self, key: &str, upload_id: &str) -> Result<MultipartBlobAbortOutput> {
        let response = self
            .inner
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, upload_id))?;

        Ok(MultipartBlobAbortOutput {
            request_id: request_id(&response),
        })
    }

    /// One DeleteObjects request for at most [`DELETE_BATCH`] keys
    async fn delete_batch(&self, keys: Vec<String>) -> Result<DeleteBlobsOutput> {
        use aws_sdk_s3::types::{Delete, ObjectIdentifier};

        let objects = keys
            .iter()
            .map(|k| ObjectIdentifier::builder().key(k).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::General(e.to_string()))?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .build()
            .map_err(|e| Error::General(e.to_string()))?;

        let response = self
            .inner
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &self.bucket))?;

        Ok(DeleteBlobsOutput {
            deleted: response
                .deleted()
                .iter()
                .filter_map(|d| d.key().map(str::to_string))
                .collect(),
            errors: response
                .errors()
                .iter()
                .map(|e| DeleteBlobError {
                    key: e.key().unwrap_or_default().to_string(),
                    message: format!(
                        "{}: {}",
                        e.code().unwrap_or("Unknown"),
                        e.message().unwrap_or_default()
                    ),
                })
                .collect(),
            request_id: request_id(&response),
        })
    }
}

/// Map an SDK failure onto the blobkit error kinds
fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, subject: &str) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    if matches!(err, SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)) {
        return Error::Network(message);
    }

    let code = err.as_service_error().and_then(|e| e.code());
    let status = err.raw_response().map(|r| r.status().as_u16());
    classify(code, status, subject, message)
}

fn classify(code: Option<&str>, status: Option<u16>, subject: &str, message: String) -> Error {
    match code {
        Some("NoSuchKey" | "NotFound" | "NoSuchBucket") => Error::NotFound(subject.to_string()),
        Some("NoSuchUpload") => Error::NoSuchUpload(subject.to_string()),
        Some("InvalidPart" | "InvalidPartOrder") => Error::MissingParts(message),
        Some("PreconditionFailed") => Error::PreconditionFailed(subject.to_string()),
        Some(
            "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken",
        ) => Error::Auth(message),
        Some("BucketAlreadyOwnedByYou" | "BucketAlreadyExists" | "BucketNotEmpty") => {
            Error::Conflict(message)
        }
        Some(
            "InvalidArgument" | "InvalidRange" | "InvalidRequest" | "EntityTooSmall"
            | "EntityTooLarge",
        ) => Error::InvalidArgument(message),
        Some("NotImplemented") => Error::UnsupportedFeature(message),
        Some("SlowDown" | "ServiceUnavailable" | "InternalError" | "RequestTimeout") => {
            Error::Network(message)
        }
        _ => match status {
            // HEAD responses carry no error body
            Some(404) => Error::NotFound(subject.to_string()),
            Some(403) => Error::Auth(message),
            Some(412) => Error::PreconditionFailed(subject.to_string()),
            Some(416) => Error::InvalidArgument(message),
            Some(s) if s >= 500 => Error::Network(message),
            _ => Error::General(message),
        },
    }
}

fn request_id(response: &impl RequestId) -> String {
    response.request_id().unwrap_or_default().to_string()
}

fn timestamp(dt: &DateTime) -> Option<jiff::Timestamp> {
    jiff::Timestamp::new(dt.secs(), dt.subsec_nanos() as i32).ok()
}

fn trim_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

/// Delete `keys` in batches of `batch`, merging the per-batch outcomes
///
/// Only a failure of the first batch fails the call. A later batch that
/// cannot be sent has each of its keys reported as a per-key error, so keys
/// already deleted by earlier batches are still reported.
async fn delete_in_batches<F, Fut>(
    keys: Vec<String>,
    batch: usize,
    mut send: F,
) -> Result<DeleteBlobsOutput>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<DeleteBlobsOutput>>,
{
    let mut output = DeleteBlobsOutput::default();
    for (index, chunk) in keys.chunks(batch.max(1)).enumerate() {
        match send(chunk.to_vec()).await {
            Ok(out) => {
                output.deleted.extend(out.deleted);
                output.errors.extend(out.errors);
                output.request_id = out.request_id;
            }
            Err(e) if index == 0 => return Err(e),
            Err(e) => {
                warn!(batch = index, keys = chunk.len(), error = %e, "delete batch failed");
                let message = e.to_string();
                output.errors.extend(chunk.iter().map(|key| DeleteBlobError {
                    key: key.clone(),
                    message: message.clone(),
                }));
            }
        }
    }
    Ok(output)
}

/// HTTP Range header for `count` bytes from `start`; `None` reads it all
fn range_header(start: u64, count: u64) -> Result<Option<String>> {
    match (start, count) {
        (0, 0) => Ok(None),
        (start, 0) => Ok(Some(format!("bytes={start}-"))),
        (start, count) => {
            let end = start.checked_add(count - 1).ok_or_else(|| {
                Error::InvalidArgument(format!("range of {count} bytes at {start} overflows"))
            })?;
            Ok(Some(format!("bytes={start}-{end}")))
        }
    }
}

/// `bucket/key` with the key percent-encoded for the x-amz-copy-source header
fn copy_source(bucket: &str, key: &str) -> String {
    let mut out = format!("{bucket}/");
    for b in key.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => {
                let _ = write!(out, "%{b:02X}");
            }
        }
    }
    out
}

fn to_sdk_metadata(metadata: Metadata) -> Option<HashMap<String, String>> {
    (!metadata.is_empty()).then(|| metadata.into_iter().collect())
}

fn from_sdk_metadata(metadata: Option<&HashMap<String, String>>) -> Metadata {
    metadata
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn part_number_i32(part_number: u32) -> Result<i32> {
    validate_part_number(part_number)?;
    i32::try_from(part_number)
        .map_err(|_| Error::InvalidArgument(format!("part number {part_number} too large")))
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn init(&self, bucket: &str) -> Result<()> {
        if bucket != self.bucket {
            return Err(Error::InvalidArgument(format!(
                "backend is bound to bucket {}, not {bucket}",
                self.bucket
            )));
        }

        self.inner
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket))?;
        debug!(bucket, "bucket reachable");
        Ok(())
    }

    async fn capabilities(&self) -> Result<Capabilities> {
        let caps = self
            .capabilities
            .get_or_init(|| async { resolve_capabilities(self.endpoint.as_ref()) })
            .await;
        Ok(caps.clone())
    }

    async fn head_blob(&self, input: HeadBlobInput) -> Result<HeadBlobOutput> {
        debug!(bucket = %self.bucket, key = %input.key, "head_blob");
        let response = self
            .inner
            .head_object()
            .bucket(&self.bucket)
            .key(&input.key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &input.key))?;

        let size = response.content_length().unwrap_or(0).max(0) as u64;
        let item = BlobItem {
            etag: response.e_tag().map(trim_etag),
            last_modified: response.last_modified().and_then(timestamp),
            storage_class: response.storage_class().map(|sc| sc.as_str().to_string()),
            metadata: from_sdk_metadata(response.metadata()),
            ..BlobItem::new(&input.key, size)
        };

        Ok(HeadBlobOutput {
            is_dir_blob: input.key.ends_with('/') && size == 0,
            content_type: response.content_type().map(str::to_string),
            request_id: request_id(&response),
            item,
        })
    }

    async fn list_blobs(&self, input: ListBlobsInput) -> Result<ListBlobsOutput> {
        debug!(bucket = %self.bucket, prefix = ?input.prefix, "list_blobs");
        let max_keys = input
            .max_keys
            .map(|n| i32::try_from(n).unwrap_or(i32::MAX));

        let response = self
            .inner
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_prefix(input.prefix.clone())
            .set_delimiter(input.delimiter.filter(|d| !d.is_empty()))
            .set_max_keys(max_keys)
            .set_start_after(input.start_after)
            .set_continuation_token(input.continuation_token)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, input.prefix.as_deref().unwrap_or(&self.bucket)))?;

        let prefixes = response
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();

        let items = response
            .contents()
            .iter()
            .map(|object| BlobItem {
                etag: object.e_tag().map(trim_etag),
                last_modified: object.last_modified().and_then(timestamp),
                storage_class: object.storage_class().map(|sc| sc.as_str().to_string()),
                ..BlobItem::new(
                    object.key().unwrap_or_default(),
                    object.size().unwrap_or(0).max(0) as u64,
                )
            })
            .collect();

        Ok(ListBlobsOutput {
            prefixes,
            items,
            next_continuation_token: response.next_continuation_token().map(str::to_string),
            is_truncated: response.is_truncated().unwrap_or(false),
            request_id: request_id(&response),
        })
    }

    async fn delete_blob(&self, input: DeleteBlobInput) -> Result<DeleteBlobOutput> {
        debug!(bucket = %self.bucket, key = %input.key, "delete_blob");
        let response = self
            .inner
            .delete_object()
            .bucket(&self.bucket)
            .key(&input.key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &input.key))?;

        Ok(DeleteBlobOutput {
            request_id: request_id(&response),
        })
    }

    async fn delete_blobs(&self, input: DeleteBlobsInput) -> Result<DeleteBlobsOutput> {
        let output =
            delete_in_batches(input.keys, DELETE_BATCH, |keys| self.delete_batch(keys)).await?;

        if !output.is_complete() {
            warn!(
                bucket = %self.bucket,
                failed = output.errors.len(),
                "Failed to delete some blobs"
            );
        }
        Ok(output)
    }

    async fn rename_blob(&self, input: RenameBlobInput) -> Result<RenameBlobOutput> {
        // S3 has no rename
        self.copy_blob(CopyBlobInput {
            source: input.source.clone(),
            destination: input.destination,
            ..Default::default()
        })
        .await?;
        let deleted = self.delete_blob(DeleteBlobInput::new(input.source)).await?;

        Ok(RenameBlobOutput {
            request_id: deleted.request_id,
        })
    }

    async fn copy_blob(&self, input: CopyBlobInput) -> Result<CopyBlobOutput> {
        use aws_sdk_s3::types::{MetadataDirective, StorageClass};

        debug!(
            bucket = %self.bucket,
            source = %input.source,
            destination = %input.destination,
            "copy_blob"
        );
        let mut request = self
            .inner
            .copy_object()
            .copy_source(copy_source(&self.bucket, &input.source))
            .bucket(&self.bucket)
            .key(&input.destination)
            .set_copy_source_if_match(input.etag.map(|e| format!("\"{e}\"")));

        if let Some(metadata) = input.metadata {
            request = request
                .metadata_directive(MetadataDirective::Replace)
                .set_metadata(to_sdk_metadata(metadata));
        }
        if let Some(class) = &input.storage_class {
            request = request.storage_class(StorageClass::from(class.as_str()));
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &input.source))?;

        Ok(CopyBlobOutput {
            request_id: request_id(&response),
        })
    }

    async fn get_blob(&self, input: GetBlobInput) -> Result<GetBlobOutput> {
        debug!(bucket = %self.bucket, key = %input.key, start = input.start, count = input.count, "get_blob");
        let range = range_header(input.start, input.count)?;
        let response = self
            .inner
            .get_object()
            .bucket(&self.bucket)
            .key(&input.key)
            .set_range(range)
            .set_if_match(input.if_match.map(|e| format!("\"{e}\"")))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &input.key))?;

        let request_id = request_id(&response);
        let item = BlobItem {
            etag: response.e_tag().map(trim_etag),
            last_modified: response.last_modified().and_then(timestamp),
            storage_class: response.storage_class().map(|sc| sc.as_str().to_string()),
            metadata: from_sdk_metadata(response.metadata()),
            ..BlobItem::new(&input.key, 0)
        };
        let content_type = response.content_type().map(str::to_string);

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| Error::Network(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(GetBlobOutput {
            head: HeadBlobOutput {
                item: BlobItem {
                    size: body.len() as u64,
                    ..item
                },
                content_type,
                is_dir_blob: input.key.ends_with('/') && body.is_empty(),
                request_id: request_id.clone(),
            },
            body,
            request_id,
        })
    }

    async fn put_blob(&self, input: PutBlobInput) -> Result<PutBlobOutput> {
        if input.dir_blob && (!input.key.ends_with('/') || !input.body.is_empty()) {
            return Err(Error::InvalidArgument(format!(
                "directory blob {} must end with '/' and be empty",
                input.key
            )));
        }

        debug!(bucket = %self.bucket, key = %input.key, size = input.body.len(), "put_blob");
        let response = self
            .inner
            .put_object()
            .bucket(&self.bucket)
            .key(&input.key)
            .body(ByteStream::from(input.body))
            .set_metadata(to_sdk_metadata(input.metadata))
            .set_content_type(input.content_type)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &input.key))?;

        Ok(PutBlobOutput {
            etag: response.e_tag().map(trim_etag),
            last_modified: Some(jiff::Timestamp::now()),
            storage_class: None,
            request_id: request_id(&response),
        })
    }

    async fn multipart_blob_begin(
        &self,
        input: MultipartBlobBeginInput,
    ) -> Result<MultipartUpload> {
        let response = self
            .inner
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&input.key)
            .set_metadata(to_sdk_metadata(input.metadata.clone()))
            .set_content_type(input.content_type.clone())
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &input.key))?;

        let upload_id = response.upload_id().ok_or_else(|| {
            Error::General(format!("no upload id returned for {}", input.key))
        })?;
        debug!(bucket = %self.bucket, key = %input.key, upload_id, "multipart upload begun");

        Ok(MultipartUpload::new(upload_id, input.key)
            .with_metadata(input.metadata)
            .with_content_type(input.content_type))
    }

    async fn multipart_blob_add(
        &self,
        input: MultipartBlobAddInput,
    ) -> Result<MultipartBlobAddOutput> {
        let part_number = part_number_i32(input.part_number)?;
        debug!(
            upload_id = %input.upload_id,
            part_number,
            size = input.body.len(),
            "multipart_blob_add"
        );

        let response = self
            .inner
            .upload_part()
            .bucket(&self.bucket)
            .key(&input.key)
            .upload_id(&input.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(input.body))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &input.upload_id))?;

        let part_id = response.e_tag().ok_or_else(|| {
            Error::General(format!("no ETag returned for part {part_number}"))
        })?;

        Ok(MultipartBlobAddOutput {
            part_id: part_id.to_string(),
            request_id: request_id(&response),
        })
    }

    async fn multipart_blob_copy(
        &self,
        input: MultipartBlobCopyInput,
    ) -> Result<MultipartBlobCopyOutput> {
        let part_number = part_number_i32(input.part_number)?;
        if input.size == 0 {
            return Err(Error::InvalidArgument("cannot copy an empty range".into()));
        }
        let range = range_header(input.offset, input.size)?;

        let response = self
            .inner
            .upload_part_copy()
            .bucket(&self.bucket)
            .key(&input.key)
            .upload_id(&input.upload_id)
            .part_number(part_number)
            .copy_source(copy_source(&self.bucket, &input.copy_source))
            .set_copy_source_range(range)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &input.copy_source))?;

        let part_id = response
            .copy_part_result()
            .and_then(|r| r.e_tag())
            .ok_or_else(|| Error::General(format!("no ETag returned for part {part_number}")))?;

        Ok(MultipartBlobCopyOutput {
            part_id: part_id.to_string(),
            request_id: request_id(&response),
        })
    }

    async fn multipart_blob_abort(
        &self,
        upload: &MultipartUpload,
    ) -> Result<MultipartBlobAbortOutput> {
        debug!(upload_id = %upload.upload_id, key = %upload.key, "multipart_blob_abort");
        self.abort(&upload.key, &upload.upload_id).await
    }

    async fn multipart_blob_commit(
        &self,
        upload: &MultipartUpload,
    ) -> Result<MultipartBlobCommitOutput> {
        use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};

        let parts = upload
            .completed_parts()?
            .into_iter()
            .map(|(n, etag)| -> Result<CompletedPart> {
                Ok(CompletedPart::builder()
                    .part_number(part_number_i32(n)?)
                    .e_tag(etag)
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(upload_id = %upload.upload_id, parts = parts.len(), "multipart_blob_commit");

        let response = self
            .inner
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &upload.upload_id))?;

        Ok(MultipartBlobCommitOutput {
            etag: response.e_tag().map(trim_etag),
            last_modified: Some(jiff::Timestamp::now()),
            request_id: request_id(&response),
        })
    }

    async fn multipart_expire(&self, input: MultipartExpireInput) -> Result<MultipartExpireOutput> {
        let threshold = jiff::SignedDuration::try_from(input.older_than.unwrap_or(self.expire_after))
            .map_err(|e| Error::InvalidArgument(format!("expire threshold: {e}")))?;
        let now = jiff::Timestamp::now();

        let mut stale = Vec::new();
        let mut key_marker = None;
        let mut upload_id_marker = None;
        let mut last_request_id;
        loop {
            let response = self
                .inner
                .list_multipart_uploads()
                .bucket(&self.bucket)
                .set_prefix(input.prefix.clone())
                .set_key_marker(key_marker.take())
                .set_upload_id_marker(upload_id_marker.take())
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &self.bucket))?;
            last_request_id = request_id(&response);

            for upload in response.uploads() {
                let (Some(key), Some(id)) = (upload.key(), upload.upload_id()) else {
                    continue;
                };
                let Some(initiated) = upload.initiated().and_then(timestamp) else {
                    continue;
                };
                if now.duration_since(initiated) >= threshold {
                    stale.push((key.to_string(), id.to_string()));
                }
            }

            if !response.is_truncated().unwrap_or(false) {
                break;
            }
            key_marker = response.next_key_marker().map(str::to_string);
            upload_id_marker = response.next_upload_id_marker().map(str::to_string);
            if key_marker.is_none() && upload_id_marker.is_none() {
                break;
            }
        }

        let results: Vec<_> = stream::iter(stale)
            .map(|(key, id)| async move {
                let result = self.abort(&key, &id).await;
                (id, result)
            })
            .buffer_unordered(EXPIRE_CONCURRENCY)
            .collect()
            .await;

        let mut expired = Vec::new();
        for (id, result) in results {
            match result {
                Ok(_) => expired.push(id),
                // Finished or aborted between listing and abort
                Err(Error::NoSuchUpload(_)) => {}
                Err(err) => warn!(upload_id = %id, %err, "Failed to expire upload"),
            }
        }

        info!(
            bucket = %self.bucket,
            prefix = ?input.prefix,
            expired = expired.len(),
            "expired multipart uploads"
        );
        Ok(MultipartExpireOutput {
            expired,
            request_id: last_request_id,
        })
    }

    async fn make_bucket(&self, _input: MakeBucketInput) -> Result<MakeBucketOutput> {
        use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};

        let mut request = self.inner.create_bucket().bucket(&self.bucket);
        if let Some(region) = self.region.as_deref().filter(|r| *r != "us-east-1") {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &self.bucket))?;
        info!(bucket = %self.bucket, "bucket created");

        Ok(MakeBucketOutput {
            request_id: request_id(&response),
        })
    }

    async fn remove_bucket(&self, _input: RemoveBucketInput) -> Result<RemoveBucketOutput> {
        let response = self
            .inner
            .delete_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &self.bucket))?;
        info!(bucket = %self.bucket, "bucket removed");

        Ok(RemoveBucketOutput {
            request_id: request_id(&response),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_code() {
        let err = classify(Some("NoSuchKey"), Some(404), "k", "msg".into());
        assert!(matches!(err, Error::NotFound(ref k) if k == "k"));

        let err = classify(Some("NoSuchUpload"), Some(404), "u1", "msg".into());
        assert!(matches!(err, Error::NoSuchUpload(ref id) if id == "u1"));

        let err = classify(Some("InvalidPart"), Some(400), "u1", "msg".into());
        assert!(err.is_protocol_violation());

        let err = classify(Some("BucketNotEmpty"), Some(409), "b", "msg".into());
        assert!(matches!(err, Error::Conflict(_)));

        let err = classify(Some("SlowDown"), Some(503), "k", "msg".into());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_by_status_without_code() {
        assert!(matches!(
            classify(None, Some(404), "k", String::new()),
            Error::NotFound(_)
        ));
        assert!(matches!(
            classify(None, Some(403), "k", String::new()),
            Error::Auth(_)
        ));
        assert!(matches!(
            classify(None, Some(502), "k", String::new()),
            Error::Network(_)
        ));
        assert!(matches!(
            classify(None, None, "k", "odd".into()),
            Error::General(ref m) if m == "odd"
        ));
    }

    #[test]
    fn test_range_header() {
        assert_eq!(range_header(0, 0).unwrap(), None);
        assert_eq!(range_header(7, 0).unwrap().as_deref(), Some("bytes=7-"));
        assert_eq!(range_header(3, 4).unwrap().as_deref(), Some("bytes=3-6"));
        assert_eq!(range_header(0, 1).unwrap().as_deref(), Some("bytes=0-0"));
    }

    #[test]
    fn test_range_header_overflow_is_invalid() {
        let err = range_header(u64::MAX - 1, 5).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(
            range_header(u64::MAX - 1, 2).unwrap().as_deref(),
            Some("bytes=18446744073709551614-18446744073709551615")
        );
    }

    #[test]
    fn test_copy_source_encoding() {
        assert_eq!(copy_source("b", "dir/file.txt"), "b/dir/file.txt");
        assert_eq!(copy_source("b", "a b+c"), "b/a%20b%2Bc");
        assert_eq!(copy_source("b", "é"), "b/%C3%A9");
    }

    #[test]
    fn test_timestamp_conversion() {
        let dt = DateTime::from_secs_and_nanos(1_700_000_000, 500);
        let ts = timestamp(&dt).unwrap();
        assert_eq!(ts.as_second(), 1_700_000_000);
        assert_eq!(ts.subsec_nanosecond(), 500);
    }

    #[test]
    fn test_part_number_conversion() {
        assert_eq!(part_number_i32(1).unwrap(), 1);
        assert!(part_number_i32(0).is_err());
        assert!(part_number_i32(10_001).is_err());
    }

    #[test]
    fn test_metadata_conversion() {
        assert!(to_sdk_metadata(Metadata::new()).is_none());

        let mut metadata = Metadata::new();
        metadata.insert("origin".into(), "test".into());
        let sdk = to_sdk_metadata(metadata.clone()).unwrap();
        assert_eq!(from_sdk_metadata(Some(&sdk)), metadata);
    }

    #[tokio::test]
    async fn test_new_rejects_missing_bucket() {
        let config = BackendConfig::default();
        assert!(matches!(
            S3Backend::new(&config).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_capabilities_from_endpoint() {
        let config = BackendConfig {
            bucket: "test".into(),
            endpoint: Some("http://localhost:9000".into()),
            region: Some("us-east-1".into()),
            path_style: true,
            ..Default::default()
        };
        let backend = S3Backend::new(&config).await.unwrap();
        let caps = backend.capabilities().await.unwrap();
        assert_eq!(caps.name, "s3-compatible");
        assert_eq!(backend.capabilities().await.unwrap(), caps);
    }

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("k{i:04}")).collect()
    }

    #[tokio::test]
    async fn test_delete_batches_keep_progress_after_failed_batch() {
        let mut calls = 0;
        let output = delete_in_batches(keys(2500), 1000, |batch| {
            calls += 1;
            let call = calls;
            async move {
                if call == 2 {
                    return Err(Error::Network("connection reset".into()));
                }
                Ok(DeleteBlobsOutput {
                    deleted: batch,
                    errors: Vec::new(),
                    request_id: format!("req-{call}"),
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(calls, 3);
        assert_eq!(output.deleted.len(), 1500);
        assert_eq!(output.deleted[0], "k0000");
        assert_eq!(output.deleted[1000], "k2000");
        assert_eq!(output.errors.len(), 1000);
        assert_eq!(output.errors[0].key, "k1000");
        assert_eq!(output.errors[999].key, "k1999");
        assert!(output.errors[0].message.contains("connection reset"));
        assert_eq!(output.request_id, "req-3");
        assert!(!output.is_complete());
    }

    #[tokio::test]
    async fn test_delete_batches_first_failure_is_error() {
        let result = delete_in_batches(keys(1500), 1000, |_| async {
            Err::<DeleteBlobsOutput, _>(Error::Auth("denied".into()))
        })
        .await;
        assert!(matches!(result, Err(Error::Auth(_))));
    }

    #[tokio::test]
    async fn test_delete_batches_merge_per_key_errors() {
        let output = delete_in_batches(keys(3), 2, |batch| async move {
            let (deleted, failed) = batch.split_at(1);
            Ok(DeleteBlobsOutput {
                deleted: deleted.to_vec(),
                errors: failed
                    .iter()
                    .map(|k| DeleteBlobError {
                        key: k.clone(),
                        message: "AccessDenied: no".into(),
                    })
                    .collect(),
                request_id: String::new(),
            })
        })
        .await
        .unwrap();

        assert_eq!(output.deleted, vec!["k0000", "k0002"]);
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.errors[0].key, "k0001");
    }
}
