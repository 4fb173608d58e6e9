//! StorageBackend trait definition
//!
//! This trait defines the operation set every object storage backend must
//! implement identically, whatever the provider. Callers hold backends as
//! `Arc<dyn StorageBackend>` and never learn which provider sits behind it.
//!
//! Every operation returns a [`Result`]: a populated output or an error, never
//! both and never neither.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::multipart::{MultipartUpload, MAX_PART_SIZE};
use crate::types::*;

/// Static facts about a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Provider name
    pub name: String,

    /// Largest object a multipart upload may produce, in bytes
    pub max_multipart_size: u64,

    /// Provider rejects parallel part uploads for one upload
    #[serde(default)]
    pub no_parallel_multipart: bool,
}

impl Capabilities {
    pub fn new(name: impl Into<String>, max_multipart_size: u64) -> Self {
        Self {
            name: name.into(),
            max_multipart_size,
            no_parallel_multipart: false,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new("s3", MAX_PART_SIZE)
    }
}

impl std::fmt::Display for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (max multipart size {}{})",
            self.name,
            humansize::format_size(self.max_multipart_size, humansize::BINARY),
            if self.no_parallel_multipart {
                ", sequential parts"
            } else {
                ""
            }
        )
    }
}

/// Trait for object storage backends
///
/// Implemented by concrete provider backends, the in-memory backend and the
/// test double. Implementations must be safe to call concurrently; a call
/// blocked on the network must not block unrelated calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// One-time setup or validation for a bucket
    async fn init(&self, bucket: &str) -> Result<()>;

    /// Backend capabilities
    ///
    /// Must not hit the network again after the first successful resolution.
    async fn capabilities(&self) -> Result<Capabilities>;

    /// Blob metadata
    async fn head_blob(&self, input: HeadBlobInput) -> Result<HeadBlobOutput>;

    /// One page of blobs under a prefix
    async fn list_blobs(&self, input: ListBlobsInput) -> Result<ListBlobsOutput>;

    async fn delete_blob(&self, input: DeleteBlobInput) -> Result<DeleteBlobOutput>;

    /// Delete many blobs; per-key failures are reported in the output
    async fn delete_blobs(&self, input: DeleteBlobsInput) -> Result<DeleteBlobsOutput>;

    async fn rename_blob(&self, input: RenameBlobInput) -> Result<RenameBlobOutput>;

    async fn copy_blob(&self, input: CopyBlobInput) -> Result<CopyBlobOutput>;

    /// Full or ranged read
    async fn get_blob(&self, input: GetBlobInput) -> Result<GetBlobOutput>;

    async fn put_blob(&self, input: PutBlobInput) -> Result<PutBlobOutput>;

    /// Start a multipart upload and return its handle
    async fn multipart_blob_begin(
        &self,
        input: MultipartBlobBeginInput,
    ) -> Result<MultipartUpload>;

    /// Upload one part; re-adding a part number overwrites it
    async fn multipart_blob_add(&self, input: MultipartBlobAddInput)
        -> Result<MultipartBlobAddOutput>;

    /// Fill one part from a byte range of an existing blob
    async fn multipart_blob_copy(
        &self,
        input: MultipartBlobCopyInput,
    ) -> Result<MultipartBlobCopyOutput>;

    /// Abort an in-progress upload; fails for committed or aborted uploads
    async fn multipart_blob_abort(
        &self,
        upload: &MultipartUpload,
    ) -> Result<MultipartBlobAbortOutput>;

    /// Assemble recorded parts in part-number order; fails on missing parts
    async fn multipart_blob_commit(
        &self,
        upload: &MultipartUpload,
    ) -> Result<MultipartBlobCommitOutput>;

    /// Abort every upload older than the threshold
    async fn multipart_expire(&self, input: MultipartExpireInput)
        -> Result<MultipartExpireOutput>;

    async fn make_bucket(&self, input: MakeBucketInput) -> Result<MakeBucketOutput>;

    async fn remove_bucket(&self, input: RemoveBucketInput) -> Result<RemoveBucketOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capabilities() {
        let caps = Capabilities::default();
        assert_eq!(caps.name, "s3");
        assert_eq!(caps.max_multipart_size, 5 * 1024 * 1024 * 1024);
        assert!(!caps.no_parallel_multipart);
    }

    #[test]
    fn test_capabilities_display() {
        let caps = Capabilities::default();
        assert_eq!(caps.to_string(), "s3 (max multipart size 5 GiB)");
    }

    #[tokio::test]
    async fn test_mock_backend_is_a_storage_backend() {
        let mut mock = MockStorageBackend::new();
        mock.expect_capabilities()
            .returning(|| Ok(Capabilities::new("mock", 1024)));

        let backend: std::sync::Arc<dyn StorageBackend> = std::sync::Arc::new(mock);
        let caps = backend.capabilities().await.unwrap();
        assert_eq!(caps.name, "mock");
    }
}
