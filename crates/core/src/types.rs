//! Input and output values for storage backend operations
//!
//! The core passes these through untouched. Only a concrete backend gives
//! their fields meaning on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::multipart::MultipartUpload;

/// User metadata attached to a blob
pub type Metadata = BTreeMap<String, String>;

/// Metadata for a single blob as reported by head or list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlobItem {
    /// Object key
    pub key: String,

    /// ETag as reported by the provider, without quotes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// Last modified timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<jiff::Timestamp>,

    /// Size in bytes
    pub size: u64,

    /// Storage class
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// User metadata (empty when the provider does not return it)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl BlobItem {
    /// Create a new BlobItem for a key of known size
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            ..Default::default()
        }
    }

    /// Human-readable size
    pub fn size_human(&self) -> String {
        humansize::format_size(self.size, humansize::BINARY)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadBlobInput {
    pub key: String,
}

impl HeadBlobInput {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeadBlobOutput {
    #[serde(flatten)]
    pub item: BlobItem,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Blob is a zero-length directory marker
    pub is_dir_blob: bool,

    pub request_id: String,
}

/// Options for list operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListBlobsInput {
    /// Prefix to filter by
    pub prefix: Option<String>,

    /// Delimiter for grouping (usually "/")
    pub delimiter: Option<String>,

    /// Maximum number of keys to return per request
    pub max_keys: Option<u32>,

    /// Only return keys strictly after this one
    pub start_after: Option<String>,

    /// Continuation token from a previous truncated page
    pub continuation_token: Option<String>,
}

impl ListBlobsInput {
    /// List everything under `prefix`, recursively
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ListBlobsOutput {
    /// Common prefixes collapsed by the delimiter
    pub prefixes: Vec<String>,

    pub items: Vec<BlobItem>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_continuation_token: Option<String>,

    pub is_truncated: bool,

    pub request_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteBlobInput {
    pub key: String,
}

impl DeleteBlobInput {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteBlobOutput {
    pub request_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteBlobsInput {
    pub keys: Vec<String>,
}

/// Per-key failure inside a batched delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteBlobError {
    pub key: String,
    pub message: String,
}

/// Result of a batched delete
///
/// Batched deletion is not atomic: some keys can be deleted while others
/// fail. The operation itself only fails when the batch as a whole could not
/// be attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteBlobsOutput {
    pub deleted: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<DeleteBlobError>,

    pub request_id: String,
}

impl DeleteBlobsOutput {
    /// Whether every requested key was deleted
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameBlobInput {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenameBlobOutput {
    pub request_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyBlobInput {
    pub source: String,
    pub destination: String,

    /// Source size if already known
    pub size: Option<u64>,

    /// Copy only if the source still has this ETag
    pub etag: Option<String>,

    /// Replacement metadata; `None` keeps the source metadata
    pub metadata: Option<Metadata>,

    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CopyBlobOutput {
    pub request_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetBlobInput {
    pub key: String,

    /// First byte to read
    pub start: u64,

    /// Number of bytes to read; 0 reads to the end
    pub count: u64,

    pub if_match: Option<String>,
}

impl GetBlobInput {
    /// Read the whole blob
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Read `count` bytes starting at `start`
    pub fn range(key: impl Into<String>, start: u64, count: u64) -> Self {
        Self {
            key: key.into(),
            start,
            count,
            if_match: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetBlobOutput {
    pub head: HeadBlobOutput,
    pub body: Vec<u8>,
    pub request_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutBlobInput {
    pub key: String,
    pub metadata: Metadata,
    pub content_type: Option<String>,

    /// Write a zero-length directory marker
    pub dir_blob: bool,

    pub body: Vec<u8>,
}

impl PutBlobInput {
    pub fn new(key: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            body: body.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PutBlobOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<jiff::Timestamp>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    pub request_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartBlobBeginInput {
    pub key: String,
    pub metadata: Metadata,
    pub content_type: Option<String>,
}

impl MultipartBlobBeginInput {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }
}

/// Upload one part of an in-progress multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartBlobAddInput {
    /// Key the upload was begun for
    pub key: String,
    pub upload_id: String,

    /// 1-based part number
    pub part_number: u32,

    pub body: Vec<u8>,

    /// This is the final part of the object
    pub last: bool,

    /// Offset of this part inside the final object
    pub offset: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MultipartBlobAddOutput {
    /// Provider part identifier (S3: the part ETag)
    pub part_id: String,
    pub request_id: String,
}

/// Populate a part by copying a byte range of an existing blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartBlobCopyInput {
    pub key: String,
    pub upload_id: String,
    pub part_number: u32,

    /// Key of the blob to copy from
    pub copy_source: String,

    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MultipartBlobCopyOutput {
    pub part_id: String,
    pub request_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MultipartBlobCommitOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<jiff::Timestamp>,

    pub request_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MultipartBlobAbortOutput {
    pub request_id: String,
}

/// Sweep abandoned multipart uploads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartExpireInput {
    /// Age threshold; `None` uses the backend's configured default
    pub older_than: Option<std::time::Duration>,

    /// Only sweep uploads whose key starts with this prefix
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MultipartExpireOutput {
    /// Upload ids that were aborted by the sweep
    pub expired: Vec<String>,
    pub request_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MakeBucketInput {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MakeBucketOutput {
    pub request_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveBucketInput {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoveBucketOutput {
    pub request_id: String,
}

impl MultipartUpload {
    /// Build the input for uploading `part_number` of this upload
    pub fn add_input(&self, part_number: u32, body: Vec<u8>) -> MultipartBlobAddInput {
        MultipartBlobAddInput {
            key: self.key.clone(),
            upload_id: self.upload_id.clone(),
            part_number,
            body,
            last: false,
            offset: 0,
        }
    }

    /// Build the input for filling `part_number` from a range of `copy_source`
    pub fn copy_input(
        &self,
        part_number: u32,
        copy_source: impl Into<String>,
        offset: u64,
        size: u64,
    ) -> MultipartBlobCopyInput {
        MultipartBlobCopyInput {
            key: self.key.clone(),
            upload_id: self.upload_id.clone(),
            part_number,
            copy_source: copy_source.into(),
            offset,
            size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_item_size_human() {
        let item = BlobItem::new("a/b.bin", 2048);
        assert_eq!(item.key, "a/b.bin");
        assert_eq!(item.size_human(), "2 KiB");
    }

    #[test]
    fn test_get_blob_input_range() {
        let input = GetBlobInput::range("k", 10, 5);
        assert_eq!(input.start, 10);
        assert_eq!(input.count, 5);
        assert!(input.if_match.is_none());

        let whole = GetBlobInput::new("k");
        assert_eq!(whole.count, 0);
    }

    #[test]
    fn test_delete_blobs_output_partial() {
        let output = DeleteBlobsOutput {
            deleted: vec!["a".into()],
            errors: vec![DeleteBlobError {
                key: "b".into(),
                message: "access denied".into(),
            }],
            request_id: String::new(),
        };
        assert!(!output.is_complete());
    }

    #[test]
    fn test_upload_inputs_carry_handle_identity() {
        let upload = MultipartUpload::new("upload-1", "big.bin");
        let add = upload.add_input(3, vec![1, 2, 3]);
        assert_eq!(add.upload_id, "upload-1");
        assert_eq!(add.key, "big.bin");
        assert_eq!(add.part_number, 3);

        let copy = upload.copy_input(1, "src.bin", 0, 10);
        assert_eq!(copy.copy_source, "src.bin");
        assert_eq!(copy.size, 10);
    }
}
