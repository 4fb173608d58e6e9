//! Multipart upload handle and part planning
//!
//! A [`MultipartUpload`] is returned by `multipart_blob_begin` and owned by
//! the caller from then on. Backends never keep it: the caller records the
//! part ids returned by add/copy into it and hands it back to commit or
//! abort. Lifecycle:
//!
//! ```text
//! NotStarted --begin--> Began --add/copy--> Began --commit--> Committed
//!                         |
//!                         +--abort / expire sweep--> Aborted
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Metadata;

/// Default part size: 64 MiB
pub const DEFAULT_PART_SIZE: u64 = 64 * 1024 * 1024;

/// Minimum part size: 5 MiB (S3 requirement)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum part size: 5 GiB
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum number of parts: 10,000 (S3 limit)
pub const MAX_PARTS: u32 = 10_000;

/// Default age after which an abandoned upload is expired: 48 hours
pub const DEFAULT_EXPIRE_AFTER_SECS: u64 = 48 * 60 * 60;

/// Caller-owned handle of an in-progress multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartUpload {
    /// Upload ID issued by the provider
    pub upload_id: String,

    /// Target key
    pub key: String,

    /// Metadata the final blob will carry
    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Recorded part ids by part number
    #[serde(default)]
    pub parts: BTreeMap<u32, String>,

    /// Highest part number recorded so far
    #[serde(default)]
    pub num_parts: u32,

    /// When the upload was begun
    pub initiated: jiff::Timestamp,
}

impl MultipartUpload {
    /// Create a handle for a freshly begun upload
    pub fn new(upload_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            upload_id: upload_id.into(),
            key: key.into(),
            metadata: Metadata::new(),
            content_type: None,
            parts: BTreeMap::new(),
            num_parts: 0,
            initiated: jiff::Timestamp::now(),
        }
    }

    /// Set the metadata the final blob will carry
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the content type the final blob will carry
    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    /// Record the id returned for a part
    ///
    /// Re-recording a part number replaces the earlier id, so a retried add
    /// leaves the handle pointing at the latest upload of that part.
    pub fn record_part(&mut self, part_number: u32, part_id: impl Into<String>) {
        self.parts.insert(part_number, part_id.into());
        self.num_parts = self.num_parts.max(part_number);
    }

    /// Part numbers in `1..=num_parts` that have no recorded id
    pub fn missing_parts(&self) -> Vec<u32> {
        (1..=self.num_parts)
            .filter(|n| !self.parts.contains_key(n))
            .collect()
    }

    /// Ordered `(part_number, part_id)` pairs for commit
    ///
    /// Fails when the upload has no parts or has a gap.
    pub fn completed_parts(&self) -> Result<Vec<(u32, String)>> {
        if self.num_parts == 0 {
            return Err(Error::MissingParts(format!(
                "upload {} has no parts",
                self.upload_id
            )));
        }

        let missing = self.missing_parts();
        if !missing.is_empty() {
            return Err(Error::MissingParts(format!(
                "upload {} is missing parts {missing:?}",
                self.upload_id
            )));
        }

        Ok(self
            .parts
            .iter()
            .map(|(n, id)| (*n, id.clone()))
            .collect())
    }
}

/// Reject part numbers outside the 1-based S3 range
pub fn validate_part_number(part_number: u32) -> Result<()> {
    if part_number == 0 || part_number > MAX_PARTS {
        return Err(Error::InvalidArgument(format!(
            "part number {part_number} outside 1..={MAX_PARTS}"
        )));
    }
    Ok(())
}

/// Multipart upload configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartConfig {
    /// Part size in bytes
    pub part_size: u64,

    /// Number of concurrent part uploads
    pub concurrency: usize,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            concurrency: 4,
        }
    }
}

impl MultipartConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn part_size(mut self, size: u64) -> Self {
        self.part_size = size.clamp(MIN_PART_SIZE, MAX_PART_SIZE);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Calculate appropriate part size for a blob
    pub fn calculate_part_size(&self, blob_size: u64) -> u64 {
        if blob_size <= MIN_PART_SIZE {
            return MIN_PART_SIZE;
        }

        let parts = blob_size.div_ceil(self.part_size);

        if parts <= MAX_PARTS as u64 {
            self.part_size
        } else {
            // Need larger parts to fit within the part count limit
            let required_size = blob_size.div_ceil(MAX_PARTS as u64);
            required_size.clamp(MIN_PART_SIZE, MAX_PART_SIZE)
        }
    }
}

/// Calculate number of parts for a blob
pub fn calculate_parts(blob_size: u64, part_size: u64) -> u32 {
    blob_size.div_ceil(part_size) as u32
}

/// Get byte range `[start, end)` for a part
pub fn part_byte_range(part_number: u32, part_size: u64, total_size: u64) -> (u64, u64) {
    let start = (part_number as u64 - 1) * part_size;
    let end = (start + part_size).min(total_size);
    (start, end)
}
