//! blobkit-s3: S3 storage backend for blobkit
//!
//! This crate implements the StorageBackend trait from blobkit-core using
//! the aws-sdk-s3 crate. It is the only crate that directly depends on the
//! AWS SDK.

pub mod backend;
pub mod capability;

pub use backend::S3Backend;
pub use capability::{require_multipart_size, resolve_capabilities};
