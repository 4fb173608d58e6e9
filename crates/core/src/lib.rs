//! blobkit-core: Storage backend contract for blobkit
//!
//! This crate provides the provider-independent pieces of blobkit:
//! - The `StorageBackend` trait every object store implements
//! - The caller-owned multipart upload handle and part planning
//! - An in-memory backend
//! - `TestBackend`, a test double with overrides and error injection
//! - A conformance suite any backend can be run against
//! - Configuration management
//!
//! Nothing here depends on a provider SDK.

pub mod config;
pub mod conformance;
pub mod error;
pub mod memory;
pub mod multipart;
pub mod test_backend;
pub mod traits;
pub mod types;

pub use config::{BackendConfig, BackendKind, Config, ConfigManager, MultipartSettings};
pub use conformance::{Check, CheckReport, Suite};
pub use error::{Error, Result};
pub use memory::MemoryBackend;
pub use multipart::{MultipartConfig, MultipartUpload};
pub use test_backend::{Overrides, TestBackend, TestBackendInit};
pub use traits::{Capabilities, StorageBackend};
pub use types::*;
