//! Capability resolution for S3-compatible providers
//!
//! Different S3-compatible providers accept different multipart shapes.
//! Capabilities are resolved from the endpoint host without any request,
//! so resolving them never touches the network.

use blobkit_core::multipart::MAX_PART_SIZE;
use blobkit_core::{Capabilities, Error, Result};

/// Host suffix to provider name and largest multipart object
///
/// Every provider listed here accepts parallel part uploads.
const PROVIDERS: &[(&str, &str, u64)] = &[
    ("amazonaws.com", "s3", MAX_PART_SIZE),
    ("storage.googleapis.com", "gcs", MAX_PART_SIZE),
    ("r2.cloudflarestorage.com", "r2", MAX_PART_SIZE),
    ("digitaloceanspaces.com", "spaces", MAX_PART_SIZE),
    ("backblazeb2.com", "b2", MAX_PART_SIZE),
];

/// Resolve capabilities for an endpoint
///
/// No endpoint means AWS itself. Unknown hosts get the S3 limits under the
/// name `s3-compatible`.
pub fn resolve_capabilities(endpoint: Option<&url::Url>) -> Capabilities {
    let Some(host) = endpoint.and_then(|url| url.host_str()) else {
        return Capabilities::default();
    };

    PROVIDERS
        .iter()
        .find(|(suffix, ..)| host == *suffix || host.ends_with(&format!(".{suffix}")))
        .map(|&(_, name, max)| Capabilities::new(name, max))
        .unwrap_or_else(|| Capabilities::new("s3-compatible", MAX_PART_SIZE))
}

/// Check an object of `size` bytes can be produced by a multipart upload
pub fn require_multipart_size(caps: &Capabilities, size: u64) -> Result<()> {
    if size <= caps.max_multipart_size {
        return Ok(());
    }

    Err(Error::UnsupportedFeature(format!(
        "{} cannot assemble a {} object (limit {})",
        caps.name,
        humansize::format_size(size, humansize::BINARY),
        humansize::format_size(caps.max_multipart_size, humansize::BINARY)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps_for(endpoint: &str) -> Capabilities {
        let url = url::Url::parse(endpoint).unwrap();
        resolve_capabilities(Some(&url))
    }

    #[test]
    fn test_no_endpoint_is_aws() {
        assert_eq!(resolve_capabilities(None), Capabilities::default());
    }

    #[test]
    fn test_known_providers() {
        assert_eq!(caps_for("https://s3.us-west-2.amazonaws.com").name, "s3");
        assert_eq!(caps_for("https://storage.googleapis.com").name, "gcs");
        assert_eq!(
            caps_for("https://abc123.r2.cloudflarestorage.com").name,
            "r2"
        );
        assert!(!caps_for("https://storage.googleapis.com").no_parallel_multipart);
    }

    #[test]
    fn test_suffix_must_match_label_boundary() {
        assert_eq!(
            caps_for("https://notamazonaws.com").name,
            "s3-compatible"
        );
        assert_eq!(caps_for("http://localhost:9000").name, "s3-compatible");
    }

    #[test]
    fn test_require_multipart_size() {
        let caps = Capabilities::new("tiny", 1024);
        assert!(require_multipart_size(&caps, 1024).is_ok());

        let err = require_multipart_size(&caps, 1025).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFeature(_)));
        assert!(err.to_string().contains("tiny"));
    }
}
