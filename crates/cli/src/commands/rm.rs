//! rm command - Remove blobs
//!
//! Keys are deleted through one batched request per 1000 keys. With
//! `--recursive` each argument is a prefix and everything under it goes.

use clap::Args;
use serde::Serialize;

use blobkit_core::{DeleteBlobError, DeleteBlobsInput, StorageBackend};

use super::{list_all, open_backend};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Remove blobs
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Keys to remove (prefixes with --recursive)
    #[arg(required = true)]
    pub keys: Vec<String>,

    /// Remove everything under each prefix
    #[arg(short, long)]
    pub recursive: bool,

    /// Only show what would be deleted (dry run)
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
struct RmOutput {
    status: &'static str,
    deleted: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failed: Vec<DeleteBlobError>,
    total: usize,
}

/// Execute the rm command
pub async fn execute(args: RmArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let session = match open_backend(&formatter).await {
        Ok(session) => session,
        Err(code) => return code,
    };

    let keys = if args.recursive {
        match expand_prefixes(session.backend.as_ref(), &args.keys).await {
            Ok(keys) => keys,
            Err(e) => return formatter.fail("Failed to list blobs", &e),
        }
    } else {
        args.keys.clone()
    };

    if keys.is_empty() {
        formatter.warning("Nothing to remove");
        return ExitCode::Success;
    }

    if args.dry_run {
        for key in &keys {
            formatter.println(&format!("Would remove: {key}"));
        }
        return ExitCode::Success;
    }

    let total = keys.len();
    let out = match session.backend.delete_blobs(DeleteBlobsInput { keys }).await {
        Ok(out) => out,
        Err(e) => return formatter.fail("Failed to remove blobs", &e),
    };

    let complete = out.is_complete();
    if formatter.is_json() {
        formatter.json(&RmOutput {
            status: if complete { "success" } else { "partial" },
            deleted: out.deleted,
            failed: out.errors,
            total,
        });
    } else {
        for key in &out.deleted {
            formatter.println(&format!("Removed: {key}"));
        }
        for failure in &out.errors {
            formatter.error(&format!("Failed to remove {}: {}", failure.key, failure.message));
        }
        if total > 1 {
            formatter.println(&format!("\nRemoved {} of {total} blobs", out.deleted.len()));
        }
    }

    if complete {
        ExitCode::Success
    } else {
        ExitCode::GeneralError
    }
}

/// Every key under each prefix, deduplicated and sorted
async fn expand_prefixes(
    backend: &dyn StorageBackend,
    prefixes: &[String],
) -> blobkit_core::Result<Vec<String>> {
    let mut keys = Vec::new();
    for prefix in prefixes {
        let (_, items) = list_all(backend, prefix, None, None).await?;
        keys.extend(items.into_iter().map(|item| item.key));
    }
    keys.sort();
    keys.dedup();
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobkit_core::{MemoryBackend, PutBlobInput};

    #[tokio::test]
    async fn test_expand_prefixes_dedups_overlap() {
        let backend = MemoryBackend::new("b");
        for key in ["logs/a", "logs/old/b", "data/c"] {
            backend
                .put_blob(PutBlobInput::new(key, b"".to_vec()))
                .await
                .unwrap();
        }

        let keys = expand_prefixes(&backend, &["logs/".to_string(), "logs/old/".to_string()])
            .await
            .unwrap();
        assert_eq!(keys, ["logs/a", "logs/old/b"]);
    }
}
