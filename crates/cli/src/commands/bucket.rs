//! mb and rb commands - Create or remove the configured bucket

use clap::Args;
use serde::Serialize;

use blobkit_core::{DeleteBlobsInput, MakeBucketInput, RemoveBucketInput};

use super::{list_all, open_backend, open_unbound};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Remove the configured bucket
#[derive(Args, Debug)]
pub struct RbArgs {
    /// Delete every blob in the bucket first
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
struct BucketOutput {
    status: &'static str,
    bucket: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    blobs_removed: Option<usize>,
}

/// Execute the mb command
pub async fn make(output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let session = match open_unbound(&formatter).await {
        Ok(session) => session,
        Err(code) => return code,
    };
    let bucket = session.bucket().to_string();

    if let Err(e) = session.backend.make_bucket(MakeBucketInput {}).await {
        return formatter.fail(&format!("Failed to create bucket '{bucket}'"), &e);
    }

    if formatter.is_json() {
        formatter.json(&BucketOutput {
            status: "success",
            bucket,
            blobs_removed: None,
        });
    } else {
        formatter.success(&format!("Bucket '{bucket}' created"));
    }
    ExitCode::Success
}

/// Execute the rb command
pub async fn remove(args: RbArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let session = match open_backend(&formatter).await {
        Ok(session) => session,
        Err(code) => return code,
    };
    let backend = session.backend.as_ref();
    let bucket = session.bucket().to_string();

    let mut blobs_removed = None;
    if args.force {
        let keys = match list_all(backend, "", None, None).await {
            Ok((_, items)) => items.into_iter().map(|item| item.key).collect::<Vec<_>>(),
            Err(e) => return formatter.fail(&format!("Failed to list bucket '{bucket}'"), &e),
        };
        if !keys.is_empty() {
            match backend.delete_blobs(DeleteBlobsInput { keys }).await {
                Ok(out) if out.is_complete() => blobs_removed = Some(out.deleted.len()),
                Ok(out) => {
                    for failure in &out.errors {
                        formatter.error(&format!("Failed to remove {}: {}", failure.key, failure.message));
                    }
                    return ExitCode::GeneralError;
                }
                Err(e) => return formatter.fail("Failed to empty bucket", &e),
            }
        }
    }

    if let Err(e) = backend.remove_bucket(RemoveBucketInput {}).await {
        return formatter.fail(&format!("Failed to remove bucket '{bucket}'"), &e);
    }

    if formatter.is_json() {
        formatter.json(&BucketOutput {
            status: "success",
            bucket,
            blobs_removed,
        });
    } else {
        formatter.success(&format!("Bucket '{bucket}' removed"));
    }
    ExitCode::Success
}
