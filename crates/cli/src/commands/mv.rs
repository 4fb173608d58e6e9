//! mv command - Rename a blob
//!
//! Renaming is not atomic on every provider; on S3 it is a copy followed by
//! a delete of the source.

use clap::Args;
use serde::Serialize;

use blobkit_core::RenameBlobInput;

use super::open_backend;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Rename a blob
#[derive(Args, Debug)]
pub struct MvArgs {
    /// Current key
    pub source: String,

    /// New key
    pub destination: String,
}

#[derive(Debug, Serialize)]
struct MvOutput {
    status: &'static str,
    source: String,
    target: String,
}

/// Execute the mv command
pub async fn execute(args: MvArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    if args.source == args.destination {
        formatter.error("Source and destination are the same blob");
        return ExitCode::UsageError;
    }

    let session = match open_backend(&formatter).await {
        Ok(session) => session,
        Err(code) => return code,
    };

    let input = RenameBlobInput {
        source: args.source.clone(),
        destination: args.destination.clone(),
    };
    if let Err(e) = session.backend.rename_blob(input).await {
        return formatter.fail(&format!("Failed to rename '{}'", args.source), &e);
    }

    if formatter.is_json() {
        formatter.json(&MvOutput {
            status: "success",
            source: args.source,
            target: args.destination,
        });
    } else {
        formatter.success(&format!("Renamed {} -> {}", args.source, args.destination));
    }
    ExitCode::Success
}
