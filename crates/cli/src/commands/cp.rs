//! cp command - Copy a blob inside the bucket
//!
//! The copy happens provider-side; no data passes through the CLI.

use clap::Args;
use serde::Serialize;

use blobkit_core::CopyBlobInput;

use super::{open_backend, parse_meta, to_metadata};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Copy a blob
#[derive(Args, Debug)]
pub struct CpArgs {
    /// Source key
    pub source: String,

    /// Destination key
    pub destination: String,

    /// Only copy if the source still has this ETag
    #[arg(long)]
    pub if_match: Option<String>,

    /// Replace user metadata with key=value pairs (repeatable)
    #[arg(long = "meta", value_parser = parse_meta)]
    pub meta: Vec<(String, String)>,

    /// Storage class for the destination
    #[arg(long)]
    pub storage_class: Option<String>,
}

impl CpArgs {
    fn to_input(&self) -> CopyBlobInput {
        CopyBlobInput {
            source: self.source.clone(),
            destination: self.destination.clone(),
            size: None,
            etag: self.if_match.clone(),
            metadata: (!self.meta.is_empty()).then(|| to_metadata(&self.meta)),
            storage_class: self.storage_class.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CpOutput {
    status: &'static str,
    source: String,
    target: String,
}

/// Execute the cp command
pub async fn execute(args: CpArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    if args.source == args.destination && args.meta.is_empty() && args.storage_class.is_none() {
        formatter.error("Source and destination are the same blob");
        return ExitCode::UsageError;
    }

    let session = match open_backend(&formatter).await {
        Ok(session) => session,
        Err(code) => return code,
    };

    if let Err(e) = session.backend.copy_blob(args.to_input()).await {
        return formatter.fail(&format!("Failed to copy '{}'", args.source), &e);
    }

    if formatter.is_json() {
        formatter.json(&CpOutput {
            status: "success",
            source: args.source,
            target: args.destination,
        });
    } else {
        formatter.success(&format!("Copied {} -> {}", args.source, args.destination));
    }
    ExitCode::Success
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cp_keeps_metadata_by_default() {
        let args = CpArgs {
            source: "a".into(),
            destination: "b".into(),
            if_match: Some("etag-1".into()),
            meta: Vec::new(),
            storage_class: None,
        };
        let input = args.to_input();
        assert_eq!(input.etag.as_deref(), Some("etag-1"));
        assert!(input.metadata.is_none());
    }

    #[test]
    fn test_cp_replaces_metadata() {
        let args = CpArgs {
            source: "a".into(),
            destination: "b".into(),
            if_match: None,
            meta: vec![("origin".into(), "cli".into())],
            storage_class: Some("STANDARD_IA".into()),
        };
        let input = args.to_input();
        let metadata = input.metadata.unwrap();
        assert_eq!(metadata.get("origin").map(String::as_str), Some("cli"));
        assert_eq!(input.storage_class.as_deref(), Some("STANDARD_IA"));
    }
}
