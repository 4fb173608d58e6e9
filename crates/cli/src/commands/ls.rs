//! ls command - List blobs
//!
//! Lists the configured bucket under a prefix, one directory level at a time
//! unless `--recursive` is given.

use clap::Args;
use serde::Serialize;

use blobkit_core::BlobItem;

use super::{list_all, open_backend};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// List blobs under a prefix
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Key prefix to list under
    #[arg(default_value = "")]
    pub prefix: String,

    /// List recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Keys requested per page
    #[arg(long)]
    pub page_size: Option<u32>,

    /// Summarize output (show totals only)
    #[arg(long)]
    pub summarize: bool,
}

/// Output structure for ls command (JSON format)
#[derive(Debug, Serialize)]
struct LsOutput {
    prefixes: Vec<String>,
    items: Vec<BlobItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<Summary>,
}

#[derive(Debug, Serialize)]
struct Summary {
    total_blobs: usize,
    total_size_bytes: u64,
    total_size_human: String,
}

impl Summary {
    fn of(items: &[BlobItem]) -> Self {
        let total_size_bytes = items.iter().map(|item| item.size).sum();
        Self {
            total_blobs: items.len(),
            total_size_bytes,
            total_size_human: humansize::format_size(total_size_bytes, humansize::BINARY),
        }
    }
}

/// Execute the ls command
pub async fn execute(args: LsArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let session = match open_backend(&formatter).await {
        Ok(session) => session,
        Err(code) => return code,
    };

    let delimiter = (!args.recursive).then_some("/");
    let (prefixes, items) =
        match list_all(session.backend.as_ref(), &args.prefix, delimiter, args.page_size).await {
            Ok(listing) => listing,
            Err(e) => return formatter.fail("Failed to list blobs", &e),
        };

    if formatter.is_json() {
        let summary = args.summarize.then(|| Summary::of(&items));
        formatter.json(&LsOutput {
            prefixes,
            items,
            summary,
        });
        return ExitCode::Success;
    }

    if !args.summarize {
        for prefix in &prefixes {
            formatter.println(&prefix_line(prefix));
        }
        for item in &items {
            formatter.println(&item_line(item));
        }
    }

    if args.summarize || items.len() > 1 {
        let summary = Summary::of(&items);
        formatter.println(&format!(
            "\nTotal: {} blobs, {}",
            summary.total_blobs, summary.total_size_human
        ));
    }
    ExitCode::Success
}

fn prefix_line(prefix: &str) -> String {
    format!("[{:>19}] {:>9} {prefix}", "", "PRE")
}

fn item_line(item: &BlobItem) -> String {
    let date = item
        .last_modified
        .map(|ts| ts.strftime("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    format!("[{date:>19}] {:>9} {}", item.size_human(), item.key)
}
