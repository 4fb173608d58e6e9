//! stat command - Show blob metadata
//!
//! Displays what a head request reports about one blob.

use clap::Args;
use serde::Serialize;

use blobkit_core::{HeadBlobInput, HeadBlobOutput, Metadata};

use super::open_backend;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Show blob metadata
#[derive(Args, Debug)]
pub struct StatArgs {
    /// Blob key
    pub key: String,
}

#[derive(Debug, Serialize)]
struct StatOutput {
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_modified: Option<String>,
    size_bytes: u64,
    size_human: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage_class: Option<String>,
    #[serde(skip_serializing_if = "Metadata::is_empty")]
    metadata: Metadata,
    is_dir_blob: bool,
}

impl From<HeadBlobOutput> for StatOutput {
    fn from(head: HeadBlobOutput) -> Self {
        let size_human = head.item.size_human();
        Self {
            key: head.item.key,
            last_modified: head.item.last_modified.map(|ts| ts.to_string()),
            size_bytes: head.item.size,
            size_human,
            etag: head.item.etag,
            content_type: head.content_type,
            storage_class: head.item.storage_class,
            metadata: head.item.metadata,
            is_dir_blob: head.is_dir_blob,
        }
    }
}

/// Execute the stat command
pub async fn execute(args: StatArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let session = match open_backend(&formatter).await {
        Ok(session) => session,
        Err(code) => return code,
    };

    let head = match session.backend.head_blob(HeadBlobInput::new(&args.key)).await {
        Ok(head) => head,
        Err(e) => return formatter.fail(&format!("Failed to stat '{}'", args.key), &e),
    };

    let output = StatOutput::from(head);
    if formatter.is_json() {
        formatter.json(&output);
    } else {
        for line in human_lines(&output) {
            formatter.println(&line);
        }
    }
    ExitCode::Success
}

fn human_lines(output: &StatOutput) -> Vec<String> {
    let mut lines = vec![format!("Name      : {}", output.key)];
    if let Some(modified) = &output.last_modified {
        lines.push(format!("Date      : {modified}"));
    }
    lines.push(format!(
        "Size      : {} ({} bytes)",
        output.size_human, output.size_bytes
    ));
    if let Some(etag) = &output.etag {
        lines.push(format!("ETag      : {etag}"));
    }
    if let Some(ct) = &output.content_type {
        lines.push(format!("Type      : {ct}"));
    }
    if let Some(class) = &output.storage_class {
        lines.push(format!("Class     : {class}"));
    }
    if output.is_dir_blob {
        lines.push("Directory : yes".to_string());
    }
    for (key, value) in &output.metadata {
        lines.push(format!("Meta      : {key}={value}"));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobkit_core::BlobItem;

    #[test]
    fn test_stat_output_from_head() {
        let mut item = BlobItem::new("docs/readme.md", 10);
        item.etag = Some("abc".into());
        item.metadata.insert("origin".into(), "cli".into());
        let head = HeadBlobOutput {
            item,
            content_type: Some("text/markdown".into()),
            ..Default::default()
        };

        let output = StatOutput::from(head);
        let lines = human_lines(&output);
        assert_eq!(lines[0], "Name      : docs/readme.md");
        assert!(lines.contains(&"Size      : 10 B (10 bytes)".to_string()));
        assert!(lines.contains(&"ETag      : abc".to_string()));
        assert!(lines.contains(&"Type      : text/markdown".to_string()));
        assert!(lines.contains(&"Meta      : origin=cli".to_string()));
    }

    #[test]
    fn test_stat_json_skips_empty_metadata() {
        let output = StatOutput::from(HeadBlobOutput {
            item: BlobItem::new("k", 0),
            ..Default::default()
        });
        let json = serde_json::to_value(&output).unwrap();
        assert!(json.get("metadata").is_none());
        assert_eq!(json["is_dir_blob"], false);
    }
}
