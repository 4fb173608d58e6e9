//! put command - Upload a local file
//!
//! Small files go up in a single request. Anything larger than one part is
//! sent as a multipart upload: parts are added concurrently (sequentially
//! when the backend says it cannot take parallel parts) and committed in
//! part-number order. A failed upload is aborted so no parts are left behind.

use std::path::Path;

use clap::Args;
use futures::{StreamExt, TryStreamExt, stream};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use blobkit_core::multipart::{calculate_parts, part_byte_range};
use blobkit_core::{
    Capabilities, Error, MultipartBlobAddInput, MultipartBlobBeginInput,
    MultipartBlobCommitOutput, MultipartUpload, PutBlobInput, Result, StorageBackend,
};
use blobkit_s3::require_multipart_size;

use super::{open_backend, parse_meta, to_metadata};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, ProgressBar};

/// Upload a local file
#[derive(Args, Debug)]
pub struct PutArgs {
    /// Local file to upload, or - for stdin
    pub source: String,

    /// Destination key (a trailing / appends the file name)
    pub key: Option<String>,

    /// Content type (guessed from the file name when omitted)
    #[arg(long)]
    pub content_type: Option<String>,

    /// User metadata as key=value (repeatable)
    #[arg(long = "meta", value_parser = parse_meta)]
    pub meta: Vec<(String, String)>,

    /// Part size in bytes (overrides the configured size)
    #[arg(long)]
    pub part_size: Option<u64>,

    /// Concurrent part uploads (overrides the configured value)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Use a multipart upload even for small files
    #[arg(long)]
    pub multipart: bool,
}

#[derive(Debug, Serialize)]
struct PutOutput {
    status: &'static str,
    key: String,
    size_bytes: u64,
    size_human: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parts: Option<u32>,
}

/// Execute the put command
pub async fn execute(args: PutArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let key = match destination_key(&args.source, args.key.as_deref()) {
        Ok(key) => key,
        Err(message) => {
            formatter.error(&message);
            return ExitCode::UsageError;
        }
    };

    let data = match read_source(&args.source).await {
        Ok(data) => data,
        Err(e) => return formatter.fail(&format!("Failed to read {}", args.source), &e),
    };
    let size = data.len() as u64;

    let session = match open_backend(&formatter).await {
        Ok(session) => session,
        Err(code) => return code,
    };
    let backend = session.backend.as_ref();

    let mut config = session.config.multipart.to_config();
    if let Some(part_size) = args.part_size {
        config = config.part_size(part_size);
    }
    if let Some(concurrency) = args.concurrency {
        config = config.concurrency(concurrency);
    }
    let part_size = config.calculate_part_size(size);

    let content_type = args.content_type.clone().or_else(|| guess_content_type(&key));
    let metadata = to_metadata(&args.meta);

    if !args.multipart && size <= part_size {
        let input = PutBlobInput {
            key: key.clone(),
            metadata,
            content_type,
            dir_blob: false,
            body: data,
        };
        return match backend.put_blob(input).await {
            Ok(out) => {
                report(&formatter, key, size, out.etag, None);
                ExitCode::Success
            }
            Err(e) => formatter.fail(&format!("Failed to upload '{key}'"), &e),
        };
    }

    let capabilities = match backend.capabilities().await {
        Ok(caps) => caps,
        Err(e) => return formatter.fail("Failed to read backend capabilities", &e),
    };
    if let Err(e) = require_multipart_size(&capabilities, size) {
        return formatter.fail(&format!("Cannot upload '{key}'"), &e);
    }
    let concurrency = part_concurrency(&capabilities, config.concurrency);

    let begin = MultipartBlobBeginInput {
        key: key.clone(),
        metadata,
        content_type,
    };
    let progress = ProgressBar::new(formatter.config(), size);
    let result = upload_multipart(backend, begin, &data, part_size, concurrency, &progress).await;
    progress.finish_and_clear();

    match result {
        Ok((upload, out)) => {
            report(&formatter, key, size, out.etag, Some(upload.num_parts));
            ExitCode::Success
        }
        Err(e) => formatter.fail(&format!("Failed to upload '{key}'"), &e),
    }
}

/// Upload `data` as a multipart upload and commit it
///
/// On any failure after the upload was begun, the upload is aborted before
/// the error is returned.
pub async fn upload_multipart(
    backend: &dyn StorageBackend,
    begin: MultipartBlobBeginInput,
    data: &[u8],
    part_size: u64,
    concurrency: usize,
    progress: &ProgressBar,
) -> Result<(MultipartUpload, MultipartBlobCommitOutput)> {
    let mut upload = backend.multipart_blob_begin(begin).await?;
    debug!(key = %upload.key, upload_id = %upload.upload_id, "multipart upload begun");

    let result = add_parts(backend, &mut upload, data, part_size, concurrency, progress).await;
    let result = match result {
        Ok(()) => backend.multipart_blob_commit(&upload).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(out) => Ok((upload, out)),
        Err(e) => {
            if let Err(abort_err) = backend.multipart_blob_abort(&upload).await {
                warn!(upload_id = %upload.upload_id, error = %abort_err, "failed to abort upload");
            }
            Err(e)
        }
    }
}

/// Parts in flight at once; one when the backend needs them in sequence
fn part_concurrency(capabilities: &Capabilities, configured: usize) -> usize {
    if capabilities.no_parallel_multipart {
        1
    } else {
        configured.max(1)
    }
}

async fn add_parts(
    backend: &dyn StorageBackend,
    upload: &mut MultipartUpload,
    data: &[u8],
    part_size: u64,
    concurrency: usize,
    progress: &ProgressBar,
) -> Result<()> {
    let size = data.len() as u64;
    let parts = calculate_parts(size, part_size).max(1);
    let key = upload.key.clone();
    let upload_id = upload.upload_id.clone();

    let mut added = stream::iter(1..=parts)
        .map(|part_number| {
            let (start, end) = part_byte_range(part_number, part_size, size);
            let input = MultipartBlobAddInput {
                key: key.clone(),
                upload_id: upload_id.clone(),
                part_number,
                body: data[start as usize..end as usize].to_vec(),
                last: part_number == parts,
                offset: start,
            };
            async move {
                let out = backend.multipart_blob_add(input).await?;
                Ok::<_, Error>((part_number, end - start, out.part_id))
            }
        })
        .buffer_unordered(concurrency.max(1));

    while let Some((part_number, len, part_id)) = added.try_next().await? {
        upload.record_part(part_number, part_id);
        progress.inc(len);
    }
    Ok(())
}

fn report(formatter: &Formatter, key: String, size: u64, etag: Option<String>, parts: Option<u32>) {
    let output = PutOutput {
        status: "success",
        size_human: humansize::format_size(size, humansize::BINARY),
        key,
        size_bytes: size,
        etag,
        parts,
    };
    if formatter.is_json() {
        formatter.json(&output);
    } else {
        let via = match output.parts {
            Some(n) => format!(" in {n} parts"),
            None => String::new(),
        };
        formatter.success(&format!(
            "Uploaded {} ({}){via}",
            output.key, output.size_human
        ));
    }
}

/// Resolve the destination key from the source path and optional key
fn destination_key(source: &str, key: Option<&str>) -> std::result::Result<String, String> {
    let file_name = || {
        Path::new(source)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    };

    match key {
        Some(key) if key.ends_with('/') => {
            if source == "-" {
                return Err("A full key is required when reading from stdin".to_string());
            }
            file_name()
                .map(|name| format!("{key}{name}"))
                .ok_or_else(|| format!("Cannot derive a file name from '{source}'"))
        }
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ if source == "-" => Err("A destination key is required when reading from stdin".to_string()),
        _ => file_name().ok_or_else(|| format!("Cannot derive a file name from '{source}'")),
    }
}

async fn read_source(source: &str) -> Result<Vec<u8>> {
    if source == "-" {
        let mut data = Vec::new();
        tokio::io::stdin().read_to_end(&mut data).await?;
        Ok(data)
    } else {
        Ok(tokio::fs::read(source).await?)
    }
}

fn guess_content_type(key: &str) -> Option<String> {
    mime_guess::from_path(key)
        .first()
        .map(|mime| mime.essence_str().to_string())
}
