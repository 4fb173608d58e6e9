//! cat command - Write blob contents to stdout

use std::io::Write;

use clap::Args;

use blobkit_core::{Error, GetBlobInput};

use super::open_backend;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Write blob contents to stdout
#[derive(Args, Debug)]
pub struct CatArgs {
    /// Blob key
    pub key: String,

    /// First byte to read
    #[arg(long, default_value = "0")]
    pub offset: u64,

    /// Number of bytes to read (default: to the end)
    #[arg(long)]
    pub length: Option<u64>,

    /// Only read if the blob still has this ETag
    #[arg(long)]
    pub if_match: Option<String>,
}

impl CatArgs {
    fn to_input(&self) -> GetBlobInput {
        GetBlobInput {
            key: self.key.clone(),
            start: self.offset,
            count: self.length.unwrap_or(0),
            if_match: self.if_match.clone(),
        }
    }
}

/// Execute the cat command
pub async fn execute(args: CatArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    if args.length == Some(0) {
        formatter.error("--length must be greater than zero");
        return ExitCode::UsageError;
    }

    let session = match open_backend(&formatter).await {
        Ok(session) => session,
        Err(code) => return code,
    };

    let blob = match session.backend.get_blob(args.to_input()).await {
        Ok(blob) => blob,
        Err(e) => return formatter.fail(&format!("Failed to read '{}'", args.key), &e),
    };

    let mut stdout = std::io::stdout().lock();
    if let Err(e) = stdout.write_all(&blob.body).and_then(|()| stdout.flush()) {
        return formatter.fail("Failed to write to stdout", &Error::from(e));
    }
    ExitCode::Success
}
