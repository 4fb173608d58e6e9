//! expire command - Abort abandoned multipart uploads
//!
//! Uploads older than the threshold are aborted and their parts reclaimed.
//! Without `--older-than` the configured `multipart.expire_after_secs` applies.

use std::time::Duration;

use clap::Args;
use serde::Serialize;

use blobkit_core::MultipartExpireInput;

use super::open_backend;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Abort abandoned multipart uploads
#[derive(Args, Debug)]
pub struct ExpireArgs {
    /// Only consider uploads whose key starts with this prefix
    #[arg(long)]
    pub prefix: Option<String>,

    /// Age threshold, e.g. 3600, 90m or 2d
    #[arg(long, value_parser = parse_age)]
    pub older_than: Option<Duration>,
}

#[derive(Debug, Serialize)]
struct ExpireOutput {
    expired: Vec<String>,
    total: usize,
}

/// Execute the expire command
pub async fn execute(args: ExpireArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let session = match open_backend(&formatter).await {
        Ok(session) => session,
        Err(code) => return code,
    };

    let input = MultipartExpireInput {
        older_than: args.older_than,
        prefix: args.prefix,
    };
    let out = match session.backend.multipart_expire(input).await {
        Ok(out) => out,
        Err(e) => return formatter.fail("Failed to expire uploads", &e),
    };

    let total = out.expired.len();
    if formatter.is_json() {
        formatter.json(&ExpireOutput {
            expired: out.expired,
            total,
        });
    } else {
        for upload_id in &out.expired {
            formatter.println(&format!("Aborted: {upload_id}"));
        }
        formatter.success(&format!("Expired {total} uploads"));
    }
    ExitCode::Success
}

/// Parse an age given in seconds or as a friendly duration
fn parse_age(s: &str) -> Result<Duration, String> {
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let span: jiff::SignedDuration = s.parse().map_err(|e| format!("invalid age '{s}': {e}"))?;
    Duration::try_from(span).map_err(|_| format!("age must not be negative: '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_age_seconds() {
        assert_eq!(parse_age("3600").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_age("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_age_friendly() {
        assert_eq!(parse_age("90m").unwrap(), Duration::from_secs(90 * 60));
        assert_eq!(parse_age("2h 30m").unwrap(), Duration::from_secs(9000));
    }

    #[test]
    fn test_parse_age_rejects_garbage() {
        assert!(parse_age("soon").is_err());
        assert!(parse_age("-5m").is_err());
    }
}
