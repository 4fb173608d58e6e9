//! check command - Run the conformance suite against the configured backend
//!
//! Every check writes under its own key prefix and cleans up after itself,
//! so running against a shared bucket only touches `--prefix`.

use clap::Args;
use serde::Serialize;

use blobkit_core::multipart::MIN_PART_SIZE;
use blobkit_core::{Capabilities, Check, CheckReport, Suite};

use super::open_backend;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, ProgressBar, report_table};

/// Run the conformance suite
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Key prefix the checks write under
    #[arg(long, default_value = "blobkit-conformance/")]
    pub prefix: String,

    /// Size of non-final multipart parts
    #[arg(long, default_value_t = MIN_PART_SIZE)]
    pub part_size: u64,

    /// Run only the named checks (repeatable)
    #[arg(long)]
    pub only: Vec<Check>,
}

#[derive(Debug, Serialize)]
struct CheckOutput {
    capabilities: Capabilities,
    passed: usize,
    failed: usize,
    checks: Vec<CheckReport>,
}

/// Execute the check command
pub async fn execute(args: CheckArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    if args.prefix.is_empty() {
        formatter.error("--prefix must not be empty");
        return ExitCode::UsageError;
    }

    let session = match open_backend(&formatter).await {
        Ok(session) => session,
        Err(code) => return code,
    };
    let backend = session.backend.as_ref();

    let capabilities = match backend.capabilities().await {
        Ok(caps) => caps,
        Err(e) => return formatter.fail("Failed to read capabilities", &e),
    };

    let suite = Suite::new(&args.prefix)
        .with_part_size(args.part_size)
        .with_bucket(session.bucket());
    let checks = if args.only.is_empty() {
        Check::ALL.to_vec()
    } else {
        args.only.clone()
    };

    let progress = ProgressBar::spinner(formatter.config(), "running checks");
    let mut reports = Vec::with_capacity(checks.len());
    for check in checks {
        progress.set_message(&format!("running {check}"));
        reports.push(suite.run(backend, check).await);
    }
    progress.finish_and_clear();

    let failed = reports.iter().filter(|r| !r.passed()).count();
    let passed = reports.len() - failed;

    if formatter.is_json() {
        formatter.json(&CheckOutput {
            capabilities,
            passed,
            failed,
            checks: reports,
        });
    } else {
        formatter.println(&format!("Backend: {capabilities}"));
        formatter.println(&report_table(&reports, formatter.colors_enabled()).to_string());
        if failed == 0 {
            formatter.success(&format!("All {passed} checks passed"));
        } else {
            formatter.error(&format!("{failed} of {} checks failed", reports.len()));
        }
    }

    if failed == 0 {
        ExitCode::Success
    } else {
        ExitCode::GeneralError
    }
}
