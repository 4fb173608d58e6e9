//! caps command - Show backend capabilities

use super::open_backend;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Execute the caps command
pub async fn execute(output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let session = match open_backend(&formatter).await {
        Ok(session) => session,
        Err(code) => return code,
    };

    match session.backend.capabilities().await {
        Ok(caps) => {
            formatter.output(&caps);
            ExitCode::Success
        }
        Err(e) => formatter.fail("Failed to read capabilities", &e),
    }
}
