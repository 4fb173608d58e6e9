//! Output formatting utilities
//!
//! Formatters for human-readable and JSON output, progress bars and the
//! conformance report table.

mod formatter;
mod progress;
mod report;

pub use formatter::Formatter;
pub use progress::ProgressBar;
pub use report::report_table;

/// Output configuration derived from CLI flags
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    /// Use JSON output format
    pub json: bool,
    /// Disable colored output
    pub no_color: bool,
    /// Disable progress bar
    pub no_progress: bool,
    /// Suppress non-error output
    pub quiet: bool,
}
