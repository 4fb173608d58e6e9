//! Table rendering for conformance reports

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};

use blobkit_core::CheckReport;

/// Render check outcomes as a table, one row per check
pub fn report_table(reports: &[CheckReport], colors: bool) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Check", "Result", "Time", "Detail"]);

    for report in reports {
        let (label, color) = if report.passed() {
            ("pass", Color::Green)
        } else {
            ("FAIL", Color::Red)
        };
        let result = if colors {
            Cell::new(label).fg(color)
        } else {
            Cell::new(label)
        };

        table.add_row(vec![
            Cell::new(report.check.name()),
            result,
            Cell::new(format!("{} ms", report.elapsed.as_millis())),
            Cell::new(report.failure.as_deref().unwrap_or("")),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobkit_core::Check;
    use std::time::Duration;

    #[test]
    fn test_report_table_rows() {
        let reports = vec![
            CheckReport {
                check: Check::PutGet,
                elapsed: Duration::from_millis(3),
                failure: None,
            },
            CheckReport {
                check: Check::MultipartDoubleAbort,
                elapsed: Duration::from_millis(12),
                failure: Some("second abort succeeded".into()),
            },
        ];

        let rendered = report_table(&reports, false).to_string();
        assert!(rendered.contains("put-get"));
        assert!(rendered.contains("pass"));
        assert!(rendered.contains("FAIL"));
        assert!(rendered.contains("second abort succeeded"));
    }
}
