use collector_core::domain::{ChannelReport, CollectionResult};
use collector_core::ports::{ReportWriter, Result};
use collector_core::utils::format_timestamp;
use std::fs;
use std::path::{Path, PathBuf};

/// Markdown writer adapter for run summaries
pub struct MarkdownReportWriter {
    output_path: PathBuf,
}

impl MarkdownReportWriter {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

/// Escapes characters that would break a table cell
fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

fn format_row(report: &ChannelReport) -> String {
    format!(
        "| r/{} | {} | {} | {} | {} | {} | {} | {} |\n",
        escape_cell(&report.channel),
        report.fetched,
        report.written,
        report.skipped.malformed,
        report.skipped.duplicate,
        report.skipped.outside_window,
        report.pages,
        escape_cell(&report.status.to_string()),
    )
}

/// Renders a run summary: headline counts, then one table row per channel.
pub fn format_report(result: &CollectionResult) -> String {
    let mut output = String::new();
    output.push_str("# Collection run\n\n");
    output.push_str(&format!(
        "*{} → {}*\n\n",
        format_timestamp(&result.started_at),
        format_timestamp(&result.finished_at)
    ));
    output.push_str(&format!(
        "**{} fetched · {} written · {} skipped**\n\n",
        result.fetched,
        result.written,
        result.skipped.total()
    ));

    if result.channels.is_empty() {
        output.push_str("*[No channels]*\n");
        return output;
    }

    output.push_str(
        "| Channel | Fetched | Written | Malformed | Duplicate | Outside window | Pages | Status |\n",
    );
    output.push_str("|---|---:|---:|---:|---:|---:|---:|---|\n");
    for report in &result.channels {
        output.push_str(&format_row(report));
    }

    let failed: Vec<&ChannelReport> = result.failed_channels().collect();
    if !failed.is_empty() {
        output.push_str(&format!(
            "\n**Partial failure:** {} of {} channels did not finish.\n",
            failed.len(),
            result.channels.len()
        ));
    }

    output
}

impl ReportWriter for MarkdownReportWriter {
    fn write(&self, result: &CollectionResult) -> Result<()> {
        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.output_path, format_report(result))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use collector_core::domain::{ChannelStatus, SkipReason};

    fn sample() -> CollectionResult {
        let started = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap();
        let mut result = CollectionResult::new(started);

        let mut depression = ChannelReport::new("depression");
        depression.fetched = 2;
        depression.written = 2;
        depression.pages = 1;
        result.add_channel(depression);

        let mut psychology = ChannelReport::new("psychology");
        psychology.fetched = 2;
        psychology.written = 1;
        psychology.pages = 1;
        psychology.skipped.record(SkipReason::Malformed);
        result.add_channel(psychology);

        result.finished_at = Utc.with_ymd_and_hms(2025, 5, 1, 9, 2, 0).unwrap();
        result
    }

    #[test]
    fn test_format_report_counts() {
        let report = format_report(&sample());
        assert!(report.contains("2025-05-01 09:00:00 UTC → 2025-05-01 09:02:00 UTC"));
        assert!(report.contains("**4 fetched · 3 written · 1 skipped**"));
        assert!(report.contains("| r/depression | 2 | 2 | 0 | 0 | 0 | 1 | complete |"));
        assert!(report.contains("| r/psychology | 2 | 1 | 1 | 0 | 0 | 1 | complete |"));
        assert!(!report.contains("Partial failure"));
    }

    #[test]
    fn test_format_report_partial_failure() {
        let mut result = sample();
        let mut failed = ChannelReport::new("mentalhealth");
        failed.status = ChannelStatus::Partial {
            reason: "upstream said a|b\nthen stopped".into(),
        };
        result.add_channel(failed);

        let report = format_report(&result);
        assert!(report.contains("partial failure: upstream said a\\|b then stopped"));
        assert!(report.contains("**Partial failure:** 1 of 3 channels did not finish."));
    }

    #[test]
    fn test_format_report_no_channels() {
        let result = CollectionResult::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert!(format_report(&result).contains("*[No channels]*"));
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MarkdownReportWriter::new(dir.path().join("reports").join("run.md"));
        writer.write(&sample()).unwrap();

        let written = fs::read_to_string(writer.output_path()).unwrap();
        assert_eq!(written, format_report(&sample()));
    }
}
