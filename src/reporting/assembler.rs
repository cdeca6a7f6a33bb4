use std::path::PathBuf;

use chrono::Local;
use tracing::info;

use crate::errors::GoadError;
use crate::paths::OutputLayout;
use crate::pipeline::state::RunSummary;

use super::formatter::format_run_summary_text;

/// Write the final automation report as JSON and TXT. Returns both
/// paths.
pub fn write_final_report(
    layout: &OutputLayout,
    summary: &RunSummary,
) -> Result<(PathBuf, PathBuf), GoadError> {
    let dir = layout.automation_report_dir();
    std::fs::create_dir_all(&dir)?;
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

    let json_path = dir.join(format!("automation_report_{}.json", timestamp));
    std::fs::write(&json_path, serde_json::to_string_pretty(summary)?)?;

    let txt_path = dir.join(format!("automation_report_{}.txt", timestamp));
    std::fs::write(&txt_path, format_run_summary_text(summary))?;

    info!(json = %json_path.display(), txt = %txt_path.display(), "Final report written");
    Ok((json_path, txt_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionMode;
    use chrono::Utc;

    #[test]
    fn test_report_files_written() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let summary = RunSummary {
            execution_mode: ExecutionMode::NonAs,
            cwe: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            projects: vec![],
            total_files_processed: 0,
            failures: vec![],
        };
        let (json_path, txt_path) = write_final_report(&layout, &summary).unwrap();
        assert!(json_path.exists());
        assert!(txt_path.exists());
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed["execution_mode"], "non_as");
    }
}
