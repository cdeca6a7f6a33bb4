use crate::pipeline::state::{ProjectStatus, RunSummary};

fn status_label(status: ProjectStatus) -> &'static str {
    match status {
        ProjectStatus::Complete => "complete",
        ProjectStatus::Incomplete => "incomplete",
        ProjectStatus::Failed => "failed",
        ProjectStatus::Skipped => "skipped",
    }
}

/// Human-readable run summary written next to the JSON report.
pub fn format_run_summary_text(summary: &RunSummary) -> String {
    let mut text = String::new();
    text.push_str("=== Automation Report ===\n");
    text.push_str(&format!("Mode: {}\n", summary.execution_mode));
    if let Some(cwe) = &summary.cwe {
        text.push_str(&format!("CWE: CWE-{}\n", cwe));
    }
    text.push_str(&format!(
        "Started: {}\nFinished: {}\nElapsed: {}s\n",
        summary.started_at.to_rfc3339(),
        summary.finished_at.to_rfc3339(),
        summary.elapsed_secs()
    ));
    text.push_str(&format!("Total files processed: {}\n\n", summary.total_files_processed));

    text.push_str("Projects:\n");
    for project in &summary.projects {
        text.push_str(&format!(
            "  {} — {} ({} planned / {} realized)",
            project.name,
            status_label(project.status),
            project.planned_lines,
            project.realized_lines,
        ));
        if let Some(msg) = &project.message {
            text.push_str(&format!(" — {}", msg));
        }
        text.push('\n');
    }

    if !summary.failures.is_empty() {
        text.push_str("\nFailures:\n");
        for failure in &summary.failures {
            text.push_str(&format!("  {}\n", failure));
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionMode;
    use crate::pipeline::state::ProjectOutcome;
    use chrono::Utc;

    #[test]
    fn test_format_includes_projects_and_failures() {
        let summary = RunSummary {
            execution_mode: ExecutionMode::As,
            cwe: Some("327".into()),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            projects: vec![ProjectOutcome {
                name: "demo".into(),
                status: ProjectStatus::Complete,
                planned_lines: 3,
                realized_lines: 3,
                message: None,
            }],
            total_files_processed: 3,
            failures: vec!["other: IDE open failed".into()],
        };
        let text = format_run_summary_text(&summary);
        assert!(text.contains("CWE-327"));
        assert!(text.contains("demo — complete (3 planned / 3 realized)"));
        assert!(text.contains("other: IDE open failed"));
    }
}
