use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ExecutionMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    /// Every planned line produced a response artifact.
    Complete,
    /// Some lines failed; the project still counts toward the quota.
    Incomplete,
    /// The project could not be opened or crashed unrecoverably.
    Failed,
    /// Skipped by the quota or the resume record.
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectOutcome {
    pub name: String,
    pub status: ProjectStatus,
    /// Lines planned for this project: `min(prompt_lines, remaining quota)`.
    pub planned_lines: u32,
    /// Lines that produced a complete response.
    pub realized_lines: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub execution_mode: ExecutionMode,
    pub cwe: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub projects: Vec<ProjectOutcome>,
    pub total_files_processed: u32,
    pub failures: Vec<String>,
}

impl RunSummary {
    pub fn elapsed_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }

    pub fn completed_count(&self) -> usize {
        self.projects.iter().filter(|p| p.status == ProjectStatus::Complete).count()
    }

    pub fn failed_count(&self) -> usize {
        self.projects.iter().filter(|p| p.status == ProjectStatus::Failed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counters() {
        let summary = RunSummary {
            execution_mode: ExecutionMode::As,
            cwe: Some("327".into()),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            projects: vec![
                ProjectOutcome {
                    name: "P1".into(),
                    status: ProjectStatus::Complete,
                    planned_lines: 5,
                    realized_lines: 5,
                    message: None,
                },
                ProjectOutcome {
                    name: "P2".into(),
                    status: ProjectStatus::Failed,
                    planned_lines: 5,
                    realized_lines: 0,
                    message: Some("IDE open failed".into()),
                },
            ],
            total_files_processed: 10,
            failures: vec!["P2: IDE open failed".into()],
        };
        assert_eq!(summary.completed_count(), 1);
        assert_eq!(summary.failed_count(), 1);
    }
}
