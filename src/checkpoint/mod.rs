//! Atomic, versioned persistence of execution progress.
//!
//! One JSON document, rewritten via write-to-tmp + rename at every
//! significant progress event. A version mismatch or parse error is
//! treated as "no checkpoint", never as a fatal condition.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ExecutionMode, Settings};
use crate::errors::GoadError;
use crate::paths::phase_dir_name;

pub const CHECKPOINT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    InProgress,
    Completed,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Progress {
    pub project_index: usize,
    pub project_name: String,
    pub round: u32,
    pub line: usize,
    pub phase: u8,
    pub completed_projects: Vec<String>,
    pub total_files_processed: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub execution_mode: ExecutionMode,
    pub settings: Settings,
    pub project_list: Vec<String>,
    pub progress: Progress,
    pub status: CheckpointStatus,
}

/// Where a resumed run should pick up.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeInfo {
    pub settings: Settings,
    pub project_list: Vec<String>,
    pub project_index: usize,
    pub project_name: String,
    pub round: u32,
    pub line: usize,
    pub phase: u8,
    pub completed_projects: Vec<String>,
    pub total_files_processed: u32,
}

pub struct CheckpointManager {
    path: PathBuf,
    current: Option<Checkpoint>,
}

impl CheckpointManager {
    pub fn new(path: PathBuf) -> Self {
        Self { path, current: None }
    }

    pub fn create_checkpoint(
        &mut self,
        settings: &Settings,
        project_list: Vec<String>,
    ) -> Result<(), GoadError> {
        let now = Utc::now();
        self.current = Some(Checkpoint {
            version: CHECKPOINT_VERSION.to_string(),
            created_at: now,
            updated_at: now,
            execution_mode: settings.execution_mode,
            settings: settings.clone(),
            project_list,
            progress: Progress::default(),
            status: CheckpointStatus::InProgress,
        });
        self.save()
    }

    /// Update the progress record and persist. Fields left as `None`
    /// keep their previous values.
    #[allow(clippy::too_many_arguments)]
    pub fn update_progress(
        &mut self,
        project_index: Option<usize>,
        project_name: Option<&str>,
        round: Option<u32>,
        line: Option<usize>,
        phase: Option<u8>,
        completed_project: Option<&str>,
        total_files_processed: Option<u32>,
    ) -> Result<(), GoadError> {
        let Some(checkpoint) = self.current.as_mut() else {
            return Err(GoadError::Checkpoint("No active checkpoint to update".into()));
        };
        let progress = &mut checkpoint.progress;
        if let Some(v) = project_index {
            progress.project_index = v;
        }
        if let Some(v) = project_name {
            progress.project_name = v.to_string();
        }
        if let Some(v) = round {
            progress.round = v;
        }
        if let Some(v) = line {
            progress.line = v;
        }
        if let Some(v) = phase {
            progress.phase = v;
        }
        if let Some(v) = completed_project {
            if !progress.completed_projects.iter().any(|p| p == v) {
                progress.completed_projects.push(v.to_string());
            }
        }
        if let Some(v) = total_files_processed {
            progress.total_files_processed = v;
        }
        self.save()
    }

    pub fn mark_completed(&mut self) -> Result<(), GoadError> {
        if let Some(checkpoint) = self.current.as_mut() {
            checkpoint.status = CheckpointStatus::Completed;
        }
        self.save()
    }

    pub fn mark_interrupted(&mut self) -> Result<(), GoadError> {
        if let Some(checkpoint) = self.current.as_mut() {
            checkpoint.status = CheckpointStatus::Interrupted;
        }
        self.save()
    }

    fn save(&mut self) -> Result<(), GoadError> {
        let Some(checkpoint) = self.current.as_mut() else {
            return Ok(());
        };
        checkpoint.updated_at = Utc::now();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(checkpoint)?;
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "Checkpoint saved");
        Ok(())
    }

    /// Load the on-disk checkpoint. Corrupt JSON or a version mismatch
    /// yields None.
    pub fn load_checkpoint(&self) -> Option<Checkpoint> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        let checkpoint: Checkpoint = match serde_json::from_str(&content) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Corrupt checkpoint ignored");
                return None;
            }
        };
        if checkpoint.version != CHECKPOINT_VERSION {
            warn!(
                found = %checkpoint.version,
                expected = CHECKPOINT_VERSION,
                "Checkpoint version mismatch — ignored"
            );
            return None;
        }
        Some(checkpoint)
    }

    pub fn has_resumable_checkpoint(&self) -> bool {
        self.load_checkpoint()
            .map(|c| matches!(c.status, CheckpointStatus::InProgress | CheckpointStatus::Interrupted))
            .unwrap_or(false)
    }

    pub fn resume_info(&self) -> Option<ResumeInfo> {
        let checkpoint = self.load_checkpoint()?;
        if checkpoint.status == CheckpointStatus::Completed {
            return None;
        }
        Some(ResumeInfo {
            settings: checkpoint.settings,
            project_list: checkpoint.project_list,
            project_index: checkpoint.progress.project_index,
            project_name: checkpoint.progress.project_name,
            round: checkpoint.progress.round,
            line: checkpoint.progress.line,
            phase: checkpoint.progress.phase,
            completed_projects: checkpoint.progress.completed_projects,
            total_files_processed: checkpoint.progress.total_files_processed,
        })
    }

    pub fn clear(&mut self) -> Result<(), GoadError> {
        self.current = None;
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            info!(path = %self.path.display(), "Checkpoint cleared");
        }
        Ok(())
    }

    pub fn total_files_processed(&self) -> u32 {
        self.current
            .as_ref()
            .map(|c| c.progress.total_files_processed)
            .unwrap_or(0)
    }
}

/// Fallback when no checkpoint exists: infer the resume point from the
/// response artifacts already on disk. A round counts as complete when
/// its file count reaches the project's prompt-line count.
pub fn detect_progress_from_output(
    success_dir: &Path,
    prompt_line_count: usize,
) -> Option<(u32, usize)> {
    if !success_dir.exists() || prompt_line_count == 0 {
        return None;
    }
    let round_re = Regex::new(r"^第(\d+)輪$").ok()?;
    let line_re = Regex::new(r"_第(\d+)行\.md$").ok()?;

    let mut best: Option<(u32, usize)> = None;
    for entry in std::fs::read_dir(success_dir).ok()? {
        let entry = entry.ok()?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(cap) = round_re.captures(&name) else {
            continue;
        };
        let round: u32 = cap[1].parse().ok()?;

        let mut max_line = 0usize;
        let mut file_count = 0usize;
        // Responses sit either directly in the round directory or in
        // per-phase subdirectories (第N道).
        let mut dirs = vec![entry.path()];
        for phase in 1..=2u8 {
            let phase_dir = entry.path().join(phase_dir_name(phase));
            if phase_dir.exists() {
                dirs.push(phase_dir);
            }
        }
        for dir in dirs {
            let Ok(read) = std::fs::read_dir(&dir) else {
                continue;
            };
            for file in read.flatten() {
                let file_name = file.file_name().to_string_lossy().to_string();
                if let Some(line_cap) = line_re.captures(&file_name) {
                    file_count += 1;
                    if let Ok(line) = line_cap[1].parse::<usize>() {
                        max_line = max_line.max(line);
                    }
                }
            }
        }

        let candidate = if file_count >= prompt_line_count {
            // Round finished; resume at the next one.
            (round + 1, 0)
        } else {
            (round, max_line)
        };
        if best.map(|b| candidate > b).unwrap_or(true) {
            best = Some(candidate);
        }
    }
    if best.is_some() {
        info!(dir = %success_dir.display(), resume = ?best, "Inferred progress from output artifacts");
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &Path) -> CheckpointManager {
        CheckpointManager::new(dir.join("checkpoints/execution_checkpoint.json"))
    }

    #[test]
    fn test_create_update_complete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path());
        let settings = Settings::default();
        mgr.create_checkpoint(&settings, vec!["P1".into(), "P2".into()]).unwrap();
        mgr.update_progress(Some(0), Some("P1"), Some(2), Some(3), Some(1), None, Some(3)).unwrap();

        let loaded = mgr.load_checkpoint().unwrap();
        assert_eq!(loaded.status, CheckpointStatus::InProgress);
        assert_eq!(loaded.progress.round, 2);
        assert_eq!(loaded.progress.line, 3);
        // The settings snapshot round-trips bit-exact.
        assert_eq!(loaded.settings, settings);

        mgr.mark_completed().unwrap();
        let done = mgr.load_checkpoint().unwrap();
        assert_eq!(done.status, CheckpointStatus::Completed);
        assert!(!mgr.has_resumable_checkpoint());
        assert!(mgr.resume_info().is_none());
    }

    #[test]
    fn test_interrupted_checkpoint_is_resumable() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path());
        mgr.create_checkpoint(&Settings::default(), vec!["P1".into()]).unwrap();
        mgr.update_progress(Some(0), Some("P1"), Some(1), Some(2), Some(2), None, Some(2)).unwrap();
        mgr.mark_interrupted().unwrap();

        assert!(mgr.has_resumable_checkpoint());
        let info = mgr.resume_info().unwrap();
        assert_eq!(info.project_name, "P1");
        assert_eq!(info.line, 2);
        assert_eq!(info.total_files_processed, 2);
    }

    #[test]
    fn test_corrupt_checkpoint_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints/execution_checkpoint.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        let mgr = CheckpointManager::new(path);
        assert!(mgr.load_checkpoint().is_none());
        assert!(!mgr.has_resumable_checkpoint());
    }

    #[test]
    fn test_version_mismatch_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path());
        mgr.create_checkpoint(&Settings::default(), vec![]).unwrap();
        let path = dir.path().join("checkpoints/execution_checkpoint.json");
        let content = std::fs::read_to_string(&path).unwrap().replace("\"1.0\"", "\"0.9\"");
        std::fs::write(&path, content).unwrap();
        assert!(mgr.load_checkpoint().is_none());
    }

    #[test]
    fn test_checkpoint_file_is_always_parseable_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path());
        mgr.create_checkpoint(&Settings::default(), vec!["P1".into()]).unwrap();
        for line in 1..=5 {
            mgr.update_progress(None, None, Some(1), Some(line), None, None, None).unwrap();
            let raw = std::fs::read_to_string(
                dir.path().join("checkpoints/execution_checkpoint.json"),
            )
            .unwrap();
            assert!(serde_json::from_str::<serde_json::Value>(&raw).is_ok());
        }
    }

    #[test]
    fn test_detect_progress_from_output() {
        let dir = tempfile::tempdir().unwrap();
        let success = dir.path().join("Success/demo");
        // Round 1 complete (2 of 2 lines), round 2 stopped after line 1.
        std::fs::create_dir_all(success.join("第1輪")).unwrap();
        std::fs::write(success.join("第1輪/20250101_第1行.md"), "a").unwrap();
        std::fs::write(success.join("第1輪/20250101_第2行.md"), "b").unwrap();
        std::fs::create_dir_all(success.join("第2輪/第1道")).unwrap();
        std::fs::write(success.join("第2輪/第1道/20250102_a.py_f_第1行.md"), "c").unwrap();

        let resume = detect_progress_from_output(&success, 2);
        assert_eq!(resume, Some((2, 1)));
    }

    #[test]
    fn test_detect_progress_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_progress_from_output(&dir.path().join("missing"), 3), None);
    }
}
