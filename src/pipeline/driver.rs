//! Top-level experiment driver: scans projects, dispatches to the round
//! controllers, enforces the global file quota, and emits the final
//! report.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::checkpoint::{detect_progress_from_output, CheckpointManager, ResumeInfo};
use crate::config::{ExecutionMode, Settings};
use crate::errors::GoadError;
use crate::interact::AssistantSession;
use crate::models::{parse_prompt_file, Project, PromptLine};
use crate::paths::OutputLayout;
use crate::scanner::CweScanner;
use crate::surface::{IdeSurface, SaveAction};

use super::as_mode::AsModeController;
use super::non_as::ControlModeController;
use super::state::{ProjectOutcome, ProjectStatus, RunSummary};

pub struct Driver {
    layout: OutputLayout,
    settings: Settings,
    surface: Arc<dyn IdeSurface>,
    scanner: Arc<dyn CweScanner>,
    cancel: CancellationToken,
    checkpoint: CheckpointManager,
    session: AssistantSession,
}

impl Driver {
    pub fn new(
        layout: OutputLayout,
        settings: Settings,
        surface: Arc<dyn IdeSurface>,
        scanner: Arc<dyn CweScanner>,
        cancel: CancellationToken,
    ) -> Self {
        let checkpoint = CheckpointManager::new(layout.checkpoint_file());
        let session = AssistantSession::new(surface.clone(), cancel.clone())
            .with_max_retries(settings.as_mode_max_retry_per_line)
            .with_smart_wait(crate::interact::SmartWait {
                enabled: settings.smart_wait_enabled,
                ..Default::default()
            });
        Self { layout, settings, surface, scanner, cancel, checkpoint, session }
    }

    /// Replace the interaction session (tests shorten its delays).
    pub fn with_session(mut self, session: AssistantSession) -> Self {
        self.session = session;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the experiment over `project_dirs`. When `resume` carries a
    /// prior run's record, its settings were already adopted by the
    /// caller; progress and quota pick up where it stopped.
    pub async fn run(
        &mut self,
        project_dirs: &[PathBuf],
        resume: Option<ResumeInfo>,
    ) -> Result<RunSummary, GoadError> {
        let started_at = Utc::now();
        let project_names: Vec<String> = project_dirs
            .iter()
            .map(|p| Project::new(p).name)
            .collect();

        self.checkpoint.create_checkpoint(&self.settings, project_names.clone())?;

        let (resume_index, completed, mut total_files_processed, resume_round, resume_line) =
            match &resume {
                Some(info) => {
                    info!(
                        project = %info.project_name,
                        round = info.round,
                        line = info.line,
                        files = info.total_files_processed,
                        "Resuming from checkpoint"
                    );
                    self.checkpoint.update_progress(
                        Some(info.project_index),
                        Some(&info.project_name),
                        Some(info.round),
                        Some(info.line),
                        Some(info.phase),
                        None,
                        Some(info.total_files_processed),
                    )?;
                    for name in &info.completed_projects {
                        self.checkpoint.update_progress(None, None, None, None, None, Some(name), None)?;
                    }
                    (
                        info.project_index,
                        info.completed_projects.clone(),
                        info.total_files_processed,
                        info.round.max(1),
                        info.line,
                    )
                }
                None => (0, Vec::new(), 0, 1, 0),
            };

        let mut outcomes = Vec::new();
        let mut failures = Vec::new();

        for (index, dir) in project_dirs.iter().enumerate() {
            let project = Project::new(dir);

            if index < resume_index || completed.contains(&project.name) {
                outcomes.push(ProjectOutcome {
                    name: project.name.clone(),
                    status: ProjectStatus::Skipped,
                    planned_lines: 0,
                    realized_lines: 0,
                    message: Some("already completed in an earlier run".into()),
                });
                continue;
            }

            // Global quota: a project beyond the limit is skipped and
            // still counts as a success.
            let quota = self.settings.max_files_limit;
            if quota > 0 && total_files_processed >= quota {
                info!(project = %project.name, quota, "File quota reached — project skipped");
                outcomes.push(ProjectOutcome {
                    name: project.name.clone(),
                    status: ProjectStatus::Skipped,
                    planned_lines: 0,
                    realized_lines: 0,
                    message: Some("global file quota reached".into()),
                });
                continue;
            }

            self.checkpoint.update_progress(
                Some(index),
                Some(&project.name),
                None,
                None,
                None,
                None,
                None,
            )?;

            let outcome = self
                .run_project(
                    &project,
                    index == resume_index && resume.is_some(),
                    resume_round,
                    resume_line,
                    &mut total_files_processed,
                )
                .await;

            match outcome {
                Ok(outcome) => {
                    if let Some(msg) = &outcome.message {
                        if outcome.status == ProjectStatus::Failed {
                            failures.push(format!("{}: {}", outcome.name, msg));
                        }
                    }
                    self.checkpoint.update_progress(
                        None,
                        None,
                        None,
                        None,
                        None,
                        Some(&project.name),
                        Some(total_files_processed),
                    )?;
                    outcomes.push(outcome);
                }
                Err(GoadError::Interrupted) => {
                    self.checkpoint.mark_interrupted()?;
                    return Err(GoadError::Interrupted);
                }
                Err(e) => {
                    error!(project = %project.name, error = %e, "Project failed");
                    failures.push(format!("{}: {}", project.name, e));
                    outcomes.push(ProjectOutcome {
                        name: project.name.clone(),
                        status: ProjectStatus::Failed,
                        planned_lines: 0,
                        realized_lines: 0,
                        message: Some(e.to_string()),
                    });
                }
            }
        }

        self.checkpoint.mark_completed()?;

        let summary = RunSummary {
            execution_mode: self.settings.execution_mode,
            cwe: self.settings.cwe_enabled.then(|| self.settings.cwe_type.clone()),
            started_at,
            finished_at: Utc::now(),
            projects: outcomes,
            total_files_processed,
            failures,
        };
        crate::reporting::write_final_report(&self.layout, &summary)?;
        Ok(summary)
    }

    async fn run_project(
        &mut self,
        project: &Project,
        is_resumed_project: bool,
        resume_round: u32,
        resume_line: usize,
        total_files_processed: &mut u32,
    ) -> Result<ProjectOutcome, GoadError> {
        let prompt_lines = self.load_prompt_lines(project)?;
        if prompt_lines.is_empty() {
            info!(project = %project.name, "No prompt targets — nothing to do");
            return Ok(ProjectOutcome {
                name: project.name.clone(),
                status: ProjectStatus::Complete,
                planned_lines: 0,
                realized_lines: 0,
                message: None,
            });
        }

        // In control mode each line is independent, so a resumed project
        // restarts after the last processed line. The AS protocol reruns
        // whole rounds instead (its matrix suppresses finished targets).
        let skip_lines = if is_resumed_project && self.settings.execution_mode == ExecutionMode::NonAs
        {
            resume_line.min(prompt_lines.len())
        } else {
            0
        };
        let candidates = &prompt_lines[skip_lines..];

        let quota = self.settings.max_files_limit;
        let planned = if quota > 0 {
            let remaining = (quota - *total_files_processed) as usize;
            candidates.len().min(remaining)
        } else {
            candidates.len()
        };
        let lines = &candidates[..planned];

        // The planned count is charged whether or not the controller
        // succeeds, so a rerun with the same quota covers the same range.
        *total_files_processed += planned as u32;

        if let Err(e) = self.open_project_with_retry(project).await {
            return Ok(ProjectOutcome {
                name: project.name.clone(),
                status: ProjectStatus::Failed,
                planned_lines: planned as u32,
                realized_lines: 0,
                message: Some(format!("IDE open failed: {}", e)),
            });
        }

        let start_round = if is_resumed_project { resume_round } else { 1 };
        let controller_result = match self.settings.execution_mode {
            ExecutionMode::As => {
                let mut controller = AsModeController::new(
                    project,
                    lines,
                    &self.settings,
                    &self.layout,
                    &self.session,
                    self.scanner.clone(),
                    &mut self.checkpoint,
                    self.cancel.clone(),
                    start_round,
                )?;
                controller.run().await
            }
            ExecutionMode::NonAs => {
                let mut controller = ControlModeController::new(
                    project,
                    lines,
                    &self.settings,
                    &self.layout,
                    &self.session,
                    self.scanner.clone(),
                    &mut self.checkpoint,
                    self.cancel.clone(),
                    start_round,
                );
                controller.run().await
            }
        };

        if !self.verify_artifacts(project) {
            warn!(project = %project.name, "No response artifacts found on disk after run");
        }

        // Close in every exit path, resolving the save dialog first.
        let save_action = match self.settings.modification_action {
            crate::config::ModificationAction::Keep => SaveAction::Keep,
            crate::config::ModificationAction::Revert => SaveAction::Undo,
        };
        if let Err(e) = self.surface.resolve_save_dialog(save_action).await {
            warn!(project = %project.name, error = %e, "Save dialog handling failed at close");
        }
        if let Err(e) = self.surface.close_project().await {
            warn!(project = %project.name, error = %e, "Project close failed");
        }

        match controller_result {
            Ok(realized) => {
                let status = if realized == 0 && !lines.is_empty() {
                    ProjectStatus::Incomplete
                } else {
                    ProjectStatus::Complete
                };
                Ok(ProjectOutcome {
                    name: project.name.clone(),
                    status,
                    planned_lines: planned as u32,
                    realized_lines: realized,
                    message: None,
                })
            }
            Err(GoadError::Interrupted) => Err(GoadError::Interrupted),
            Err(e) => Ok(ProjectOutcome {
                name: project.name.clone(),
                status: ProjectStatus::Failed,
                planned_lines: planned as u32,
                realized_lines: 0,
                message: Some(e.to_string()),
            }),
        }
    }

    fn load_prompt_lines(&self, project: &Project) -> Result<Vec<PromptLine>, GoadError> {
        let path = match self.settings.prompt_source_mode {
            crate::config::PromptSourceMode::Project => project.prompt_path(),
            crate::config::PromptSourceMode::Global => self.layout.global_prompt_file(),
        };
        if !path.exists() {
            return Err(GoadError::InvalidTarget(format!(
                "Prompt file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(parse_prompt_file(&content))
    }

    async fn open_project_with_retry(&self, project: &Project) -> Result<(), GoadError> {
        match self.surface.open_project(&project.root).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(project = %project.name, error = %first, "IDE open failed — retrying once");
                self.surface.open_project(&project.root).await
            }
        }
    }

    /// Recognize any of the on-disk response layouts under the
    /// project's success directory.
    fn verify_artifacts(&self, project: &Project) -> bool {
        let success_dir = self.layout.success_dir(&project.name);
        detect_progress_from_output(&success_dir, 1).is_some()
            || has_any_md(&success_dir)
    }
}

fn has_any_md(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if has_any_md(&path) {
                return true;
            }
        } else if path.extension().map(|e| e == "md").unwrap_or(false) {
            return true;
        }
    }
    false
}
