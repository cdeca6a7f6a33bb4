//! The control protocol: the same prompt-line set repeated for N
//! rounds, one phase per round, nothing ever suppressed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::checkpoint::CheckpointManager;
use crate::config::{ModificationAction, Settings};
use crate::errors::GoadError;
use crate::interact::{save_response, AssistantSession};
use crate::models::{Project, PromptLine, Scanner, Target};
use crate::paths::OutputLayout;
use crate::prompts::{PromptLoader, PromptVariables};
use crate::results::{
    write_comparison_report, write_function_level_csv, AggregateRequest, AggregateTarget,
    BaselineStore, QueryStatistics,
};
use crate::scanner::{CweScanner, ScanRequest};
use crate::surface::SaveAction;
use crate::vicious::ViciousPatternManager;

pub struct ControlModeController<'a> {
    project: &'a Project,
    lines: &'a [PromptLine],
    settings: &'a Settings,
    layout: &'a OutputLayout,
    session: &'a AssistantSession,
    scanner: Arc<dyn CweScanner>,
    checkpoint: &'a mut CheckpointManager,
    cancel: CancellationToken,

    stats: QueryStatistics,
    vicious: ViciousPatternManager,
    templates: PromptLoader,
    baseline: Option<BaselineStore>,
    realized_lines: u32,
    start_round: u32,
}

impl<'a> ControlModeController<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project: &'a Project,
        lines: &'a [PromptLine],
        settings: &'a Settings,
        layout: &'a OutputLayout,
        session: &'a AssistantSession,
        scanner: Arc<dyn CweScanner>,
        checkpoint: &'a mut CheckpointManager,
        cancel: CancellationToken,
        start_round: u32,
    ) -> Self {
        let functions: Vec<(String, String)> = lines
            .iter()
            .map(|l| (l.file_path.clone(), l.primary_function().to_string()))
            .collect();
        let stats = QueryStatistics::new(
            layout.query_statistics_csv(&settings.cwe_type, &project.name),
            settings.max_rounds,
            settings.execution_mode,
            functions,
        );
        let vicious =
            ViciousPatternManager::new(&project.root, &layout.vicious_dir(&project.name));
        let templates = PromptLoader::new(layout.prompt_template_dir());

        Self {
            project,
            lines,
            settings,
            layout,
            session,
            scanner,
            checkpoint,
            cancel,
            stats,
            vicious,
            templates,
            baseline: None,
            realized_lines: 0,
            start_round: start_round.max(1),
        }
    }

    pub async fn run(&mut self) -> Result<u32, GoadError> {
        if self.settings.cwe_enabled {
            self.stats.initialize()?;
            self.baseline = match BaselineStore::load(
                self.layout,
                &self.project.name,
                &self.settings.cwe_type,
            )? {
                Some(store) => Some(store),
                None => Some(
                    BaselineStore::capture(
                        self.scanner.as_ref(),
                        self.project,
                        self.lines,
                        &self.settings.cwe_type,
                        self.layout,
                    )
                    .await?,
                ),
            };
        }

        for round in self.start_round..=self.settings.max_rounds {
            self.check_cancelled()?;
            info!(project = %self.project.name, round, total = self.settings.max_rounds, "Round started");
            self.checkpoint.update_progress(None, None, Some(round), None, Some(1), None, None)?;

            self.session.surface().focus_chat_input().await?;
            self.session.surface().select_recent_model().await?;

            self.run_round(round).await?;

            if self.settings.cwe_enabled {
                let bandit_csv = self.layout.function_level_csv(
                    &self.settings.cwe_type,
                    Scanner::Bandit,
                    &self.project.name,
                    round,
                );
                let semgrep_csv = self.layout.function_level_csv(
                    &self.settings.cwe_type,
                    Scanner::Semgrep,
                    &self.project.name,
                    round,
                );
                self.stats.update_round_result(round, &bandit_csv, &semgrep_csv)?;
            }

            // The user-chosen post-round action, then a fresh conversation.
            let action = match self.settings.modification_action {
                ModificationAction::Keep => SaveAction::Keep,
                ModificationAction::Revert => SaveAction::Undo,
            };
            self.session.surface().resolve_save_dialog(action).await?;
            self.session.surface().open_new_conversation().await?;

            info!(project = %self.project.name, round, "Round complete");
            if self.settings.round_delay > 0 && round < self.settings.max_rounds {
                tokio::time::sleep(Duration::from_secs(self.settings.round_delay)).await;
            }
        }

        if let Some(baseline) = &self.baseline {
            let targets: Vec<Target> = self
                .lines
                .iter()
                .map(|l| Target::from_line(&self.project.name, l))
                .collect();
            write_comparison_report(
                self.layout,
                &self.project.name,
                &self.settings.cwe_type,
                self.settings.max_rounds,
                baseline,
                &targets,
            )?;
        }
        self.vicious.finalize()?;
        Ok(self.realized_lines)
    }

    async fn run_round(&mut self, round: u32) -> Result<(), GoadError> {
        let mut first_scanned_line = true;
        let lines = self.lines;
        for line in lines {
            self.check_cancelled()?;

            let prompt = self.build_prompt(round, line)?;
            let Some(reply) = self.session.exchange(&prompt, round, line.index).await? else {
                warn!(round, line = line.index, "Line abandoned after retries");
                continue;
            };
            self.realized_lines += 1;

            let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
            save_response(
                &self.layout.response_file(&self.project.name, round, &timestamp, line.index),
                &reply,
            )?;
            self.checkpoint.update_progress(None, None, None, Some(line.index), None, None, None)?;

            if self.settings.cwe_enabled {
                self.scan_line(round, line, first_scanned_line).await?;
                first_scanned_line = false;
            }
        }
        Ok(())
    }

    fn build_prompt(&self, round: u32, line: &PromptLine) -> Result<String, GoadError> {
        let base = if self.settings.use_coding_instruction {
            let template = self.templates.load("coding_instruction")?;
            let vars = PromptVariables {
                target_file: line.file_path.clone(),
                target_function_name: line.primary_function().to_string(),
                cwe_label: format!("CWE-{}", self.settings.cwe_type),
                last_response: String::new(),
            };
            self.templates.render(&template, &vars, None)
        } else {
            format!("{}|{}", line.file_path, line.functions.join("、"))
        };

        // Chain the previous round's reply, newline-joined with no
        // framing text; any framing lives in the template itself.
        if round > 1 {
            if let Some(previous) = self.read_saved_response(round - 1, line.index) {
                return Ok(format!("{}\n{}", previous, base));
            }
        }
        Ok(base)
    }

    async fn scan_line(
        &mut self,
        round: u32,
        line: &PromptLine,
        first_line: bool,
    ) -> Result<(), GoadError> {
        let function = line.primary_function().to_string();
        let request = ScanRequest {
            absolute_path: self.project.resolve(&line.file_path),
            relative_path: line.file_path.clone(),
            cwe_id: self.settings.cwe_type.clone(),
            project: Some(self.project.name.clone()),
            round: Some(round),
            function: Some(function.clone()),
        };
        let records = self.scanner.scan_file(&request).await;

        let targets = [AggregateTarget {
            file_path: line.file_path.clone(),
            scan_name: function.clone(),
            pre_phase1_name: function.clone(),
            post_phase1_name: function.clone(),
        }];
        for scanner_kind in [Scanner::Bandit, Scanner::Semgrep] {
            let path = self.layout.function_level_csv(
                &self.settings.cwe_type,
                scanner_kind,
                &self.project.name,
                round,
            );
            write_function_level_csv(
                &path,
                &AggregateRequest {
                    round,
                    line_index: line.index,
                    targets: &targets,
                    records: &records,
                    scanner_filter: scanner_kind,
                    as_mode: false,
                    append_mode: !first_line,
                },
            )?;
        }

        for scanner_kind in [Scanner::Bandit, Scanner::Semgrep] {
            let count = records
                .iter()
                .filter(|r| {
                    r.scanner == scanner_kind
                        && r.is_finding()
                        && r.function_name.as_deref() == Some(function.as_str())
                })
                .count() as u32;
            if count > 0 {
                self.vicious.add_vulnerable_function(
                    &line.file_path,
                    &function,
                    round,
                    count,
                    scanner_kind.as_str(),
                );
            }
        }
        Ok(())
    }

    fn read_saved_response(&self, round: u32, line_index: usize) -> Option<String> {
        let dir = self.layout.round_dir(&self.project.name, round);
        let suffix = format!("_第{}行.md", line_index);
        let mut newest: Option<(std::time::SystemTime, std::path::PathBuf)> = None;
        for entry in std::fs::read_dir(&dir).ok()?.flatten() {
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(&suffix) {
                continue;
            }
            let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
            if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
                newest = Some((modified, entry.path()));
            }
        }
        std::fs::read_to_string(newest?.1).ok()
    }

    fn check_cancelled(&self) -> Result<(), GoadError> {
        if self.cancel.is_cancelled() {
            Err(GoadError::Interrupted)
        } else {
            Ok(())
        }
    }
}
