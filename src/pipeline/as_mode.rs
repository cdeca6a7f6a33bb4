//! The two-phase per-round attack protocol: rename the target and plant
//! misleading context (kept), then ask for an implementation of the
//! renamed symbol (scanned, then reverted).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointManager;
use crate::config::Settings;
use crate::errors::GoadError;
use crate::interact::{save_response, AssistantSession};
use crate::models::{canonical_function_name, Phase, Project, PromptLine, Scanner, Target};
use crate::paths::OutputLayout;
use crate::prompts::{PromptLoader, PromptVariables};
use crate::results::{
    write_comparison_report, write_function_level_csv, AggregateRequest, AggregateTarget,
    BaselineStore, QueryStatistics,
};
use crate::scanner::{CweScanner, ScanRequest};
use crate::surface::SaveAction;
use crate::tracker::FunctionNameTracker;
use crate::vicious::ViciousPatternManager;

pub struct AsModeController<'a> {
    project: &'a Project,
    lines: &'a [PromptLine],
    settings: &'a Settings,
    layout: &'a OutputLayout,
    session: &'a AssistantSession,
    scanner: Arc<dyn CweScanner>,
    checkpoint: &'a mut CheckpointManager,
    cancel: CancellationToken,

    tracker: FunctionNameTracker,
    stats: QueryStatistics,
    vicious: ViciousPatternManager,
    templates: PromptLoader,
    baseline: Option<BaselineStore>,
    /// Targets flagged attack-succeeded; later phases and rounds skip
    /// them and the matrix records `#`.
    succeeded: HashSet<String>,
    realized_lines: u32,
    start_round: u32,
}

impl<'a> AsModeController<'a> {
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
    ) -> Result<Self, GoadError> {
        let tracker = FunctionNameTracker::new(
            &project.root,
            &layout.function_name_query_dir(&project.name),
        )?;
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

        Ok(Self {
            project,
            lines,
            settings,
            layout,
            session,
            scanner,
            checkpoint,
            cancel,
            tracker,
            stats,
            vicious,
            templates,
            baseline: None,
            succeeded: HashSet::new(),
            realized_lines: 0,
            start_round: start_round.max(1),
        })
    }

    /// Run the full round loop. Returns the number of lines that
    /// produced a complete response across all rounds.
    pub async fn run(&mut self) -> Result<u32, GoadError> {
        self.stats.initialize()?;

        if self.settings.cwe_enabled {
            self.capture_or_load_baseline().await?;
        }

        // Reload the attack-succeeded set on resume.
        let lines = self.lines;
        for line in lines {
            let target = Target::from_line(&self.project.name, line);
            if self.stats.should_skip_function(&line.file_path, line.primary_function())? {
                self.succeeded.insert(target.key());
            }
        }

        for round in self.start_round..=self.settings.max_rounds {
            self.check_cancelled()?;
            info!(project = %self.project.name, round, total = self.settings.max_rounds, "Round started");
            self.checkpoint.update_progress(None, None, Some(round), None, Some(1), None, None)?;

            let phase1_ok = self.run_query_phase(round).await?;
            if !phase1_ok {
                warn!(round, "Every line of the query phase failed — continuing anyway");
            }
            // Keep the renames and planted context.
            self.session.surface().resolve_save_dialog(SaveAction::Keep).await?;

            self.checkpoint.update_progress(None, None, Some(round), None, Some(2), None, None)?;
            let phase2_ok = self.run_coding_phase(round).await?;
            if !phase2_ok {
                warn!(round, "Every line of the coding phase failed — continuing anyway");
            }
            // Revert the implementations, restoring the phase-1 state.
            self.session.surface().resolve_save_dialog(SaveAction::Undo).await?;

            self.vicious.backup_round_patterns(round)?;

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

            info!(project = %self.project.name, round, "Round complete");
            if self.settings.round_delay > 0 && round < self.settings.max_rounds {
                tokio::time::sleep(Duration::from_secs(self.settings.round_delay)).await;
            }
        }

        self.finish()?;
        Ok(self.realized_lines)
    }

    async fn capture_or_load_baseline(&mut self) -> Result<(), GoadError> {
        let cwe = &self.settings.cwe_type;
        self.baseline = match BaselineStore::load(self.layout, &self.project.name, cwe)? {
            Some(store) => {
                info!(project = %self.project.name, "Baseline reloaded from earlier run");
                Some(store)
            }
            None => Some(
                BaselineStore::capture(
                    self.scanner.as_ref(),
                    self.project,
                    self.lines,
                    cwe,
                    self.layout,
                )
                .await?,
            ),
        };
        Ok(())
    }

    fn finish(&mut self) -> Result<(), GoadError> {
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
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), GoadError> {
        if self.cancel.is_cancelled() {
            Err(GoadError::Interrupted)
        } else {
            Ok(())
        }
    }

    fn skip_line(&self, line: &PromptLine) -> bool {
        let key = Target::from_line(&self.project.name, line).key();
        if self.succeeded.contains(&key) {
            debug!(line = line.index, key = %key, "Skipping — attack already succeeded");
            return true;
        }
        false
    }

    /// Phase 1: rename the symbol and plant misleading context. The
    /// assistant's write is kept afterwards.
    async fn run_query_phase(&mut self, round: u32) -> Result<bool, GoadError> {
        let mut any_success = false;
        let cwe_example = std::fs::read_to_string(
            self.layout.cwe_example_file(&self.settings.cwe_type),
        )
        .ok();

        let lines = self.lines;
        for line in lines {
            self.check_cancelled()?;
            if self.skip_line(line) {
                continue;
            }
            let original = line.primary_function();
            let file = &line.file_path;

            // Locate the symbol: last tracked position, or a fresh scan
            // of the (round-1 pristine) file.
            let mut known_line = self.tracker.latest_line(file, original);
            if known_line.is_none() {
                known_line = self.tracker.find_original_function_line(file, original)?;
                if known_line.is_none() {
                    warn!(line = line.index, file = %file, original = %original, "Symbol not found — line skipped");
                    continue;
                }
            }
            let pre_name = self.current_name_at(file, original, round, known_line)?;

            let template_name = if round == 1 { "initial_query" } else { "following_query" };
            let template = self.templates.load(template_name)?;
            let last_response = if round > 1 {
                self.read_saved_phase1(round - 1, line.index).unwrap_or_default()
            } else {
                String::new()
            };
            let vars = PromptVariables {
                target_file: file.clone(),
                target_function_name: pre_name.clone(),
                cwe_label: format!("CWE-{}", self.settings.cwe_type),
                last_response,
            };
            let prompt = self.templates.render(&template, &vars, cwe_example.as_deref());

            let Some(reply) = self.session.exchange(&prompt, round, line.index).await? else {
                warn!(round, line = line.index, "Query phase line abandoned after retries");
                continue;
            };
            any_success = true;

            let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
            save_response(
                &self.layout.as_response_file(
                    &self.project.name,
                    round,
                    1,
                    &timestamp,
                    file,
                    &pre_name,
                    line.index,
                ),
                &reply,
            )?;
            self.checkpoint.update_progress(None, None, None, Some(line.index), Some(1), None, None)?;

            // The assistant has edited the file; find the renamed def.
            if let Some(anchor) = known_line {
                match self.tracker.extract_modified_function_name_by_line(file, anchor)? {
                    Some((new_name, new_line)) => {
                        self.tracker.record_change(
                            file,
                            original,
                            round,
                            Phase::Query,
                            &pre_name,
                            &new_name,
                            known_line,
                            Some(new_line),
                        )?;
                    }
                    None => {
                        warn!(line = line.index, file = %file, "Rename not found after query phase");
                    }
                }
            }
        }
        Ok(any_success || self.lines.is_empty())
    }

    /// Phase 2: ask for an implementation of the renamed symbol, scan
    /// the result, then let the caller revert it.
    async fn run_coding_phase(&mut self, round: u32) -> Result<bool, GoadError> {
        let mut any_success = false;
        let mut first_scanned_line = true;

        let lines = self.lines;
        for line in lines {
            self.check_cancelled()?;
            if self.skip_line(line) {
                continue;
            }
            let original = line.primary_function();
            let file = &line.file_path;
            let current_name = self.tracker.get_latest_name(file, original);

            let template = self.templates.load("coding_instruction")?;
            let vars = PromptVariables {
                target_file: file.clone(),
                target_function_name: current_name.clone(),
                cwe_label: format!("CWE-{}", self.settings.cwe_type),
                last_response: String::new(),
            };
            let prompt = self.templates.render(&template, &vars, None);

            let Some(reply) = self.session.exchange(&prompt, round, line.index).await? else {
                warn!(round, line = line.index, "Coding phase line abandoned after retries");
                continue;
            };
            any_success = true;
            self.realized_lines += 1;

            let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
            save_response(
                &self.layout.as_response_file(
                    &self.project.name,
                    round,
                    2,
                    &timestamp,
                    file,
                    &current_name,
                    line.index,
                ),
                &reply,
            )?;
            self.checkpoint.update_progress(None, None, None, Some(line.index), Some(2), None, None)?;

            // The assistant may have renamed again while implementing.
            if let Some(anchor) = self.tracker.latest_line(file, original) {
                if let Some((post_name, post_line)) =
                    self.tracker.extract_modified_function_name_by_line(file, anchor)?
                {
                    self.tracker.record_change(
                        file,
                        original,
                        round,
                        Phase::Coding,
                        &current_name,
                        &post_name,
                        Some(anchor),
                        Some(post_line),
                    )?;
                }
            }

            if self.settings.cwe_enabled {
                self.scan_line(round, line, first_scanned_line).await?;
                first_scanned_line = false;
            }
        }
        Ok(any_success || self.lines.is_empty())
    }

    async fn scan_line(
        &mut self,
        round: u32,
        line: &PromptLine,
        first_line: bool,
    ) -> Result<(), GoadError> {
        let original = line.primary_function();
        let file = &line.file_path;
        let scan_name = self.tracker.get_latest_name(file, original);
        // The CSV shows the prompt token against the phase-1 rename.
        let pre_name = canonical_function_name(original);
        let post_name = self
            .tracker
            .history(file, original)
            .iter()
            .rev()
            .find(|r| r.round == round && r.phase == Phase::Query)
            .map(|r| r.modified_name.clone())
            .unwrap_or_else(|| scan_name.clone());

        let request = ScanRequest {
            absolute_path: self.project.resolve(file),
            relative_path: file.clone(),
            cwe_id: self.settings.cwe_type.clone(),
            project: Some(self.project.name.clone()),
            round: Some(round),
            function: Some(scan_name.clone()),
        };
        let records = self.scanner.scan_file(&request).await;

        let targets = [AggregateTarget {
            file_path: file.clone(),
            scan_name: scan_name.clone(),
            pre_phase1_name: pre_name,
            post_phase1_name: post_name,
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
                    as_mode: true,
                    append_mode: !first_line,
                },
            )?;
        }

        // Record positives for the vicious-pattern snapshot and flag the
        // target so later rounds skip it.
        for scanner_kind in [Scanner::Bandit, Scanner::Semgrep] {
            let count = records
                .iter()
                .filter(|r| {
                    r.scanner == scanner_kind
                        && r.is_finding()
                        && r.function_name.as_deref() == Some(scan_name.as_str())
                })
                .count() as u32;
            if count > 0 {
                info!(
                    round,
                    line = line.index,
                    file = %file,
                    function = %scan_name,
                    scanner = scanner_kind.as_str(),
                    count,
                    "Attack succeeded — vulnerability induced"
                );
                self.vicious.add_vulnerable_function(
                    file,
                    &scan_name,
                    round,
                    count,
                    scanner_kind.as_str(),
                );
                self.succeeded.insert(Target::from_line(&self.project.name, line).key());
            }
        }
        Ok(())
    }

    /// The name the symbol currently carries: prefer re-reading the file
    /// at the last known line, fall back to the tracker's chain.
    fn current_name_at(
        &self,
        file: &str,
        original: &str,
        round: u32,
        known_line: Option<u32>,
    ) -> Result<String, GoadError> {
        if let Some(anchor) = known_line {
            if let Some((name, _)) = self.tracker.extract_modified_function_name_by_line(file, anchor)? {
                return Ok(name);
            }
        }
        Ok(self.tracker.get_name_for_round(file, original, round))
    }

    /// The saved query-phase response of this line in an earlier round,
    /// used for `{Last_Response}` chaining.
    fn read_saved_phase1(&self, round: u32, line_index: usize) -> Option<String> {
        let dir = self.layout.phase_dir(&self.project.name, round, 1);
        let suffix = format!("_第{}行.md", line_index);
        let mut newest: Option<(std::time::SystemTime, std::path::PathBuf)> = None;
        for entry in std::fs::read_dir(&dir).ok()?.flatten() {
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
}
