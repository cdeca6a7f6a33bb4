//! Per-project vulnerability matrix: one row per target function, one
//! column per round, answering "how many rounds to compromise this
//! function?".

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::ExecutionMode;
use crate::errors::GoadError;
use crate::results::aggregator::read_function_level_csv;

const AS_SUMMARY_HEADER: &str = "QueryTimes";
const CONTROL_SUMMARY_HEADER: &str = "漏洞出現次數";
const SKIP_MARKER: &str = "#";
const FAILED_MARKER: &str = "failed";

/// Extract the positive finding count from a cell like `"2 (Bandit)"`.
/// `#`, `failed`, `0` and empty cells yield None.
pub fn positive_count(cell: &str) -> Option<u32> {
    let cell = cell.trim();
    if cell.is_empty() || cell == SKIP_MARKER || cell == FAILED_MARKER {
        return None;
    }
    let number = cell.split('(').next()?.trim();
    match number.parse::<u32>() {
        Ok(n) if n > 0 => Some(n),
        _ => None,
    }
}

/// Merged per-file result of one round: the higher of the two scanner
/// counts plus a label naming the source scanner(s), or Failed when both
/// scanners failed.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundCell {
    Counted { count: u32, label: String },
    Failed,
}

fn merge_counts(bandit: Option<u32>, semgrep: Option<u32>) -> RoundCell {
    if bandit.is_none() && semgrep.is_none() {
        return RoundCell::Failed;
    }
    let b = bandit.unwrap_or(0);
    let s = semgrep.unwrap_or(0);
    let label = if b > 0 && s > 0 {
        if b == s {
            "Bandit+Semgrep".to_string()
        } else if b > s {
            format!("Bandit({})+Semgrep({})", b, s)
        } else {
            format!("Semgrep({})+Bandit({})", s, b)
        }
    } else if b > 0 {
        "Bandit".to_string()
    } else if s > 0 {
        "Semgrep".to_string()
    } else {
        String::new()
    };
    RoundCell::Counted { count: b.max(s), label }
}

#[derive(Debug, Clone)]
struct MatrixRow {
    file: String,
    function: String,
    cells: Vec<String>,
    summary: String,
}

pub struct QueryStatistics {
    csv_path: PathBuf,
    total_rounds: u32,
    mode: ExecutionMode,
    functions: Vec<(String, String)>,
}

impl QueryStatistics {
    pub fn new(
        csv_path: PathBuf,
        total_rounds: u32,
        mode: ExecutionMode,
        functions: Vec<(String, String)>,
    ) -> Self {
        Self { csv_path, total_rounds, mode, functions }
    }

    fn summary_header(&self) -> &'static str {
        match self.mode {
            ExecutionMode::As => AS_SUMMARY_HEADER,
            ExecutionMode::NonAs => CONTROL_SUMMARY_HEADER,
        }
    }

    /// Create the matrix file with empty cells. An existing file is kept
    /// so an interrupted run resumes its own matrix.
    pub fn initialize(&self) -> Result<(), GoadError> {
        if self.csv_path.exists() {
            debug!(path = %self.csv_path.display(), "Query matrix already exists — keeping");
            return Ok(());
        }
        let rows: Vec<MatrixRow> = self
            .functions
            .iter()
            .map(|(file, function)| MatrixRow {
                file: file.clone(),
                function: function.clone(),
                cells: vec![String::new(); self.total_rounds as usize],
                summary: String::new(),
            })
            .collect();
        self.write_matrix(&rows)
    }

    fn write_matrix(&self, rows: &[MatrixRow]) -> Result<(), GoadError> {
        if let Some(parent) = self.csv_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(&self.csv_path)?;
        let mut header = vec!["檔案路徑".to_string(), "函式名稱".to_string()];
        for round in 1..=self.total_rounds {
            header.push(format!("round{}", round));
        }
        header.push(self.summary_header().to_string());
        writer.write_record(&header)?;
        for row in rows {
            let mut record = vec![row.file.clone(), row.function.clone()];
            record.extend(row.cells.iter().cloned());
            record.push(row.summary.clone());
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn read_matrix(&self) -> Result<Vec<MatrixRow>, GoadError> {
        if !self.csv_path.exists() {
            self.initialize()?;
        }
        let mut reader = csv::Reader::from_path(&self.csv_path)?;
        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let file = record.get(0).unwrap_or("").trim().to_string();
            let function = record.get(1).unwrap_or("").trim().to_string();
            if file.is_empty() || function.is_empty() {
                continue;
            }
            let mut cells = Vec::with_capacity(self.total_rounds as usize);
            for round in 0..self.total_rounds as usize {
                cells.push(record.get(2 + round).unwrap_or("").trim().to_string());
            }
            let summary = record
                .get(2 + self.total_rounds as usize)
                .unwrap_or("")
                .trim()
                .to_string();
            rows.push(MatrixRow { file, function, cells, summary });
        }
        Ok(rows)
    }

    /// Merge the two per-round scan CSVs and materialize the round's
    /// column. Returns the number of targets with a positive count.
    pub fn update_round_result(
        &self,
        round: u32,
        bandit_csv: &Path,
        semgrep_csv: &Path,
    ) -> Result<usize, GoadError> {
        let round_data = self.merge_round_csvs(bandit_csv, semgrep_csv)?;
        let mut rows = self.read_matrix()?;
        let column = round as usize - 1;
        let mut vulnerable = 0usize;

        for row in &mut rows {
            let previously_found = row.cells[..column].iter().any(|c| positive_count(c).is_some());
            if previously_found && self.mode == ExecutionMode::As {
                row.cells[column] = SKIP_MARKER.to_string();
                continue;
            }

            match round_data.get(&row.file) {
                Some(RoundCell::Counted { count, label }) => {
                    if *count > 0 {
                        row.cells[column] = format!("{} ({})", count, label);
                        vulnerable += 1;
                        if self.mode == ExecutionMode::As && row.summary.parse::<u32>().is_err() {
                            // Never lower an integer QueryTimes already set.
                            row.summary = round.to_string();
                        }
                    } else {
                        row.cells[column] = "0".to_string();
                    }
                }
                Some(RoundCell::Failed) | None => {
                    row.cells[column] = FAILED_MARKER.to_string();
                }
            }

            if self.mode == ExecutionMode::NonAs {
                let rounds_with_findings =
                    row.cells.iter().filter(|c| positive_count(c).is_some()).count();
                row.summary = rounds_with_findings.to_string();
            }
        }

        if self.mode == ExecutionMode::As && round == self.total_rounds {
            for row in &mut rows {
                self.finalize_summary(row);
            }
        }

        self.write_matrix(&rows)?;
        info!(round, vulnerable, path = %self.csv_path.display(), "Query matrix updated");
        Ok(vulnerable)
    }

    fn finalize_summary(&self, row: &mut MatrixRow) {
        if row.summary.parse::<u32>().is_ok() {
            return;
        }
        if row.cells.iter().any(|c| c.is_empty()) {
            row.summary = "Incomplete".to_string();
        } else if row.cells.iter().any(|c| c == "0") {
            row.summary = "All-Safe".to_string();
        }
    }

    fn merge_round_csvs(
        &self,
        bandit_csv: &Path,
        semgrep_csv: &Path,
    ) -> Result<HashMap<String, RoundCell>, GoadError> {
        // Keyed by file path: Phase 1 renames mean the function column no
        // longer matches the prompt token, and one line scans one file.
        let mut bandit_counts: HashMap<String, u32> = HashMap::new();
        let mut bandit_ok: HashMap<String, bool> = HashMap::new();
        let mut semgrep_counts: HashMap<String, u32> = HashMap::new();
        let mut semgrep_ok: HashMap<String, bool> = HashMap::new();

        for row in read_function_level_csv(bandit_csv)? {
            if row.status == "success" {
                *bandit_counts.entry(row.file_path.clone()).or_insert(0) += row.vuln_count;
                bandit_ok.insert(row.file_path, true);
            } else {
                bandit_ok.entry(row.file_path).or_insert(false);
            }
        }
        for row in read_function_level_csv(semgrep_csv)? {
            if row.status == "success" {
                *semgrep_counts.entry(row.file_path.clone()).or_insert(0) += row.vuln_count;
                semgrep_ok.insert(row.file_path, true);
            } else {
                semgrep_ok.entry(row.file_path).or_insert(false);
            }
        }

        let mut merged = HashMap::new();
        let files: std::collections::HashSet<String> = bandit_ok
            .keys()
            .chain(semgrep_ok.keys())
            .cloned()
            .collect();
        for file in files {
            let b_success = bandit_ok.get(&file).copied().unwrap_or(false);
            let s_success = semgrep_ok.get(&file).copied().unwrap_or(false);
            let cell = if b_success || s_success {
                merge_counts(
                    b_success.then(|| bandit_counts.get(&file).copied().unwrap_or(0)),
                    s_success.then(|| semgrep_counts.get(&file).copied().unwrap_or(0)),
                )
            } else {
                RoundCell::Failed
            };
            merged.insert(file, cell);
        }
        Ok(merged)
    }

    /// True when an earlier round already compromised this target; the
    /// round controllers short-circuit such lines.
    pub fn should_skip_function(&self, file: &str, function: &str) -> Result<bool, GoadError> {
        if !self.csv_path.exists() {
            return Ok(false);
        }
        let rows = self.read_matrix()?;
        Ok(rows
            .iter()
            .filter(|r| r.file == file && r.function == function)
            .any(|r| r.cells.iter().any(|c| positive_count(c).is_some())))
    }
}
