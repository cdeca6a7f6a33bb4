//! Follows each target symbol across rounds of AI-driven renames.
//!
//! The map is keyed by `(file, original_name)` and ordered by the strict
//! `(round, phase)` key, so round r's post-name becomes round r+1's
//! pre-name without any cross-round pointers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::errors::GoadError;
use crate::models::change::{FunctionChangeRecord, Phase};
use crate::models::target::{bare_function_name, canonical_function_name};

/// How far (in lines, each direction) to look for the renamed `def`
/// around the last known location.
const RENAME_SEARCH_WINDOW: u32 = 30;

const CSV_HEADERS: [&str; 8] = [
    "輪數",
    "原始行號",
    "檔案路徑",
    "原始函式名稱",
    "當前函式名稱",
    "修改後函式名稱",
    "修改後行號",
    "時間戳記",
];

pub struct FunctionNameTracker {
    project_root: PathBuf,
    csv_dir: PathBuf,
    records: HashMap<(String, String), Vec<FunctionChangeRecord>>,
}

impl FunctionNameTracker {
    /// Open a tracker for one project run, reloading any `round*.csv`
    /// files left by an interrupted execution.
    pub fn new(project_root: &Path, csv_dir: &Path) -> Result<Self, GoadError> {
        std::fs::create_dir_all(csv_dir)?;
        let mut tracker = Self {
            project_root: project_root.to_path_buf(),
            csv_dir: csv_dir.to_path_buf(),
            records: HashMap::new(),
        };
        tracker.load_existing()?;
        Ok(tracker)
    }

    fn load_existing(&mut self) -> Result<(), GoadError> {
        let pattern = self.csv_dir.join("round*.csv");
        let Some(pattern) = pattern.to_str() else {
            return Ok(());
        };
        let mut paths: Vec<PathBuf> = glob::glob(pattern)
            .map_err(|e| GoadError::Internal(format!("Bad glob pattern: {}", e)))?
            .filter_map(Result::ok)
            .collect();
        // round2.csv sorts after round1.csv; rounds beyond 9 are not
        // reloaded out of order because records re-sort per key below.
        paths.sort();

        let mut loaded = 0usize;
        for path in paths {
            loaded += self.load_round_csv(&path)?;
        }
        for recs in self.records.values_mut() {
            recs.sort_by_key(|r| r.order_key());
        }
        if loaded > 0 {
            info!(records = loaded, "Reloaded function-name history");
        }
        Ok(())
    }

    fn load_round_csv(&mut self, path: &Path) -> Result<usize, GoadError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut count = 0usize;
        // Phase is not a CSV column; within one round file the first
        // record for a key is the query phase, the second the coding one.
        let mut seen: HashMap<(String, String), u8> = HashMap::new();
        for result in reader.records() {
            let record = result?;
            let round: u32 = record.get(0).unwrap_or("0").trim().parse().unwrap_or(0);
            let original_line: Option<u32> = record.get(1).and_then(|s| s.trim().parse().ok());
            let file = record.get(2).unwrap_or("").trim().to_string();
            let original = record.get(3).unwrap_or("").trim().to_string();
            let current = record.get(4).unwrap_or("").trim().to_string();
            let modified = record.get(5).unwrap_or("").trim().to_string();
            let modified_line: Option<u32> = record.get(6).and_then(|s| s.trim().parse().ok());
            if file.is_empty() || original.is_empty() || round == 0 {
                continue;
            }
            let key = (file.clone(), original.clone());
            let occurrence = seen.entry(key.clone()).or_insert(0);
            *occurrence += 1;
            let phase = if *occurrence == 1 { Phase::Query } else { Phase::Coding };
            self.records.entry(key).or_default().push(FunctionChangeRecord {
                file_path: file,
                original_name: original,
                round,
                phase,
                current_name: current,
                modified_name: modified,
                line_before: original_line,
                line_after: modified_line,
                timestamp: Utc::now(),
            });
            count += 1;
        }
        Ok(count)
    }

    /// First-pass discovery of the symbol in the pristine file. Returns
    /// the 1-based line of the first `def <name>(` match.
    pub fn find_original_function_line(
        &self,
        file: &str,
        original_name: &str,
    ) -> Result<Option<u32>, GoadError> {
        let full_path = self.project_root.join(file);
        if !full_path.exists() {
            warn!(file, "Target file does not exist");
            return Ok(None);
        }
        let content = std::fs::read_to_string(&full_path)?;
        let name = regex::escape(bare_function_name(original_name));
        let pattern = Regex::new(&format!(r"def\s+{}\s*\(", name))
            .map_err(|e| GoadError::Internal(format!("Bad function regex: {}", e)))?;
        for (i, line) in content.lines().enumerate() {
            if pattern.is_match(line) {
                return Ok(Some(i as u32 + 1));
            }
        }
        Ok(None)
    }

    /// Append one rename observation, in memory and to the round CSV.
    /// A duplicate `(file, original, round, phase)` is ignored with a
    /// warning; returns whether the record was written.
    #[allow(clippy::too_many_arguments)]
    pub fn record_change(
        &mut self,
        file: &str,
        original_name: &str,
        round: u32,
        phase: Phase,
        current_name: &str,
        modified_name: &str,
        line_before: Option<u32>,
        line_after: Option<u32>,
    ) -> Result<bool, GoadError> {
        let key = (file.to_string(), original_name.to_string());
        let existing = self.records.entry(key).or_default();
        if existing.iter().any(|r| r.round == round && r.phase == phase) {
            warn!(file, original_name, round, phase = %phase, "Duplicate change record ignored");
            return Ok(false);
        }

        let record = FunctionChangeRecord {
            file_path: file.to_string(),
            original_name: original_name.to_string(),
            round,
            phase,
            current_name: current_name.to_string(),
            modified_name: modified_name.to_string(),
            line_before,
            line_after,
            timestamp: Utc::now(),
        };

        let csv_path = self.csv_dir.join(format!("round{}.csv", round));
        let write_header = !csv_path.exists();
        let file_handle = std::fs::OpenOptions::new().create(true).append(true).open(&csv_path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file_handle);
        if write_header {
            writer.write_record(CSV_HEADERS)?;
        }
        writer.write_record([
            record.round.to_string(),
            record.line_before.map(|l| l.to_string()).unwrap_or_default(),
            record.file_path.clone(),
            record.original_name.clone(),
            record.current_name.clone(),
            record.modified_name.clone(),
            record.line_after.map(|l| l.to_string()).unwrap_or_default(),
            record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        ])?;
        writer.flush()?;

        debug!(
            file,
            round,
            phase = %phase,
            current = current_name,
            modified = modified_name,
            "Recorded function rename"
        );
        existing.push(record);
        existing.sort_by_key(|r| r.order_key());
        Ok(true)
    }

    /// The name to use when issuing the Phase-1 query of `target_round`:
    /// the newest modified name strictly before `(target_round, 1)`, or
    /// the original name when no history exists.
    pub fn get_name_for_round(&self, file: &str, original_name: &str, target_round: u32) -> String {
        let key = (file.to_string(), original_name.to_string());
        self.records
            .get(&key)
            .into_iter()
            .flatten()
            .filter(|r| r.order_key() < (target_round, 1))
            .last()
            .map(|r| r.modified_name.clone())
            .unwrap_or_else(|| canonical_function_name(original_name))
    }

    /// The newest recorded name, used by the coding phase.
    pub fn get_latest_name(&self, file: &str, original_name: &str) -> String {
        let key = (file.to_string(), original_name.to_string());
        self.records
            .get(&key)
            .and_then(|recs| recs.last())
            .map(|r| r.modified_name.clone())
            .unwrap_or_else(|| canonical_function_name(original_name))
    }

    /// The newest known line for the symbol, if any record carries one.
    pub fn latest_line(&self, file: &str, original_name: &str) -> Option<u32> {
        let key = (file.to_string(), original_name.to_string());
        self.records
            .get(&key)?
            .iter()
            .rev()
            .find_map(|r| r.line_after.or(r.line_before))
    }

    /// Re-read the file and locate the nearest `def` within the search
    /// window around `line`. Returns the canonical new name and its line.
    pub fn extract_modified_function_name_by_line(
        &self,
        file: &str,
        line: u32,
    ) -> Result<Option<(String, u32)>, GoadError> {
        let full_path = self.project_root.join(file);
        if !full_path.exists() {
            warn!(file, "Target file does not exist");
            return Ok(None);
        }
        let content = std::fs::read_to_string(&full_path)?;
        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return Ok(None);
        }

        let def_re = Regex::new(r"def\s+(\w+)\s*\(")
            .map_err(|e| GoadError::Internal(format!("Bad def regex: {}", e)))?;
        let center = line.max(1).min(lines.len() as u32) as i64 - 1;

        // Spiral outward from the last known location so the nearest
        // definition wins.
        for distance in 0..=RENAME_SEARCH_WINDOW as i64 {
            let mut candidates = vec![center - distance];
            if distance > 0 {
                candidates.push(center + distance);
            }
            for candidate in candidates {
                if candidate < 0 || candidate >= lines.len() as i64 {
                    continue;
                }
                if let Some(cap) = def_re.captures(lines[candidate as usize]) {
                    let name = canonical_function_name(&cap[1]);
                    return Ok(Some((name, candidate as u32 + 1)));
                }
            }
        }

        warn!(file, line, window = RENAME_SEARCH_WINDOW, "No def found near expected line");
        Ok(None)
    }

    /// All records for a symbol, in `(round, phase)` order.
    pub fn history(&self, file: &str, original_name: &str) -> &[FunctionChangeRecord] {
        let key = (file.to_string(), original_name.to_string());
        self.records.get(&key).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, FunctionNameTracker) {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        let csvs = dir.path().join("FunctionName_query");
        std::fs::create_dir_all(&project).unwrap();
        let tracker = FunctionNameTracker::new(&project, &csvs).unwrap();
        (dir, tracker)
    }

    #[test]
    fn test_find_original_function_line() {
        let (dir, tracker) = setup();
        std::fs::create_dir_all(dir.path().join("project/src")).unwrap();
        std::fs::write(
            dir.path().join("project/src/crypto.py"),
            "import hashlib\n\ndef make_key(seed):\n    return hashlib.md5(seed).hexdigest()\n",
        )
        .unwrap();
        let line = tracker.find_original_function_line("src/crypto.py", "make_key()").unwrap();
        assert_eq!(line, Some(3));
    }

    #[test]
    fn test_name_evolution_across_rounds() {
        let (_dir, mut tracker) = setup();
        tracker
            .record_change("a.py", "f()", 1, Phase::Query, "f()", "g()", Some(3), Some(3))
            .unwrap();
        tracker
            .record_change("a.py", "f()", 1, Phase::Coding, "g()", "h()", Some(3), Some(5))
            .unwrap();

        // Round 1 query uses the original; round 2 uses round 1's result.
        assert_eq!(tracker.get_name_for_round("a.py", "f()", 1), "f()");
        assert_eq!(tracker.get_name_for_round("a.py", "f()", 2), "h()");
        assert_eq!(tracker.get_latest_name("a.py", "f()"), "h()");
        assert_eq!(tracker.latest_line("a.py", "f()"), Some(5));
    }

    #[test]
    fn test_current_name_chain_invariant() {
        let (_dir, mut tracker) = setup();
        tracker
            .record_change("a.py", "f()", 1, Phase::Query, "f()", "g()", None, None)
            .unwrap();
        tracker
            .record_change("a.py", "f()", 2, Phase::Query, "g()", "k()", None, None)
            .unwrap();
        let history = tracker.history("a.py", "f()");
        assert_eq!(history[0].modified_name, history[1].current_name);
        assert!(history[0].order_key() < history[1].order_key());
    }

    #[test]
    fn test_duplicate_record_is_ignored() {
        let (_dir, mut tracker) = setup();
        assert!(tracker
            .record_change("a.py", "f()", 1, Phase::Query, "f()", "g()", None, None)
            .unwrap());
        assert!(!tracker
            .record_change("a.py", "f()", 1, Phase::Query, "f()", "x()", None, None)
            .unwrap());
        assert_eq!(tracker.get_latest_name("a.py", "f()"), "g()");
    }

    #[test]
    fn test_reload_from_round_csvs() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        let csvs = dir.path().join("FunctionName_query");
        std::fs::create_dir_all(&project).unwrap();
        {
            let mut tracker = FunctionNameTracker::new(&project, &csvs).unwrap();
            tracker
                .record_change("a.py", "f()", 1, Phase::Query, "f()", "g()", Some(3), Some(3))
                .unwrap();
            tracker
                .record_change("a.py", "f()", 1, Phase::Coding, "g()", "h()", Some(3), Some(4))
                .unwrap();
        }
        let tracker = FunctionNameTracker::new(&project, &csvs).unwrap();
        assert_eq!(tracker.get_latest_name("a.py", "f()"), "h()");
        assert_eq!(tracker.history("a.py", "f()").len(), 2);
        assert_eq!(tracker.history("a.py", "f()")[1].phase, Phase::Coding);
    }

    #[test]
    fn test_extract_nearest_def_in_window() {
        let (dir, tracker) = setup();
        let body = format!(
            "{}\ndef renamed_key(seed):\n    return seed\n",
            "# padding\n".repeat(10)
        );
        std::fs::write(dir.path().join("project/a.py"), body).unwrap();
        // Last known line 9 — the def now sits on line 12.
        let found = tracker.extract_modified_function_name_by_line("a.py", 9).unwrap();
        assert_eq!(found, Some(("renamed_key()".to_string(), 12)));
    }

    #[test]
    fn test_extract_outside_window_fails() {
        let (dir, tracker) = setup();
        let body = format!("{}def far_away():\n    pass\n", "# pad\n".repeat(100));
        std::fs::write(dir.path().join("project/a.py"), body).unwrap();
        let found = tracker.extract_modified_function_name_by_line("a.py", 10).unwrap();
        assert_eq!(found, None);
    }
}
