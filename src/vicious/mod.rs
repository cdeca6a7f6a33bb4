//! Preserves the exact file state that induced a vulnerability.
//!
//! The snapshot is taken after the coding phase's Undo has reverted the
//! vulnerable body but before the next round begins, so it captures the
//! query-phase transformation (renamed symbols, planted context) that
//! made the attack land.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::errors::GoadError;

#[derive(Debug, Clone)]
struct VulnerableFunction {
    file: String,
    function: String,
    round: u32,
    count: u32,
    scanner: String,
    backed_up: bool,
}

pub struct ViciousPatternManager {
    project_root: PathBuf,
    dest_dir: PathBuf,
    records: Vec<VulnerableFunction>,
    copied_files: HashSet<String>,
}

impl ViciousPatternManager {
    pub fn new(project_root: &Path, dest_dir: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            dest_dir: dest_dir.to_path_buf(),
            records: Vec::new(),
            copied_files: HashSet::new(),
        }
    }

    /// Record a vulnerable function in memory. No disk activity until
    /// `backup_round_patterns`.
    pub fn add_vulnerable_function(
        &mut self,
        file: &str,
        function: &str,
        round: u32,
        count: u32,
        scanner: &str,
    ) {
        debug!(file, function, round, count, scanner, "Vulnerable function recorded");
        self.records.push(VulnerableFunction {
            file: file.to_string(),
            function: function.to_string(),
            round,
            count,
            scanner: scanner.to_string(),
            backed_up: false,
        });
    }

    /// Copy the current file state for every not-yet-backed-up
    /// vulnerability of `round`. Each file is copied at most once per
    /// project run, no matter how many rounds or functions hit it.
    pub fn backup_round_patterns(&mut self, round: u32) -> Result<usize, GoadError> {
        let mut copied = 0usize;
        let pending: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.round == round && !r.backed_up)
            .map(|r| r.file.clone())
            .collect();

        for file in pending {
            if !self.copied_files.contains(&file) {
                let source = self.project_root.join(&file);
                let dest = self.dest_dir.join(&file);
                if !source.exists() {
                    warn!(file = %file, "Cannot snapshot — source file missing");
                } else {
                    if let Some(parent) = dest.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::copy(&source, &dest)?;
                    self.copied_files.insert(file.clone());
                    copied += 1;
                    info!(file = %file, round, "Vicious pattern snapshot taken");
                }
            }
            for record in self.records.iter_mut().filter(|r| r.round == round && r.file == file) {
                record.backed_up = true;
            }
        }
        Ok(copied)
    }

    /// Finish the project: delete an empty snapshot directory, or write
    /// a `prompt.txt` listing the vulnerable (file, function) pairs,
    /// deduplicated, one line per file with functions `、`-joined.
    pub fn finalize(&self) -> Result<(), GoadError> {
        if self.records.is_empty() {
            if self.dest_dir.exists() && self.dest_dir.read_dir()?.next().is_none() {
                std::fs::remove_dir(&self.dest_dir)?;
                debug!(dir = %self.dest_dir.display(), "Removed empty vicious-pattern directory");
            }
            return Ok(());
        }

        std::fs::create_dir_all(&self.dest_dir)?;
        let mut files: Vec<String> = Vec::new();
        let mut functions_by_file: std::collections::HashMap<String, Vec<String>> =
            std::collections::HashMap::new();
        for record in &self.records {
            let functions = functions_by_file.entry(record.file.clone()).or_insert_with(|| {
                files.push(record.file.clone());
                Vec::new()
            });
            if !functions.contains(&record.function) {
                functions.push(record.function.clone());
            }
        }

        let mut content = String::new();
        for file in &files {
            content.push_str(&format!("{}|{}\n", file, functions_by_file[file].join("、")));
        }
        std::fs::write(self.dest_dir.join("prompt.txt"), &content)?;
        info!(
            files = files.len(),
            path = %self.dest_dir.join("prompt.txt").display(),
            "Vicious-pattern prompt written"
        );
        Ok(())
    }

    pub fn has_vulnerabilities(&self) -> bool {
        !self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, ViciousPatternManager) {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        std::fs::create_dir_all(project.join("src")).unwrap();
        std::fs::write(project.join("src/crypto.py"), "def renamed_key(): pass\n").unwrap();
        let manager = ViciousPatternManager::new(&project, &dir.path().join("vicious/demo"));
        (dir, manager)
    }

    #[test]
    fn test_backup_copies_current_state_once() {
        let (dir, mut manager) = setup();
        manager.add_vulnerable_function("src/crypto.py", "make_key()", 1, 1, "bandit");
        assert_eq!(manager.backup_round_patterns(1).unwrap(), 1);
        let snapshot = dir.path().join("vicious/demo/src/crypto.py");
        assert!(snapshot.exists());

        // A later round hitting the same file must not copy again.
        std::fs::write(dir.path().join("project/src/crypto.py"), "changed\n").unwrap();
        manager.add_vulnerable_function("src/crypto.py", "other()", 2, 1, "semgrep");
        assert_eq!(manager.backup_round_patterns(2).unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&snapshot).unwrap(), "def renamed_key(): pass\n");
    }

    #[test]
    fn test_finalize_writes_deduplicated_prompt() {
        let (dir, mut manager) = setup();
        manager.add_vulnerable_function("src/crypto.py", "make_key()", 1, 1, "bandit");
        manager.add_vulnerable_function("src/crypto.py", "make_key()", 2, 2, "semgrep");
        manager.add_vulnerable_function("src/crypto.py", "pad()", 2, 1, "bandit");
        manager.backup_round_patterns(1).unwrap();
        manager.backup_round_patterns(2).unwrap();
        manager.finalize().unwrap();

        let prompt = std::fs::read_to_string(dir.path().join("vicious/demo/prompt.txt")).unwrap();
        assert_eq!(prompt, "src/crypto.py|make_key()、pad()\n");
    }

    #[test]
    fn test_finalize_removes_empty_directory() {
        let (dir, manager) = setup();
        std::fs::create_dir_all(dir.path().join("vicious/demo")).unwrap();
        manager.finalize().unwrap();
        assert!(!dir.path().join("vicious/demo").exists());
    }

    #[test]
    fn test_finalize_without_directory_is_noop() {
        let (_dir, manager) = setup();
        manager.finalize().unwrap();
    }
}
