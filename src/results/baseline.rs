//! Pre-attack baseline: scan every target once per scanner before round
//! 1 so that post-attack counts have something to be compared against.

use std::collections::HashMap;

use tracing::info;

use crate::errors::GoadError;
use crate::models::{Project, PromptLine, ScanRecord, Scanner, Target};
use crate::paths::OutputLayout;
use crate::scanner::{CweScanner, ScanRequest};

#[derive(Debug, Clone, Default)]
pub struct BaselineSummary {
    pub file: String,
    pub function: String,
    pub bandit_count: u32,
    pub semgrep_count: u32,
    pub bandit_details: Vec<ScanRecord>,
    pub semgrep_details: Vec<ScanRecord>,
}

impl BaselineSummary {
    pub fn total(&self) -> u32 {
        self.bandit_count + self.semgrep_count
    }
}

/// Baseline results keyed by `<file>::<function>()`.
#[derive(Debug, Default)]
pub struct BaselineStore {
    entries: HashMap<String, BaselineSummary>,
}

impl BaselineStore {
    /// Scan every prompt line once and persist the per-scanner baseline
    /// CSVs under the project's `原始狀態` directory.
    pub async fn capture(
        scanner: &dyn CweScanner,
        project: &Project,
        lines: &[PromptLine],
        cwe: &str,
        layout: &OutputLayout,
    ) -> Result<Self, GoadError> {
        let mut store = Self::default();
        for line in lines {
            let target = Target::from_line(&project.name, line);
            let request = ScanRequest {
                absolute_path: project.resolve(&line.file_path),
                relative_path: line.file_path.clone(),
                cwe_id: cwe.to_string(),
                project: None,
                round: None,
                function: None,
            };
            let records = scanner.scan_file(&request).await;
            let bandit_details: Vec<ScanRecord> = records
                .iter()
                .filter(|r| r.scanner == Scanner::Bandit && r.is_finding())
                .cloned()
                .collect();
            let semgrep_details: Vec<ScanRecord> = records
                .iter()
                .filter(|r| r.scanner == Scanner::Semgrep && r.is_finding())
                .cloned()
                .collect();
            let summary = BaselineSummary {
                file: line.file_path.clone(),
                function: target.function_name.clone(),
                bandit_count: bandit_details.len() as u32,
                semgrep_count: semgrep_details.len() as u32,
                bandit_details,
                semgrep_details,
            };
            info!(
                file = %summary.file,
                function = %summary.function,
                bandit = summary.bandit_count,
                semgrep = summary.semgrep_count,
                "Baseline captured"
            );
            store.entries.insert(target.key(), summary);
        }

        store.write_csv(layout, &project.name, cwe, Scanner::Bandit)?;
        store.write_csv(layout, &project.name, cwe, Scanner::Semgrep)?;
        Ok(store)
    }

    fn write_csv(
        &self,
        layout: &OutputLayout,
        project: &str,
        cwe: &str,
        scanner: Scanner,
    ) -> Result<(), GoadError> {
        let path = layout.baseline_csv(cwe, scanner, project);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(["檔案路徑", "函式名稱", "漏洞數量", "漏洞行號", "嚴重性", "問題描述"])?;
        for summary in self.entries.values() {
            let details = match scanner {
                Scanner::Bandit => &summary.bandit_details,
                Scanner::Semgrep => &summary.semgrep_details,
            };
            let count = details.len();
            let lines = details
                .iter()
                .map(|d| d.line_start.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let severities = details
                .iter()
                .filter_map(|d| d.severity.as_deref())
                .collect::<Vec<_>>()
                .join(";");
            let descriptions = details
                .iter()
                .filter_map(|d| d.description.as_deref())
                .collect::<Vec<_>>()
                .join(" | ");
            writer.write_record([
                summary.file.as_str(),
                summary.function.as_str(),
                &count.to_string(),
                &lines,
                &severities,
                &descriptions,
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reload a previously captured baseline from its CSVs — the
    /// pristine files are gone once round 1's query phase is kept, so a
    /// resumed run can never re-scan them.
    pub fn load(layout: &OutputLayout, project: &str, cwe: &str) -> Result<Option<Self>, GoadError> {
        let bandit_path = layout.baseline_csv(cwe, Scanner::Bandit, project);
        let semgrep_path = layout.baseline_csv(cwe, Scanner::Semgrep, project);
        if !bandit_path.exists() && !semgrep_path.exists() {
            return Ok(None);
        }

        let mut store = Self::default();
        for (scanner, path) in [(Scanner::Bandit, bandit_path), (Scanner::Semgrep, semgrep_path)] {
            if !path.exists() {
                continue;
            }
            let mut reader = csv::Reader::from_path(&path)?;
            for result in reader.records() {
                let record = result?;
                let file = record.get(0).unwrap_or("").trim().to_string();
                let function = record.get(1).unwrap_or("").trim().to_string();
                let count: u32 = record.get(2).unwrap_or("0").trim().parse().unwrap_or(0);
                if file.is_empty() || function.is_empty() {
                    continue;
                }
                let key = format!("{}::{}", file, function);
                let entry = store.entries.entry(key).or_insert_with(|| BaselineSummary {
                    file,
                    function,
                    ..Default::default()
                });
                match scanner {
                    Scanner::Bandit => entry.bandit_count = count,
                    Scanner::Semgrep => entry.semgrep_count = count,
                }
            }
        }
        Ok(Some(store))
    }

    pub fn get(&self, key: &str) -> Option<&BaselineSummary> {
        self.entries.get(key)
    }

    pub fn counts(&self, key: &str) -> (u32, u32) {
        self.entries
            .get(key)
            .map(|s| (s.bandit_count, s.semgrep_count))
            .unwrap_or((0, 0))
    }

    pub fn totals(&self) -> (u32, u32) {
        self.entries.values().fold((0, 0), |(b, s), e| (b + e.bandit_count, s + e.semgrep_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;

    struct StubScanner {
        records: Vec<ScanRecord>,
    }

    #[async_trait]
    impl CweScanner for StubScanner {
        async fn scan_file(&self, _request: &ScanRequest) -> Vec<ScanRecord> {
            self.records.clone()
        }
        fn available_scanners(&self) -> Vec<Scanner> {
            vec![Scanner::Bandit, Scanner::Semgrep]
        }
    }

    #[tokio::test]
    async fn test_capture_counts_and_writes_csvs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let project_root = dir.path().join("projects/demo");
        std::fs::create_dir_all(&project_root).unwrap();
        let project = Project::new(&project_root);

        let mut finding = ScanRecord::finding(Scanner::Bandit, "src/crypto.py", 4);
        finding.severity = Some("MEDIUM".into());
        let scanner = StubScanner {
            records: vec![finding, ScanRecord::safe_marker(Scanner::Semgrep, "src/crypto.py")],
        };

        let lines = crate::models::parse_prompt_file("src/crypto.py|make_key()\n");
        let store = BaselineStore::capture(&scanner, &project, &lines, "327", &layout).await.unwrap();

        assert_eq!(store.counts("src/crypto.py::make_key()"), (1, 0));
        assert_eq!(store.totals(), (1, 0));
        assert!(layout.baseline_csv("327", Scanner::Bandit, "demo").exists());
        assert!(layout.baseline_csv("327", Scanner::Semgrep, "demo").exists());
    }

    #[tokio::test]
    async fn test_load_roundtrips_counts() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let project_root = dir.path().join("projects/demo");
        std::fs::create_dir_all(&project_root).unwrap();
        let project = Project::new(&project_root);
        let scanner = StubScanner {
            records: vec![ScanRecord::finding(Scanner::Semgrep, "src/crypto.py", 7)],
        };
        let lines = crate::models::parse_prompt_file("src/crypto.py|make_key()\n");
        BaselineStore::capture(&scanner, &project, &lines, "327", &layout).await.unwrap();

        let reloaded = BaselineStore::load(&layout, "demo", "327").unwrap().unwrap();
        assert_eq!(reloaded.counts("src/crypto.py::make_key()"), (0, 1));
        assert!(BaselineStore::load(&layout, "other", "327").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_target_counts_zero() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let project = Project::new(&dir.path().join("projects/demo"));
        std::fs::create_dir_all(&project.root).unwrap();
        let scanner = StubScanner { records: vec![] };
        let store = BaselineStore::capture(&scanner, &project, &[], "327", &layout).await.unwrap();
        assert_eq!(store.counts("a.py::f()"), (0, 0));
    }
}
