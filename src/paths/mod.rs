//! Authoritative output layout. Every artifact path is produced here so
//! that writers and the resume scanner agree on names.

use std::path::{Path, PathBuf};

use crate::models::Scanner;

/// Directory-name fragments shared with the resume scanner.
pub fn round_dir_name(round: u32) -> String {
    format!("第{}輪", round)
}

pub fn phase_dir_name(phase: u8) -> String {
    format!("第{}道", phase)
}

pub const BASELINE_DIR_NAME: &str = "原始狀態";

/// Flatten a relative file path into a single filename component.
pub fn file_slug(relative_path: &str) -> String {
    relative_path.replace(['/', '\\'], "_")
}

#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    /// `root` is the workspace directory holding `projects/`, `output/`,
    /// `checkpoints/` and `assets/`.
    pub fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    // ---- ExecutionResult ----

    pub fn success_dir(&self, project: &str) -> PathBuf {
        self.output_dir().join("ExecutionResult").join("Success").join(project)
    }

    pub fn round_dir(&self, project: &str, round: u32) -> PathBuf {
        self.success_dir(project).join(round_dir_name(round))
    }

    pub fn phase_dir(&self, project: &str, round: u32, phase: u8) -> PathBuf {
        self.round_dir(project, round).join(phase_dir_name(phase))
    }

    /// Non-AS response artifact: `<ts>_第<line>行.md`.
    pub fn response_file(&self, project: &str, round: u32, timestamp: &str, line: usize) -> PathBuf {
        self.round_dir(project, round).join(format!("{}_第{}行.md", timestamp, line))
    }

    /// AS response artifact embeds file and function ahead of the line
    /// marker so the resume scanner still matches on `_第<line>行.md`.
    #[allow(clippy::too_many_arguments)]
    pub fn as_response_file(
        &self,
        project: &str,
        round: u32,
        phase: u8,
        timestamp: &str,
        file: &str,
        function: &str,
        line: usize,
    ) -> PathBuf {
        let func = function.trim_end_matches("()");
        self.phase_dir(project, round, phase)
            .join(format!("{}_{}_{}_第{}行.md", timestamp, file_slug(file), func, line))
    }

    pub fn function_name_query_dir(&self, project: &str) -> PathBuf {
        self.success_dir(project).join("FunctionName_query")
    }

    pub fn tracker_round_csv(&self, project: &str, round: u32) -> PathBuf {
        self.function_name_query_dir(project).join(format!("round{}.csv", round))
    }

    pub fn automation_log_dir(&self) -> PathBuf {
        self.output_dir().join("ExecutionResult").join("AutomationLog")
    }

    pub fn automation_report_dir(&self) -> PathBuf {
        self.output_dir().join("ExecutionResult").join("AutomationReport")
    }

    pub fn comparison_csv(&self, project: &str) -> PathBuf {
        self.output_dir()
            .join("ExecutionResult")
            .join("Comparison")
            .join(project)
            .join(format!("{}_attack_comparison.csv", project))
    }

    // ---- CWE_Result ----

    fn cwe_dir(&self, cwe: &str) -> PathBuf {
        self.output_dir().join("CWE_Result").join(format!("CWE-{}", cwe))
    }

    pub fn function_level_csv(&self, cwe: &str, scanner: Scanner, project: &str, round: u32) -> PathBuf {
        self.cwe_dir(cwe)
            .join(scanner.label())
            .join(project)
            .join(round_dir_name(round))
            .join(format!("{}_function_level_scan.csv", project))
    }

    pub fn baseline_csv(&self, cwe: &str, scanner: Scanner, project: &str) -> PathBuf {
        self.cwe_dir(cwe)
            .join(scanner.label())
            .join(project)
            .join(BASELINE_DIR_NAME)
            .join(format!("{}_baseline_scan.csv", project))
    }

    pub fn query_statistics_csv(&self, cwe: &str, project: &str) -> PathBuf {
        self.cwe_dir(cwe).join("query_statistics").join(format!("{}.csv", project))
    }

    // ---- OriginalScanResult ----

    pub fn raw_report_file(
        &self,
        scanner: Scanner,
        cwe: &str,
        project: &str,
        round: u32,
        relative_path: &str,
    ) -> PathBuf {
        self.output_dir()
            .join("OriginalScanResult")
            .join(scanner.label())
            .join(format!("CWE-{}", cwe))
            .join(project)
            .join(round_dir_name(round))
            .join(format!("{}_report.json", file_slug(relative_path)))
    }

    pub fn raw_single_file_report(&self, scanner: Scanner, cwe: &str, relative_path: &str) -> PathBuf {
        self.output_dir()
            .join("OriginalScanResult")
            .join(scanner.label())
            .join("single_file")
            .join(format!("CWE-{}", cwe))
            .join(format!("{}_report.json", file_slug(relative_path)))
    }

    // ---- vicious patterns / checkpoints / assets ----

    pub fn vicious_dir(&self, project: &str) -> PathBuf {
        self.output_dir().join("vicious_pattern").join(project)
    }

    pub fn checkpoint_file(&self) -> PathBuf {
        self.root.join("checkpoints").join("execution_checkpoint.json")
    }

    pub fn prompt_template_dir(&self) -> PathBuf {
        self.root.join("assets").join("prompt-template")
    }

    /// Optional per-CWE example snippet spliced into Phase-1 prompts.
    /// Keyed by the unpadded CWE number.
    pub fn cwe_example_file(&self, cwe: &str) -> PathBuf {
        let unpadded = cwe.trim_start_matches('0');
        self.root.join("assets").join("CWE").join(format!("{}.txt", unpadded))
    }

    /// Global prompt file used when `prompt_source_mode` is `global`.
    pub fn global_prompt_file(&self) -> PathBuf {
        self.root.join("prompts").join("prompt.txt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_and_phase_names() {
        assert_eq!(round_dir_name(2), "第2輪");
        assert_eq!(phase_dir_name(1), "第1道");
    }

    #[test]
    fn test_file_slug() {
        assert_eq!(file_slug("src/crypto.py"), "src_crypto.py");
    }

    #[test]
    fn test_function_level_csv_path() {
        let layout = OutputLayout::new(Path::new("/work"));
        let p = layout.function_level_csv("327", Scanner::Bandit, "demo", 2);
        assert_eq!(
            p,
            PathBuf::from("/work/output/CWE_Result/CWE-327/Bandit/demo/第2輪/demo_function_level_scan.csv")
        );
    }

    #[test]
    fn test_baseline_csv_path() {
        let layout = OutputLayout::new(Path::new("/work"));
        let p = layout.baseline_csv("327", Scanner::Semgrep, "demo");
        assert!(p.ends_with("CWE_Result/CWE-327/Semgrep/demo/原始狀態/demo_baseline_scan.csv"));
    }

    #[test]
    fn test_cwe_example_unpadded() {
        let layout = OutputLayout::new(Path::new("/work"));
        assert!(layout.cwe_example_file("078").ends_with("assets/CWE/78.txt"));
        assert!(layout.cwe_example_file("1333").ends_with("assets/CWE/1333.txt"));
    }

    #[test]
    fn test_response_file_suffix() {
        let layout = OutputLayout::new(Path::new("/w"));
        let p = layout.as_response_file("demo", 1, 2, "20250101_120000", "src/crypto.py", "make_key()", 3);
        let name = p.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_第3行.md"));
        assert!(name.contains("src_crypto.py"));
        assert!(name.contains("make_key"));
    }
}
