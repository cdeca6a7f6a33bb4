use serde::{Deserialize, Serialize};

/// The two static analyzers the adapter drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scanner {
    Bandit,
    Semgrep,
}

impl Scanner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scanner::Bandit => "bandit",
            Scanner::Semgrep => "semgrep",
        }
    }

    /// Capitalized form used in directory names and matrix labels.
    pub fn label(&self) -> &'static str {
        match self {
            Scanner::Bandit => "Bandit",
            Scanner::Semgrep => "Semgrep",
        }
    }
}

impl std::fmt::Display for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Success,
    Failed,
}

/// One scanner observation for one file.
///
/// Three shapes share this type: a real finding (`line_start > 0`), the
/// safe marker (`Success` with `vulnerability_count == 0`), and a failure
/// carrying `failure_reason`. The safe marker must always be emitted so
/// that "scanned clean" is distinguishable from "scan failed".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub scanner: Scanner,
    pub file_path: String,
    pub status: ScanStatus,
    pub vulnerability_count: u32,
    pub line_start: u32,
    pub line_end: u32,
    pub all_vulnerability_lines: Vec<u32>,
    pub severity: Option<String>,
    pub confidence: Option<String>,
    pub description: Option<String>,
    pub function_name: Option<String>,
    pub function_start_line: Option<u32>,
    pub function_end_line: Option<u32>,
    pub failure_reason: Option<String>,
}

impl ScanRecord {
    pub fn finding(scanner: Scanner, file_path: &str, line: u32) -> Self {
        Self {
            scanner,
            file_path: file_path.to_string(),
            status: ScanStatus::Success,
            vulnerability_count: 1,
            line_start: line,
            line_end: line,
            all_vulnerability_lines: vec![line],
            severity: None,
            confidence: None,
            description: None,
            function_name: None,
            function_start_line: None,
            function_end_line: None,
            failure_reason: None,
        }
    }

    /// "Successfully scanned, found nothing."
    pub fn safe_marker(scanner: Scanner, file_path: &str) -> Self {
        Self {
            scanner,
            file_path: file_path.to_string(),
            status: ScanStatus::Success,
            vulnerability_count: 0,
            line_start: 0,
            line_end: 0,
            all_vulnerability_lines: Vec::new(),
            severity: None,
            confidence: None,
            description: None,
            function_name: None,
            function_start_line: None,
            function_end_line: None,
            failure_reason: None,
        }
    }

    pub fn failed(scanner: Scanner, file_path: &str, reason: &str) -> Self {
        Self {
            scanner,
            file_path: file_path.to_string(),
            status: ScanStatus::Failed,
            vulnerability_count: 0,
            line_start: 0,
            line_end: 0,
            all_vulnerability_lines: Vec::new(),
            severity: None,
            confidence: None,
            description: None,
            function_name: None,
            function_start_line: None,
            function_end_line: None,
            failure_reason: Some(reason.to_string()),
        }
    }

    /// A real finding, as opposed to the safe marker.
    pub fn is_finding(&self) -> bool {
        self.status == ScanStatus::Success && self.line_start > 0
    }
}
