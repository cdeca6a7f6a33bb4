pub mod bandit;
pub mod context;
pub mod rules;
pub mod semgrep;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::{ScanRecord, Scanner};
use crate::paths::OutputLayout;

/// Timeout for scanning one file.
pub const SINGLE_FILE_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout when a whole project tree is scanned in one invocation.
pub const PROJECT_TIMEOUT: Duration = Duration::from_secs(300);

/// One scan request: a single file, a single CWE class.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub absolute_path: PathBuf,
    pub relative_path: String,
    pub cwe_id: String,
    pub project: Option<String>,
    pub round: Option<u32>,
    /// Externally known function name; overrides context extraction in
    /// the produced records.
    pub function: Option<String>,
}

/// Seam between the experiment pipeline and the scanner binaries, so the
/// round controllers can be exercised without bandit/semgrep installed.
#[async_trait]
pub trait CweScanner: Send + Sync {
    /// Scan one file for one CWE. Every invoked scanner contributes at
    /// least one record: findings, a safe marker, or a failure.
    async fn scan_file(&self, request: &ScanRequest) -> Vec<ScanRecord>;

    fn available_scanners(&self) -> Vec<Scanner>;
}

/// Production adapter invoking the `bandit` and `semgrep` CLIs.
pub struct CliScannerAdapter {
    layout: OutputLayout,
    bandit_available: bool,
    semgrep_available: bool,
    timeout: Duration,
}

impl CliScannerAdapter {
    /// Probe which scanner binaries exist; a missing scanner is silently
    /// omitted from every subsequent scan.
    pub async fn detect(layout: OutputLayout) -> Self {
        let bandit_available = probe_binary("bandit").await;
        let semgrep_available = probe_binary("semgrep").await;
        if !bandit_available {
            warn!("bandit not found on PATH — bandit scans disabled");
        }
        if !semgrep_available {
            warn!("semgrep not found on PATH — semgrep scans disabled");
        }
        info!(bandit = bandit_available, semgrep = semgrep_available, "Scanner probe complete");
        Self { layout, bandit_available, semgrep_available, timeout: SINGLE_FILE_TIMEOUT }
    }

    /// Use the project-wide timeout instead of the single-file one.
    pub fn with_project_scope(mut self) -> Self {
        self.timeout = PROJECT_TIMEOUT;
        self
    }

    fn report_path(&self, scanner: Scanner, request: &ScanRequest) -> PathBuf {
        match (&request.project, request.round) {
            (Some(project), Some(round)) => self.layout.raw_report_file(
                scanner,
                &request.cwe_id,
                project,
                round,
                &request.relative_path,
            ),
            _ => self.layout.raw_single_file_report(scanner, &request.cwe_id, &request.relative_path),
        }
    }

    async fn run_bandit(&self, request: &ScanRequest, source: Option<&str>) -> Vec<ScanRecord> {
        let Some(tests) = rules::bandit_tests(&request.cwe_id) else {
            return Vec::new();
        };
        let output = self.report_path(Scanner::Bandit, request);
        match bandit::run(&request.absolute_path, tests, &output, self.timeout).await {
            Ok(json) => bandit::parse_report(
                &json,
                &request.relative_path,
                source,
                request.function.as_deref(),
            ),
            Err(e) => vec![ScanRecord::failed(Scanner::Bandit, &request.relative_path, &e.to_string())],
        }
    }

    async fn run_semgrep(&self, request: &ScanRequest, source: Option<&str>) -> Vec<ScanRecord> {
        let configs = rules::semgrep_configs(&request.cwe_id);
        if configs.is_empty() {
            return Vec::new();
        }
        let output = self.report_path(Scanner::Semgrep, request);
        match semgrep::run(&request.absolute_path, &configs, &output, self.timeout).await {
            Ok(json) => semgrep::parse_report(
                &json,
                &request.relative_path,
                &request.cwe_id,
                source,
                request.function.as_deref(),
            ),
            Err(e) => vec![ScanRecord::failed(Scanner::Semgrep, &request.relative_path, &e.to_string())],
        }
    }
}

async fn probe_binary(name: &str) -> bool {
    tokio::process::Command::new(name)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

#[async_trait]
impl CweScanner for CliScannerAdapter {
    async fn scan_file(&self, request: &ScanRequest) -> Vec<ScanRecord> {
        if !request.absolute_path.exists() {
            let reason = format!("Target file not found: {}", request.absolute_path.display());
            return self
                .available_scanners()
                .into_iter()
                .map(|s| ScanRecord::failed(s, &request.relative_path, &reason))
                .collect();
        }

        // Read once; both parsers use it for function-context extraction.
        let source = tokio::fs::read_to_string(&request.absolute_path).await.ok();

        let mut records = Vec::new();
        if self.bandit_available {
            records.extend(self.run_bandit(request, source.as_deref()).await);
        }
        if self.semgrep_available {
            records.extend(self.run_semgrep(request, source.as_deref()).await);
        }
        records
    }

    fn available_scanners(&self) -> Vec<Scanner> {
        let mut scanners = Vec::new();
        if self.bandit_available {
            scanners.push(Scanner::Bandit);
        }
        if self.semgrep_available {
            scanners.push(Scanner::Semgrep);
        }
        scanners
    }
}
