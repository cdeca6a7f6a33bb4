//! Semgrep invocation and report parsing.

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::GoadError;
use crate::models::{ScanRecord, Scanner};

use super::context::enclosing_function;

/// Run `semgrep scan` with one `--config` per rule under a hard timeout
/// and return the report JSON read back from the output file.
pub async fn run(
    file: &Path,
    configs: &[&str],
    output: &Path,
    timeout: Duration,
) -> Result<String, GoadError> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut command = tokio::process::Command::new("semgrep");
    command.arg("scan");
    for config in configs {
        command.args(["--config", config]);
    }
    command
        .args(["--json", "--output"])
        .arg(output)
        .args(["--quiet", "--disable-version-check", "--metrics", "off"])
        .arg(file)
        .kill_on_drop(true);

    debug!(file = %file.display(), configs = configs.len(), "Running semgrep");
    let result = tokio::time::timeout(timeout, command.output()).await;
    match result {
        Err(_) => Err(GoadError::Timeout(format!(
            "semgrep timed out after {}s on {}",
            timeout.as_secs(),
            file.display()
        ))),
        Ok(Err(e)) => Err(GoadError::Scanner(format!("semgrep failed to start: {}", e))),
        Ok(Ok(_)) => tokio::fs::read_to_string(output)
            .await
            .map_err(|e| GoadError::Scanner(format!("semgrep produced no report: {}", e))),
    }
}

/// True when a `metadata.cwe` entry names the requested CWE, matching
/// both padded (`CWE-022`) and unpadded (`CWE-22`) forms.
fn cwe_entry_matches(entry: &str, requested: &str) -> bool {
    let Ok(requested_num) = requested.trim_start_matches('0').parse::<u32>() else {
        return false;
    };
    let re = Regex::new(r"CWE-0*(\d+)").unwrap();
    let matched = re
        .captures_iter(entry)
        .any(|cap| cap[1].parse::<u32>().map(|n| n == requested_num).unwrap_or(false));
    matched
}

fn metadata_cwe_matches(metadata: &Value, requested: &str) -> bool {
    match metadata.get("cwe") {
        Some(Value::String(s)) => cwe_entry_matches(s, requested),
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(|v| v.as_str())
            .any(|s| cwe_entry_matches(s, requested)),
        _ => false,
    }
}

/// Parse a Semgrep JSON report, keeping only findings whose metadata
/// names the requested CWE. Always yields at least one record.
pub fn parse_report(
    json: &str,
    file_path: &str,
    cwe: &str,
    source: Option<&str>,
    supplied_function: Option<&str>,
) -> Vec<ScanRecord> {
    let report: Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            warn!(file = file_path, error = %e, "Unparseable semgrep report");
            return vec![ScanRecord::failed(
                Scanner::Semgrep,
                file_path,
                &format!("Semgrep report parse error: {}", e),
            )];
        }
    };

    let mut records = Vec::new();

    for error in report.get("errors").and_then(|v| v.as_array()).into_iter().flatten() {
        let message = error
            .get("message")
            .or_else(|| error.get("long_msg"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown semgrep error");
        records.push(ScanRecord::failed(Scanner::Semgrep, file_path, message));
    }

    for finding in report.get("results").and_then(|v| v.as_array()).into_iter().flatten() {
        let extra = finding.get("extra").cloned().unwrap_or(Value::Null);
        let metadata = extra.get("metadata").cloned().unwrap_or(Value::Null);

        // Rules from broad rulesets may flag other weaknesses; keep only
        // results attributed to the requested class.
        if !metadata_cwe_matches(&metadata, cwe) {
            continue;
        }

        let line = finding
            .get("start")
            .and_then(|v| v.get("line"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let end_line = finding
            .get("end")
            .and_then(|v| v.get("line"))
            .and_then(|v| v.as_u64())
            .unwrap_or(line as u64) as u32;

        let mut record = ScanRecord::finding(Scanner::Semgrep, file_path, line);
        record.line_end = end_line;
        record.severity = metadata
            .get("impact")
            .and_then(|v| v.as_str())
            .or_else(|| extra.get("severity").and_then(|v| v.as_str()))
            .map(str::to_string);
        record.confidence = Some(
            metadata
                .get("confidence")
                .and_then(|v| v.as_str())
                .unwrap_or("MEDIUM")
                .to_string(),
        );
        record.description = extra.get("message").and_then(|v| v.as_str()).map(str::to_string);

        if let Some(src) = source {
            if let Some(ctx) = enclosing_function(src, line) {
                record.function_name = Some(ctx.name);
                record.function_start_line = Some(ctx.start_line);
                record.function_end_line = Some(ctx.end_line);
            }
        }
        if let Some(name) = supplied_function {
            record.function_name = Some(name.to_string());
        }
        records.push(record);
    }

    if records.is_empty() {
        records.push(ScanRecord::safe_marker(Scanner::Semgrep, file_path));
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScanStatus;

    const REPORT: &str = r#"{
        "errors": [],
        "results": [
            {
                "path": "src/crypto.py",
                "start": {"line": 4, "col": 14},
                "end": {"line": 4, "col": 36},
                "extra": {
                    "severity": "WARNING",
                    "message": "Detected MD5 hash algorithm which is considered insecure.",
                    "metadata": {
                        "cwe": ["CWE-327: Use of a Broken or Risky Cryptographic Algorithm"],
                        "impact": "HIGH",
                        "confidence": "HIGH"
                    }
                }
            },
            {
                "path": "src/crypto.py",
                "start": {"line": 9, "col": 1},
                "end": {"line": 9, "col": 10},
                "extra": {
                    "severity": "ERROR",
                    "message": "SQL injection risk.",
                    "metadata": {"cwe": ["CWE-89: SQL Injection"]}
                }
            }
        ]
    }"#;

    #[test]
    fn test_cwe_filter_keeps_only_requested_class() {
        let records = parse_report(REPORT, "src/crypto.py", "327", None, None);
        assert_eq!(records.len(), 1);
        assert!(records[0].is_finding());
        assert_eq!(records[0].line_start, 4);
        assert_eq!(records[0].severity.as_deref(), Some("HIGH"));
        assert_eq!(records[0].confidence.as_deref(), Some("HIGH"));
    }

    #[test]
    fn test_padded_and_unpadded_forms_match() {
        assert!(cwe_entry_matches("CWE-022: Path Traversal", "022"));
        assert!(cwe_entry_matches("CWE-22: Path Traversal", "022"));
        assert!(!cwe_entry_matches("CWE-220: Something else", "022"));
    }

    #[test]
    fn test_confidence_defaults_to_medium() {
        let json = r#"{"errors": [], "results": [{
            "path": "a.py",
            "start": {"line": 2},
            "end": {"line": 2},
            "extra": {"severity": "WARNING", "message": "m", "metadata": {"cwe": "CWE-327"}}
        }]}"#;
        let records = parse_report(json, "a.py", "327", None, None);
        assert_eq!(records[0].confidence.as_deref(), Some("MEDIUM"));
        // impact absent: falls back to extra.severity
        assert_eq!(records[0].severity.as_deref(), Some("WARNING"));
    }

    #[test]
    fn test_no_matching_findings_yield_safe_marker() {
        let records = parse_report(REPORT, "src/crypto.py", "078", None, None);
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_finding());
        assert_eq!(records[0].status, ScanStatus::Success);
    }

    #[test]
    fn test_errors_become_failed_records() {
        let json = r#"{"errors": [{"message": "invalid rule schema"}], "results": []}"#;
        let records = parse_report(json, "a.py", "327", None, None);
        assert_eq!(records[0].status, ScanStatus::Failed);
        assert!(records[0].failure_reason.as_deref().unwrap().contains("invalid rule"));
    }
}
