//! Bandit invocation and report parsing.

use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::GoadError;
use crate::models::{ScanRecord, Scanner};

use super::context::enclosing_function;

/// Run `bandit <file> -t <tests> -f json -o <out>` under a hard timeout
/// and return the report JSON read back from the output file.
pub async fn run(
    file: &Path,
    tests: &str,
    output: &Path,
    timeout: Duration,
) -> Result<String, GoadError> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut command = tokio::process::Command::new("bandit");
    command
        .arg(file)
        .args(["-t", tests, "-f", "json", "-o"])
        .arg(output)
        .kill_on_drop(true);

    debug!(file = %file.display(), tests, "Running bandit");
    let result = tokio::time::timeout(timeout, command.output()).await;
    match result {
        Err(_) => Err(GoadError::Timeout(format!(
            "bandit timed out after {}s on {}",
            timeout.as_secs(),
            file.display()
        ))),
        Ok(Err(e)) => Err(GoadError::Scanner(format!("bandit failed to start: {}", e))),
        // Bandit exits non-zero when it has findings; the report file is
        // the source of truth, not the exit code.
        Ok(Ok(_)) => tokio::fs::read_to_string(output)
            .await
            .map_err(|e| GoadError::Scanner(format!("bandit produced no report: {}", e))),
    }
}

/// Parse a Bandit JSON report into scan records. Always yields at least
/// one record: findings, failures from `errors[]`, or the safe marker.
pub fn parse_report(
    json: &str,
    file_path: &str,
    source: Option<&str>,
    supplied_function: Option<&str>,
) -> Vec<ScanRecord> {
    let report: Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            warn!(file = file_path, error = %e, "Unparseable bandit report");
            return vec![ScanRecord::failed(
                Scanner::Bandit,
                file_path,
                &format!("Bandit report parse error: {}", e),
            )];
        }
    };

    let mut records = Vec::new();

    for error in report.get("errors").and_then(|v| v.as_array()).into_iter().flatten() {
        let filename = error.get("filename").and_then(|v| v.as_str()).unwrap_or(file_path);
        let reason = error.get("reason").and_then(|v| v.as_str()).unwrap_or("unknown error");
        records.push(ScanRecord::failed(Scanner::Bandit, filename, reason));
    }

    for finding in report.get("results").and_then(|v| v.as_array()).into_iter().flatten() {
        let line = finding.get("line_number").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let mut record = ScanRecord::finding(Scanner::Bandit, file_path, line);
        record.severity = finding
            .get("issue_severity")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        record.confidence = finding
            .get("issue_confidence")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        record.description = finding
            .get("issue_text")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        if let Some(src) = source {
            if let Some(ctx) = enclosing_function(src, line) {
                record.function_name = Some(ctx.name);
                record.function_start_line = Some(ctx.start_line);
                record.function_end_line = Some(ctx.end_line);
            }
        }
        // An externally supplied name wins, but the extracted bounds stay.
        if let Some(name) = supplied_function {
            record.function_name = Some(name.to_string());
        }
        records.push(record);
    }

    if records.is_empty() {
        records.push(ScanRecord::safe_marker(Scanner::Bandit, file_path));
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScanStatus;

    const REPORT_WITH_FINDING: &str = r#"{
        "errors": [],
        "results": [{
            "filename": "src/crypto.py",
            "line_number": 4,
            "col_offset": 13,
            "issue_severity": "MEDIUM",
            "issue_confidence": "HIGH",
            "issue_text": "Use of weak MD5 hash for security.",
            "test_id": "B324"
        }]
    }"#;

    const SOURCE: &str = "\
import hashlib

def make_key(seed):
    digest = hashlib.md5(seed)
    return digest.hexdigest()
";

    #[test]
    fn test_parse_finding_with_context() {
        let records = parse_report(REPORT_WITH_FINDING, "src/crypto.py", Some(SOURCE), None);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert!(r.is_finding());
        assert_eq!(r.line_start, 4);
        assert_eq!(r.severity.as_deref(), Some("MEDIUM"));
        assert_eq!(r.function_name.as_deref(), Some("make_key()"));
        assert_eq!(r.function_start_line, Some(3));
    }

    #[test]
    fn test_supplied_function_overrides_extracted_name() {
        let records =
            parse_report(REPORT_WITH_FINDING, "src/crypto.py", Some(SOURCE), Some("renamed_key()"));
        let r = &records[0];
        assert_eq!(r.function_name.as_deref(), Some("renamed_key()"));
        // Bounds come from extraction regardless of the override.
        assert_eq!(r.function_start_line, Some(3));
    }

    #[test]
    fn test_empty_results_yield_safe_marker() {
        let records = parse_report(r#"{"errors": [], "results": []}"#, "a.py", None, None);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ScanStatus::Success);
        assert_eq!(records[0].vulnerability_count, 0);
        assert!(!records[0].is_finding());
    }

    #[test]
    fn test_errors_become_failed_records() {
        let json = r#"{"errors": [{"filename": "a.py", "reason": "syntax error while parsing AST"}], "results": []}"#;
        let records = parse_report(json, "a.py", None, None);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ScanStatus::Failed);
        assert!(records[0].failure_reason.as_deref().unwrap().contains("syntax error"));
    }

    #[test]
    fn test_garbage_json_is_failed_record() {
        let records = parse_report("not json", "a.py", None, None);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ScanStatus::Failed);
    }
}
