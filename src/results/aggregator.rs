//! Per-round function-level scan CSVs: one row per target per scanner,
//! vulnerable or not, so that "scanned clean" stays distinguishable from
//! "scan failed".

use std::collections::BTreeSet;
use std::path::Path;

use tracing::debug;

use crate::errors::GoadError;
use crate::models::{ScanRecord, ScanStatus, Scanner};

const AS_HEADERS: [&str; 13] = [
    "輪數",
    "行號",
    "檔案路徑",
    "修改前函式名稱",
    "修改後函式名稱",
    "漏洞數量",
    "漏洞行號",
    "掃描器",
    "信心度",
    "嚴重性",
    "問題描述",
    "掃描狀態",
    "失敗原因",
];

const CONTROL_HEADERS: [&str; 12] = [
    "輪數",
    "行號",
    "檔案路徑",
    "函式名稱",
    "漏洞數量",
    "漏洞行號",
    "掃描器",
    "信心度",
    "嚴重性",
    "問題描述",
    "掃描狀態",
    "失敗原因",
];

/// One target to aggregate. `scan_name` is the symbol's name at scan
/// time (what the scanner records carry); the pre/post names are the
/// tracker-supplied values shown in the AS schema.
#[derive(Debug, Clone)]
pub struct AggregateTarget {
    pub file_path: String,
    pub scan_name: String,
    pub pre_phase1_name: String,
    pub post_phase1_name: String,
}

#[derive(Debug)]
pub struct AggregateRequest<'a> {
    pub round: u32,
    pub line_index: usize,
    pub targets: &'a [AggregateTarget],
    pub records: &'a [ScanRecord],
    pub scanner_filter: Scanner,
    /// Selects the two-name AS schema over the single-name control one.
    pub as_mode: bool,
    /// Append without a header when the file already exists; otherwise
    /// overwrite header-first.
    pub append_mode: bool,
}

/// Write (or append) the aggregated rows for one prompt line.
pub fn write_function_level_csv(path: &Path, request: &AggregateRequest) -> Result<(), GoadError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let write_header = !request.append_mode || !path.exists();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(request.append_mode)
        .write(true)
        .truncate(!request.append_mode)
        .open(path)?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

    if write_header {
        if request.as_mode {
            writer.write_record(AS_HEADERS)?;
        } else {
            writer.write_record(CONTROL_HEADERS)?;
        }
    }

    for target in request.targets {
        let row = synthesize_row(target, request);
        writer.write_record(&row)?;
    }
    writer.flush()?;
    debug!(path = %path.display(), targets = request.targets.len(), "Function-level rows written");
    Ok(())
}

fn synthesize_row(target: &AggregateTarget, request: &AggregateRequest) -> Vec<String> {
    let relevant: Vec<&ScanRecord> = request
        .records
        .iter()
        .filter(|r| r.scanner == request.scanner_filter && r.file_path == target.file_path)
        .collect();

    let failed = relevant.iter().find(|r| r.status == ScanStatus::Failed);
    if let Some(failure) = failed {
        let reason = failure.failure_reason.clone().unwrap_or_else(|| "Unknown error".into());
        return build_row(target, request, RowKind::Failed { reason });
    }

    let findings: Vec<&&ScanRecord> = relevant
        .iter()
        .filter(|r| r.is_finding() && r.function_name.as_deref() == Some(target.scan_name.as_str()))
        .collect();

    if !findings.is_empty() {
        let mut lines: BTreeSet<u32> = BTreeSet::new();
        for f in &findings {
            if f.all_vulnerability_lines.is_empty() {
                lines.insert(f.line_start);
            } else {
                lines.extend(f.all_vulnerability_lines.iter().copied());
            }
        }
        let join_set = |values: Vec<&str>| -> String {
            let set: BTreeSet<&str> = values.into_iter().collect();
            set.into_iter().collect::<Vec<_>>().join(";")
        };
        let scanners = join_set(findings.iter().map(|f| f.scanner.as_str()).collect());
        let confidences = join_set(findings.iter().filter_map(|f| f.confidence.as_deref()).collect());
        let severities = join_set(findings.iter().filter_map(|f| f.severity.as_deref()).collect());
        let descriptions = findings
            .iter()
            .filter_map(|f| f.description.as_deref())
            .collect::<Vec<_>>()
            .join(" | ");
        return build_row(
            target,
            request,
            RowKind::Vulnerable {
                count: findings.len() as u32,
                lines: lines.iter().map(|l| l.to_string()).collect::<Vec<_>>().join(","),
                scanners,
                confidences,
                severities,
                descriptions,
            },
        );
    }

    if relevant.iter().any(|r| r.status == ScanStatus::Success) {
        return build_row(target, request, RowKind::Safe);
    }

    let reason = format!("No scan results found for {}", request.scanner_filter.as_str());
    build_row(target, request, RowKind::Failed { reason })
}

enum RowKind {
    Vulnerable {
        count: u32,
        lines: String,
        scanners: String,
        confidences: String,
        severities: String,
        descriptions: String,
    },
    Safe,
    Failed { reason: String },
}

fn build_row(target: &AggregateTarget, request: &AggregateRequest, kind: RowKind) -> Vec<String> {
    let mut row = vec![request.round.to_string(), request.line_index.to_string(), target.file_path.clone()];
    if request.as_mode {
        row.push(target.pre_phase1_name.clone());
        row.push(target.post_phase1_name.clone());
    } else {
        row.push(target.scan_name.clone());
    }
    match kind {
        RowKind::Vulnerable { count, lines, scanners, confidences, severities, descriptions } => {
            row.extend([
                count.to_string(),
                lines,
                scanners,
                confidences,
                severities,
                descriptions,
                "success".into(),
                String::new(),
            ]);
        }
        RowKind::Safe => {
            row.extend([
                "0".into(),
                String::new(),
                request.scanner_filter.as_str().into(),
                String::new(),
                String::new(),
                String::new(),
                "success".into(),
                String::new(),
            ]);
        }
        RowKind::Failed { reason } => {
            row.extend([
                String::new(),
                String::new(),
                request.scanner_filter.as_str().into(),
                String::new(),
                String::new(),
                String::new(),
                "failed".into(),
                reason,
            ]);
        }
    }
    row
}

/// A row read back from a function-level CSV, schema-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLevelRow {
    pub round: u32,
    pub line_index: usize,
    pub file_path: String,
    /// The single name (control schema) or pre-phase-1 name (AS schema).
    pub function_name: String,
    /// AS schema only: the post-phase-1 name.
    pub modified_function_name: Option<String>,
    pub vuln_count: u32,
    pub status: String,
}

/// Read a function-level CSV written by either schema.
pub fn read_function_level_csv(path: &Path) -> Result<Vec<FunctionLevelRow>, GoadError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let position = |name: &str| headers.iter().position(|h| h == name);

    let file_col = position("檔案路徑");
    let pre_col = position("修改前函式名稱");
    let post_col = position("修改後函式名稱");
    let single_col = position("函式名稱");
    let count_col = position("漏洞數量");
    let status_col = position("掃描狀態");

    let (Some(file_col), Some(count_col), Some(status_col)) = (file_col, count_col, status_col)
    else {
        return Err(GoadError::Internal(format!(
            "Unrecognized function-level CSV header in {}",
            path.display()
        )));
    };

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let get = |col: Option<usize>| {
            col.and_then(|c| record.get(c)).unwrap_or("").trim().to_string()
        };
        let function_name = match (single_col, pre_col) {
            (Some(_), _) => get(single_col),
            (None, Some(_)) => get(pre_col),
            _ => String::new(),
        };
        rows.push(FunctionLevelRow {
            round: record.get(0).unwrap_or("0").trim().parse().unwrap_or(0),
            line_index: record.get(1).unwrap_or("0").trim().parse().unwrap_or(0),
            file_path: get(Some(file_col)),
            function_name,
            modified_function_name: post_col.map(|_| get(post_col)).filter(|s| !s.is_empty()),
            vuln_count: get(Some(count_col)).parse().unwrap_or(0),
            status: get(Some(status_col)),
        });
    }
    Ok(rows)
}
