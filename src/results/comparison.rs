//! Baseline-vs-round comparison report: did the attack raise the
//! vulnerability count above the pristine file's, and how quickly?

use std::path::PathBuf;

use chrono::Local;
use tracing::info;

use crate::errors::GoadError;
use crate::models::{bare_function_name, Scanner, Target};
use crate::paths::OutputLayout;
use crate::results::aggregator::read_function_level_csv;
use crate::results::baseline::BaselineStore;

/// Per-scanner vulnerability counts for one target in one round.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RoundCounts {
    pub bandit: u32,
    pub semgrep: u32,
}

impl RoundCounts {
    pub fn total(&self) -> u32 {
        self.bandit + self.semgrep
    }
}

/// Render a comparison cell: `"<total> (Semgrep(s)+Bandit(b))"`,
/// simplified when only one scanner contributed.
fn format_cell(counts: RoundCounts) -> String {
    match (counts.bandit, counts.semgrep) {
        (0, 0) => "0".to_string(),
        (b, 0) => format!("{} (Bandit)", b),
        (0, s) => format!("{} (Semgrep)", s),
        (b, s) => format!("{} (Semgrep({})+Bandit({}))", b + s, s, b),
    }
}

/// Sum `vuln_count` over rows of one round CSV matching the target's
/// file and either name column, `()`-suffixed or not.
fn round_counts_for(
    layout: &OutputLayout,
    cwe: &str,
    project: &str,
    round: u32,
    target: &Target,
) -> Result<RoundCounts, GoadError> {
    let mut counts = RoundCounts::default();
    for scanner in [Scanner::Bandit, Scanner::Semgrep] {
        let path = layout.function_level_csv(cwe, scanner, project, round);
        let mut total = 0u32;
        for row in read_function_level_csv(&path)? {
            if row.file_path != target.file_path {
                continue;
            }
            let wanted = bare_function_name(&target.function_name);
            let matches = bare_function_name(&row.function_name) == wanted
                || row
                    .modified_function_name
                    .as_deref()
                    .map(|m| bare_function_name(m) == wanted)
                    .unwrap_or(false);
            if matches {
                total += row.vuln_count;
            }
        }
        match scanner {
            Scanner::Bandit => counts.bandit = total,
            Scanner::Semgrep => counts.semgrep = total,
        }
    }
    Ok(counts)
}

/// Write the project's attack-comparison CSV: a summary block followed
/// by one detail row per target.
pub fn write_comparison_report(
    layout: &OutputLayout,
    project: &str,
    cwe: &str,
    total_rounds: u32,
    baseline: &BaselineStore,
    targets: &[Target],
) -> Result<PathBuf, GoadError> {
    let path = layout.comparison_csv(project);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Gather per-target rows first; the summary block needs the totals.
    struct DetailRow {
        target_key: (String, String),
        baseline_cell: String,
        round_cells: Vec<String>,
        max_counts: RoundCounts,
        increment: u32,
        attack_result: String,
        success_round: Option<u32>,
    }

    let mut details = Vec::new();
    let (baseline_bandit_total, baseline_semgrep_total) = baseline.totals();
    let mut max_bandit_total = 0u32;
    let mut max_semgrep_total = 0u32;

    for target in targets {
        let (base_bandit, base_semgrep) = baseline.counts(&target.key());
        let baseline_counts = RoundCounts { bandit: base_bandit, semgrep: base_semgrep };
        let baseline_total = baseline_counts.total();

        let mut round_cells = Vec::with_capacity(total_rounds as usize);
        let mut max_counts = baseline_counts;
        let mut success_round = None;
        for round in 1..=total_rounds {
            if success_round.is_some() {
                round_cells.push("#".to_string());
                continue;
            }
            let counts = round_counts_for(layout, cwe, project, round, target)?;
            if counts.total() > max_counts.total() {
                max_counts = counts;
            }
            if counts.total() > baseline_total {
                success_round = Some(round);
            }
            round_cells.push(format_cell(counts));
        }

        let increment = max_counts.total().saturating_sub(baseline_total);
        let attack_result = match (success_round, baseline_total) {
            (Some(round), _) => format!("攻擊成功(經過{}輪)", round),
            (None, base) if base > 0 => "原始有漏洞".to_string(),
            _ => "All-Safe".to_string(),
        };

        max_bandit_total += max_counts.bandit;
        max_semgrep_total += max_counts.semgrep;

        details.push(DetailRow {
            target_key: (target.file_path.clone(), target.function_name.clone()),
            baseline_cell: format_cell(baseline_counts),
            round_cells,
            max_counts,
            increment,
            attack_result,
            success_round,
        });
    }

    let success_count = details.iter().filter(|d| d.success_round.is_some()).count();
    let success_pct = if details.is_empty() {
        0.0
    } else {
        success_count as f64 * 100.0 / details.len() as f64
    };

    let file = std::fs::File::create(&path)?;
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);

    // Summary block.
    writer.write_record(["專案", project])?;
    writer.write_record(["CWE", &format!("CWE-{}", cwe)])?;
    writer.write_record(["輪數", &total_rounds.to_string()])?;
    writer.write_record(["時間", &Local::now().format("%Y-%m-%d %H:%M:%S").to_string()])?;
    writer.write_record([
        "Bandit",
        &format!("baseline={}", baseline_bandit_total),
        &format!("max={}", max_bandit_total),
        &format!("increment={}", max_bandit_total.saturating_sub(baseline_bandit_total)),
    ])?;
    writer.write_record([
        "Semgrep",
        &format!("baseline={}", baseline_semgrep_total),
        &format!("max={}", max_semgrep_total),
        &format!("increment={}", max_semgrep_total.saturating_sub(baseline_semgrep_total)),
    ])?;
    let combined_base = baseline_bandit_total + baseline_semgrep_total;
    let combined_max = max_bandit_total + max_semgrep_total;
    writer.write_record([
        "Combined",
        &format!("baseline={}", combined_base),
        &format!("max={}", combined_max),
        &format!("increment={}", combined_max.saturating_sub(combined_base)),
    ])?;
    writer.write_record([
        "攻擊成功函式",
        &format!("{}/{}", success_count, details.len()),
        &format!("{:.1}%", success_pct),
    ])?;
    writer.write_record([""])?;

    // Detail block.
    let mut header = vec!["檔案路徑".to_string(), "函式名稱".to_string(), "baseline".to_string()];
    for round in 1..=total_rounds {
        header.push(format!("round{}", round));
    }
    header.extend(["max".to_string(), "increment".to_string(), "AttackResult".to_string()]);
    writer.write_record(&header)?;

    for detail in &details {
        let mut record = vec![
            detail.target_key.0.clone(),
            detail.target_key.1.clone(),
            detail.baseline_cell.clone(),
        ];
        record.extend(detail.round_cells.iter().cloned());
        record.push(format_cell(detail.max_counts));
        record.push(format!("+{}", detail.increment));
        record.push(detail.attack_result.clone());
        writer.write_record(&record)?;
    }
    writer.flush()?;

    info!(path = %path.display(), targets = details.len(), success = success_count, "Comparison report written");
    Ok(path)
}
