use std::path::PathBuf;

use console::style;

use crate::errors::GoadError;
use crate::models::ScanStatus;
use crate::paths::OutputLayout;
use crate::scanner::{rules, CliScannerAdapter, CweScanner, ScanRequest};

use super::commands::ScanArgs;

pub async fn handle_scan(args: ScanArgs) -> Result<(), GoadError> {
    if !rules::is_supported(&args.cwe) {
        return Err(GoadError::Config(format!(
            "Unsupported CWE: {} (supported: {})",
            args.cwe,
            rules::SUPPORTED_CWES.join(", ")
        )));
    }

    let root = PathBuf::from(&args.root);
    let layout = OutputLayout::new(&root);
    let file = PathBuf::from(&args.file);
    let relative = file
        .strip_prefix(&root)
        .unwrap_or(&file)
        .to_string_lossy()
        .to_string();

    let adapter = CliScannerAdapter::detect(layout).await;
    if adapter.available_scanners().is_empty() {
        return Err(GoadError::Scanner(
            "Neither bandit nor semgrep is available on PATH".into(),
        ));
    }

    let request = ScanRequest {
        absolute_path: file,
        relative_path: relative,
        cwe_id: args.cwe.clone(),
        project: None,
        round: None,
        function: None,
    };

    let spinner = indicatif::ProgressBar::new_spinner();
    spinner.set_message(format!("Scanning for CWE-{}…", args.cwe));
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));
    let records = adapter.scan_file(&request).await;
    spinner.finish_and_clear();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    for record in &records {
        match record.status {
            ScanStatus::Failed => {
                println!(
                    "{} [{}] {}",
                    style("FAILED").red().bold(),
                    record.scanner.label(),
                    record.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
            ScanStatus::Success if record.is_finding() => {
                println!(
                    "{} [{}] line {} {} — {}",
                    style("VULN").yellow().bold(),
                    record.scanner.label(),
                    record.line_start,
                    record.function_name.as_deref().unwrap_or("<module>"),
                    record.description.as_deref().unwrap_or("")
                );
            }
            ScanStatus::Success => {
                println!("{} [{}] no findings", style("SAFE").green(), record.scanner.label());
            }
        }
    }
    Ok(())
}
