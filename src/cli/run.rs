use std::path::PathBuf;
use std::sync::Arc;

use console::style;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::checkpoint::CheckpointManager;
use crate::config::parse_settings;
use crate::errors::GoadError;
use crate::paths::OutputLayout;
use crate::pipeline::Driver;
use crate::scanner::CliScannerAdapter;
use crate::surface::ScriptedSurface;

use super::commands::RunArgs;

pub async fn handle_run(args: RunArgs) -> Result<(), GoadError> {
    let root = PathBuf::from(&args.root);
    let layout = OutputLayout::new(&root);

    if !args.pipeline_testing {
        return Err(GoadError::Config(
            "No GUI automation backend is linked into this binary. Run with \
             --pipeline-testing to drive the scripted surface, or embed goad as a \
             library and supply your IdeSurface implementation."
                .into(),
        ));
    }

    // Resume adoption: a resumable checkpoint supplies settings and
    // project list verbatim, bypassing the settings file.
    let checkpoint = CheckpointManager::new(layout.checkpoint_file());
    let resume = if args.resume && checkpoint.has_resumable_checkpoint() {
        checkpoint.resume_info()
    } else {
        None
    };

    let settings = match &resume {
        Some(info) => {
            info!("Adopting settings from resumable checkpoint");
            info.settings.clone()
        }
        None => parse_settings(&root.join(&args.config)).await?,
    };

    let project_dirs = select_projects(&layout, &args.project, resume.as_ref())?;
    if project_dirs.is_empty() {
        warn!("No projects selected — nothing to do");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received — unwinding at the next safe point");
            ctrl_c_cancel.cancel();
        }
    });

    let surface = Arc::new(ScriptedSurface::echoing());
    let scanner = Arc::new(CliScannerAdapter::detect(layout.clone()).await);

    let mut driver = Driver::new(layout, settings, surface, scanner, cancel);
    let summary = driver.run(&project_dirs, resume).await?;

    println!(
        "{} {} project(s), {} file(s) processed, {} failure(s) — {}s",
        style("Run finished:").green().bold(),
        summary.projects.len(),
        summary.total_files_processed,
        summary.failures.len(),
        summary.elapsed_secs()
    );
    for project in &summary.projects {
        println!(
            "  {} — {:?} ({} planned / {} realized)",
            project.name, project.status, project.planned_lines, project.realized_lines
        );
    }
    Ok(())
}

fn select_projects(
    layout: &OutputLayout,
    requested: &[String],
    resume: Option<&crate::checkpoint::ResumeInfo>,
) -> Result<Vec<PathBuf>, GoadError> {
    let projects_dir = layout.projects_dir();

    // A resumed run replays the checkpoint's own project list.
    if let Some(info) = resume {
        return Ok(info.project_list.iter().map(|name| projects_dir.join(name)).collect());
    }

    if !requested.is_empty() {
        return Ok(requested.iter().map(|name| projects_dir.join(name)).collect());
    }

    if !projects_dir.exists() {
        return Err(GoadError::Config(format!(
            "Projects directory not found: {}",
            projects_dir.display()
        )));
    }
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(&projects_dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}
