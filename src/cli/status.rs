use std::path::PathBuf;

use console::style;

use crate::checkpoint::CheckpointManager;
use crate::errors::GoadError;
use crate::paths::OutputLayout;

use super::commands::StatusArgs;

pub async fn handle_status(args: StatusArgs) -> Result<(), GoadError> {
    let layout = OutputLayout::new(&PathBuf::from(&args.root));
    let mut manager = CheckpointManager::new(layout.checkpoint_file());

    if args.clear {
        manager.clear()?;
        println!("{}", style("Checkpoint cleared").green());
        return Ok(());
    }

    match manager.load_checkpoint() {
        None => println!("No checkpoint found."),
        Some(checkpoint) => {
            println!("Status:   {:?}", checkpoint.status);
            println!("Mode:     {}", checkpoint.execution_mode);
            println!("Updated:  {}", checkpoint.updated_at.to_rfc3339());
            println!(
                "Progress: project {} ({}), round {}, line {}, phase {}",
                checkpoint.progress.project_index,
                checkpoint.progress.project_name,
                checkpoint.progress.round,
                checkpoint.progress.line,
                checkpoint.progress.phase,
            );
            println!("Files processed: {}", checkpoint.progress.total_files_processed);
            if !checkpoint.progress.completed_projects.is_empty() {
                println!("Completed: {}", checkpoint.progress.completed_projects.join(", "));
            }
            if manager.has_resumable_checkpoint() {
                println!("{}", style("Resumable — run `goad run --resume`").yellow());
            }
        }
    }
    Ok(())
}
