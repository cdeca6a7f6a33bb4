use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "goad", version, about = "Adversarial experiment driver for AI code-completion assistants")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the multi-round experiment over the selected projects
    Run(RunArgs),
    /// Scan a single file for one CWE and print the records
    Scan(ScanArgs),
    /// Show (or clear) the execution checkpoint
    Status(StatusArgs),
    /// Validate a settings file
    Validate(ValidateArgs),
}

#[derive(Args, Clone)]
pub struct RunArgs {
    /// Workspace root holding projects/, output/, assets/, checkpoints/
    #[arg(short, long, default_value = ".")]
    pub root: String,

    /// YAML settings file
    #[arg(short, long, default_value = "settings.yaml")]
    pub config: String,

    /// Project directory name under projects/ (repeatable; all when omitted)
    #[arg(short, long)]
    pub project: Vec<String>,

    /// Resume from the on-disk checkpoint when one is resumable
    #[arg(long)]
    pub resume: bool,

    /// Drive the pipeline against the built-in scripted surface instead
    /// of a desktop IDE (no GUI automation backend required)
    #[arg(long)]
    pub pipeline_testing: bool,
}

#[derive(Args, Clone)]
pub struct ScanArgs {
    /// File to scan
    #[arg(short, long)]
    pub file: String,

    /// CWE class, zero-padded (e.g. 327, 078)
    #[arg(long)]
    pub cwe: String,

    /// Workspace root for report output
    #[arg(short, long, default_value = ".")]
    pub root: String,

    /// Print records as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone)]
pub struct StatusArgs {
    /// Workspace root
    #[arg(short, long, default_value = ".")]
    pub root: String,

    /// Delete the checkpoint instead of showing it
    #[arg(long)]
    pub clear: bool,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Settings file to validate
    pub config: String,
}
