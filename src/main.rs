use clap::Parser;
use goad::cli;
use goad::config::parse_settings;
use goad::errors::GoadError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(!cli.no_color)
        .init();

    let result = match cli.command {
        cli::Commands::Run(args) => cli::run::handle_run(args).await,
        cli::Commands::Scan(args) => cli::scan::handle_scan(args).await,
        cli::Commands::Status(args) => cli::status::handle_status(args).await,
        cli::Commands::Validate(args) => handle_validate(args).await,
    };

    match result {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            let exit_code = match &e {
                GoadError::Config(_) => 2,
                GoadError::Scanner(_) => 3,
                GoadError::InvalidTarget(_) => 4,
                GoadError::Interrupted => 130,
                _ => 1,
            };
            std::process::exit(exit_code);
        }
    }
}

async fn handle_validate(args: cli::commands::ValidateArgs) -> Result<(), GoadError> {
    let path = std::path::PathBuf::from(&args.config);
    let _settings = parse_settings(&path).await?;
    println!("Settings file is valid: {}", args.config);
    Ok(())
}
