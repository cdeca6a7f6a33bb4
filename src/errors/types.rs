use thiserror::Error;

#[derive(Debug, Error)]
pub enum GoadError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IDE surface error: {0}")]
    Surface(String),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("Scanner error: {0}")]
    Scanner(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Prompt error: {0}")]
    Prompt(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Run interrupted by user")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
