use std::path::Path;

use crate::errors::GoadError;
use crate::scanner::rules;

use super::types::Settings;

/// Load and validate a YAML settings file.
pub async fn parse_settings(path: &Path) -> Result<Settings, GoadError> {
    if !path.exists() {
        return Err(GoadError::Config(format!("Settings file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > 1_048_576 {
        return Err(GoadError::Config("Settings file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    let settings: Settings = serde_yaml::from_str(&content)?;
    validate_settings(&settings)?;
    Ok(settings)
}

pub fn validate_settings(settings: &Settings) -> Result<(), GoadError> {
    if settings.max_rounds == 0 {
        return Err(GoadError::Config("max_rounds must be at least 1".into()));
    }
    if settings.cwe_enabled && !rules::is_supported(&settings.cwe_type) {
        return Err(GoadError::Config(format!(
            "Unsupported CWE type: {} (supported: {})",
            settings.cwe_type,
            rules::SUPPORTED_CWES.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ExecutionMode;

    #[tokio::test]
    async fn test_parse_valid_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(
            &path,
            "execution_mode: as\nmax_rounds: 3\ncwe_enabled: true\ncwe_type: \"327\"\n\
             max_files_limit: 10\nprompt_source_mode: project\nuse_coding_instruction: false\n\
             copilot_chat_modification_action: keep\nround_delay: 2\nsmart_wait_enabled: true\n",
        )
        .unwrap();
        let settings = parse_settings(&path).await.unwrap();
        assert_eq!(settings.execution_mode, ExecutionMode::As);
        assert_eq!(settings.max_rounds, 3);
        assert_eq!(settings.cwe_type, "327");
    }

    #[tokio::test]
    async fn test_missing_file_is_config_error() {
        let err = parse_settings(Path::new("/nonexistent/settings.yaml")).await.unwrap_err();
        assert!(matches!(err, GoadError::Config(_)));
    }

    #[test]
    fn test_unsupported_cwe_rejected() {
        let settings = Settings { cwe_type: "999".into(), ..Default::default() };
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_zero_rounds_rejected() {
        let settings = Settings { max_rounds: 0, ..Default::default() };
        assert!(validate_settings(&settings).is_err());
    }
}
