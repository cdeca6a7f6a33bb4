use super::types::GoadError;

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub retryable: bool,
}

impl GoadError {
    /// Classify this error to determine its type and whether the current
    /// prompt line can be retried.
    pub fn classify(&self) -> ErrorClassification {
        match self {
            // Retryable errors: transient assistant/GUI trouble
            GoadError::Surface(_) => ErrorClassification {
                error_type: "SurfaceError",
                retryable: true,
            },
            GoadError::Clipboard(_) => ErrorClassification {
                error_type: "ClipboardError",
                retryable: true,
            },
            GoadError::Timeout(_) => ErrorClassification {
                error_type: "TimeoutError",
                retryable: true,
            },

            // Non-retryable errors
            GoadError::Config(_) => ErrorClassification {
                error_type: "ConfigError",
                retryable: false,
            },
            GoadError::InvalidTarget(_) => ErrorClassification {
                error_type: "InvalidTargetError",
                retryable: false,
            },
            GoadError::Checkpoint(_) => ErrorClassification {
                error_type: "CheckpointError",
                retryable: false,
            },
            GoadError::Prompt(_) => ErrorClassification {
                error_type: "PromptError",
                retryable: false,
            },
            GoadError::Interrupted => ErrorClassification {
                error_type: "Interrupted",
                retryable: false,
            },

            // Scanner failures become failed records, never retries
            GoadError::Scanner(_) => ErrorClassification {
                error_type: "ScannerError",
                retryable: false,
            },

            // Default: retryable
            GoadError::Io(_) => ErrorClassification {
                error_type: "IoError",
                retryable: true,
            },
            GoadError::Json(_) => ErrorClassification {
                error_type: "JsonError",
                retryable: true,
            },
            GoadError::Yaml(_) => ErrorClassification {
                error_type: "YamlError",
                retryable: false,
            },
            GoadError::Csv(_) => ErrorClassification {
                error_type: "CsvError",
                retryable: true,
            },
            GoadError::Internal(_) => ErrorClassification {
                error_type: "InternalError",
                retryable: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_error_is_retryable() {
        let c = GoadError::Surface("copy button not found".into()).classify();
        assert!(c.retryable);
        assert_eq!(c.error_type, "SurfaceError");
    }

    #[test]
    fn test_interrupt_is_terminal() {
        let c = GoadError::Interrupted.classify();
        assert!(!c.retryable);
    }
}
