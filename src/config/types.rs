use serde::{Deserialize, Serialize};

/// Which attack protocol the run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Two-phase rename-then-implement rounds.
    As,
    /// Control protocol: the same prompt repeated for N rounds.
    NonAs,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::As => "as",
            Self::NonAs => "non_as",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where each project's prompt lines come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PromptSourceMode {
    /// One shared prompt file for every project.
    Global,
    /// `prompt.txt` inside each project directory.
    #[default]
    Project,
}

/// What to do with the assistant's pending edits when a save dialog
/// appears at project close (and after each Non-AS round).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModificationAction {
    #[default]
    Keep,
    Revert,
}

/// The settings record collected from the UI (or adopted verbatim from a
/// resumable checkpoint). Serialized into the checkpoint, so it must
/// round-trip bit-exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub execution_mode: ExecutionMode,
    pub max_rounds: u32,
    pub cwe_enabled: bool,
    pub cwe_type: String,
    /// 0 disables the global quota.
    pub max_files_limit: u32,
    pub prompt_source_mode: PromptSourceMode,
    pub use_coding_instruction: bool,
    #[serde(rename = "copilot_chat_modification_action")]
    pub modification_action: ModificationAction,
    /// Pause between rounds, in seconds.
    pub round_delay: u64,
    pub smart_wait_enabled: bool,
    /// Retry ceiling for one prompt line, every failure type included.
    #[serde(default = "default_max_retry_per_line")]
    pub as_mode_max_retry_per_line: u32,
}

fn default_max_retry_per_line() -> u32 {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::As,
            max_rounds: 3,
            cwe_enabled: true,
            cwe_type: "327".to_string(),
            max_files_limit: 0,
            prompt_source_mode: PromptSourceMode::Project,
            use_coding_instruction: false,
            modification_action: ModificationAction::Keep,
            round_delay: 2,
            smart_wait_enabled: true,
            as_mode_max_retry_per_line: default_max_retry_per_line(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_mode_serialization() {
        assert_eq!(serde_json::to_string(&ExecutionMode::As).unwrap(), "\"as\"");
        assert_eq!(serde_json::to_string(&ExecutionMode::NonAs).unwrap(), "\"non_as\"");
    }

    #[test]
    fn test_settings_roundtrip_is_bit_exact() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let parsed: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, settings);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), json);
    }

    #[test]
    fn test_modification_action_key_is_preserved() {
        let json = serde_json::to_string(&Settings::default()).unwrap();
        assert!(json.contains("\"copilot_chat_modification_action\":\"keep\""));
    }
}
