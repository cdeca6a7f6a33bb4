use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which half of a round produced an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Query = 1,
    Coding = 2,
}

impl Phase {
    pub fn number(&self) -> u8 {
        match self {
            Phase::Query => 1,
            Phase::Coding => 2,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// One observed rename of a tracked symbol.
///
/// `original_name` is always the prompt-file token; `current_name` is
/// what the symbol was called when the prompt was issued and
/// `modified_name` what the assistant left behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionChangeRecord {
    pub file_path: String,
    pub original_name: String,
    pub round: u32,
    pub phase: Phase,
    pub current_name: String,
    pub modified_name: String,
    pub line_before: Option<u32>,
    pub line_after: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl FunctionChangeRecord {
    /// Strict ordering key: records for one symbol appear in increasing
    /// `(round, phase)` order.
    pub fn order_key(&self) -> (u32, u8) {
        (self.round, self.phase.number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_key_is_lexicographic() {
        let mk = |round, phase| FunctionChangeRecord {
            file_path: "a.py".into(),
            original_name: "f()".into(),
            round,
            phase,
            current_name: "f()".into(),
            modified_name: "g()".into(),
            line_before: None,
            line_after: None,
            timestamp: Utc::now(),
        };
        assert!(mk(1, Phase::Query).order_key() < mk(1, Phase::Coding).order_key());
        assert!(mk(1, Phase::Coding).order_key() < mk(2, Phase::Query).order_key());
    }
}
