use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// A project under attack: a directory carrying a `prompt.txt` of
/// `file|function` targets. Immutable during a run.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub root: PathBuf,
}

impl Project {
    pub fn new(root: &Path) -> Self {
        let name = root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unnamed")
            .to_string();
        Self { name, root: root.to_path_buf() }
    }

    pub fn prompt_path(&self) -> PathBuf {
        self.root.join("prompt.txt")
    }

    /// Resolve a prompt-line relative path against the project root.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

/// One non-blank line of `prompt.txt`: `relative_path | f1()、f2()…`.
/// Only the first function is material; the rest are parsed but ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptLine {
    /// 1-based position within prompt.txt.
    pub index: usize,
    pub file_path: String,
    /// Canonical (`()`-suffixed) function tokens, first one material.
    pub functions: Vec<String>,
}

impl PromptLine {
    /// The single function this line targets, canonical form.
    pub fn primary_function(&self) -> &str {
        &self.functions[0]
    }
}

/// Canonical form of a function token: trimmed, `()`-suffixed.
pub fn canonical_function_name(token: &str) -> String {
    let trimmed = token.trim().trim_end_matches("()");
    format!("{}()", trimmed)
}

/// Strip any `()` suffix for bare-name comparison.
pub fn bare_function_name(token: &str) -> &str {
    token.trim().trim_end_matches("()")
}

/// Parse `prompt.txt` content. Blank lines are skipped but still consume
/// an index so that saved artifacts keep their 1-based line numbers.
pub fn parse_prompt_file(content: &str) -> Vec<PromptLine> {
    let mut lines = Vec::new();
    for (i, raw) in content.lines().enumerate() {
        let index = i + 1;
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let Some((file_part, func_part)) = raw.split_once('|') else {
            warn!(line = index, content = raw, "Malformed prompt line — no '|' separator");
            continue;
        };
        let file_path = file_part.trim().to_string();
        let functions: Vec<String> = func_part
            .split(['、', ',', ' '])
            .filter(|t| !t.trim().is_empty())
            .map(canonical_function_name)
            .collect();
        if file_path.is_empty() || functions.is_empty() {
            warn!(line = index, content = raw, "Malformed prompt line — missing file or function");
            continue;
        }
        if functions.len() > 1 {
            warn!(
                line = index,
                ignored = %functions[1..].join("、"),
                "Prompt line lists multiple functions — only the first is processed"
            );
        }
        lines.push(PromptLine { index, file_path, functions });
    }
    lines
}

/// A fully-resolved attack target.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub project: String,
    pub file_path: String,
    pub function_name: String,
    pub line_index: usize,
}

impl Target {
    pub fn from_line(project: &str, line: &PromptLine) -> Self {
        Self {
            project: project.to_string(),
            file_path: line.file_path.clone(),
            function_name: line.primary_function().to_string(),
            line_index: line.index,
        }
    }

    /// The `<file>::<function>()` key used by the baseline store and the
    /// query matrix.
    pub fn key(&self) -> String {
        format!("{}::{}", self.file_path, self.function_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_function_name() {
        assert_eq!(canonical_function_name("make_key"), "make_key()");
        assert_eq!(canonical_function_name("make_key()"), "make_key()");
        assert_eq!(canonical_function_name("  make_key  "), "make_key()");
    }

    #[test]
    fn test_parse_simple_line() {
        let lines = parse_prompt_file("src/crypto.py|make_key()\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].index, 1);
        assert_eq!(lines[0].file_path, "src/crypto.py");
        assert_eq!(lines[0].primary_function(), "make_key()");
    }

    #[test]
    fn test_parse_multi_function_takes_first() {
        let lines = parse_prompt_file("a.py|f1、f2()、f3\n");
        assert_eq!(lines[0].functions, vec!["f1()", "f2()", "f3()"]);
        assert_eq!(lines[0].primary_function(), "f1()");
    }

    #[test]
    fn test_blank_lines_keep_indices() {
        let lines = parse_prompt_file("a.py|f1\n\nb.py|f2\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].index, 1);
        assert_eq!(lines[1].index, 3);
    }

    #[test]
    fn test_only_blank_lines_yields_no_targets() {
        assert!(parse_prompt_file("\n\n   \n").is_empty());
    }

    #[test]
    fn test_target_key() {
        let line = parse_prompt_file("src/crypto.py|make_key").remove(0);
        let t = Target::from_line("demo", &line);
        assert_eq!(t.key(), "src/crypto.py::make_key()");
    }
}
