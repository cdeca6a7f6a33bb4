//! Completion detection for captured assistant replies.
//!
//! The assistant sometimes emits only a code block (no prose) when the
//! response is captured through the copy-code affordance, so purely
//! textual markers are not enough: a reply counts as complete when it
//! carries at least one plausible finished code body.

use regex::Regex;

const COMPLETION_MARKER_ZH: &str = "已完成回答";
const COMPLETION_MARKER_EN: &str = "Response completed";
const REFUSAL_MARKER: &str = "Sorry, I can't assist with that.";

/// Decide whether a captured reply is incomplete and must be retried.
///
/// Rules, in order: empty → incomplete; explicit completion marker →
/// complete; refusal sentence → complete (terminal); at least one
/// complete code block → complete; otherwise incomplete.
pub fn is_incomplete(response: &str) -> bool {
    if response.trim().is_empty() {
        return true;
    }

    if response.contains(COMPLETION_MARKER_ZH) || response.contains(COMPLETION_MARKER_EN) {
        return false;
    }

    if response.contains(REFUSAL_MARKER) {
        return false;
    }

    if contains_complete_code(response) {
        return false;
    }

    true
}

/// True when the reply carries the assistant's refusal sentence.
pub fn is_refusal(response: &str) -> bool {
    response.contains(REFUSAL_MARKER)
}

fn contains_complete_code(response: &str) -> bool {
    let fence = Regex::new(r"(?s)```(?:python|py)?\s*\n(.*?)```").unwrap();

    let mut saw_fence = false;
    for cap in fence.captures_iter(response) {
        saw_fence = true;
        if is_complete_python_code(&cap[1]) {
            return true;
        }
    }

    // No fence at all: the copy-code affordance yields raw code.
    if !saw_fence && is_complete_python_code(response) {
        return true;
    }

    false
}

/// Heuristics for a finished Python code body. Any single criterion is
/// enough; all require a minimum length of 80 characters.
fn is_complete_python_code(code: &str) -> bool {
    let code = code.trim();
    if code.len() < 80 {
        return false;
    }

    let has_def = code.contains("def ");
    let has_return = code.contains("return ");
    let has_docstring = code.contains("\"\"\"") || code.contains("'''");
    let has_import = code.contains("import ");

    if has_def && has_return {
        return true;
    }
    if has_def && has_docstring {
        return true;
    }
    if code.len() >= 200 && has_import {
        return true;
    }
    if has_def && code.len() >= 150 {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_incomplete() {
        assert!(is_incomplete(""));
        assert!(is_incomplete("   \n\t "));
    }

    #[test]
    fn test_completion_markers() {
        assert!(!is_incomplete("好的，實作如下。\n已完成回答"));
        assert!(!is_incomplete("Here you go.\nResponse completed"));
    }

    #[test]
    fn test_refusal_is_terminal() {
        assert!(!is_incomplete("Sorry, I can't assist with that."));
        assert!(is_refusal("Sorry, I can't assist with that."));
    }

    #[test]
    fn test_fenced_def_return_is_complete() {
        let reply = "```python\ndef checksum(data):\n    total = sum(data)\n    # fold into one byte\n    return total % 256\n```";
        assert!(!is_incomplete(reply));
    }

    #[test]
    fn test_truncated_fence_is_incomplete() {
        assert!(is_incomplete("```python\ndef f():\n"));
    }

    #[test]
    fn test_raw_code_without_fence_is_complete() {
        let raw = "def parse_header(buf):\n    \"\"\"Read the fixed-size header and return its fields.\"\"\"\n    magic = buf[0:4]\n    return magic";
        assert!(!is_incomplete(raw));
    }

    #[test]
    fn test_short_snippet_is_incomplete() {
        assert!(is_incomplete("def f(): pass"));
    }

    #[test]
    fn test_long_import_body_is_complete() {
        let body = format!("import os\nimport sys\n{}", "x = 1\n".repeat(40));
        assert!(!is_incomplete(&body));
    }

    #[test]
    fn test_prose_only_is_incomplete() {
        assert!(is_incomplete(
            "I will now explain the approach in detail before writing any code at all, \
             covering design tradeoffs and edge cases."
        ));
    }

    #[test]
    fn test_detector_is_deterministic() {
        let reply = "```python\ndef f():\n    return 1\n```";
        assert_eq!(is_incomplete(reply), is_incomplete(reply));
    }
}
