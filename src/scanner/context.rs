//! Locates the Python function enclosing a finding line.

use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionContext {
    /// Canonical (`()`-suffixed) function name.
    pub name: String,
    pub start_line: u32,
    pub end_line: u32,
}

fn indent_width(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Walk upward from `line` (1-based) to the nearest less-or-equally
/// indented `def <name>(`, then forward to where that body ends.
pub fn enclosing_function(source: &str, line: u32) -> Option<FunctionContext> {
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() || line == 0 {
        return None;
    }
    let idx = (line as usize - 1).min(lines.len() - 1);
    let def_re = Regex::new(r"^(\s*)def\s+(\w+)\s*\(").ok()?;

    let finding_indent = indent_width(lines[idx]);

    let mut def_idx = None;
    let mut def_indent = 0usize;
    let mut name = String::new();
    for i in (0..=idx).rev() {
        if let Some(cap) = def_re.captures(lines[i]) {
            let this_indent = cap[1].len();
            // The finding line itself may be the def line.
            if i == idx || this_indent <= finding_indent {
                def_idx = Some(i);
                def_indent = this_indent;
                name = format!("{}()", &cap[2]);
                break;
            }
        }
    }
    let def_idx = def_idx?;

    // Body ends just before the next non-blank line at or below the
    // def's indentation.
    let mut end_idx = lines.len() - 1;
    for (i, text) in lines.iter().enumerate().skip(def_idx + 1) {
        if text.trim().is_empty() {
            continue;
        }
        if indent_width(text) <= def_indent {
            end_idx = i - 1;
            break;
        }
    }

    Some(FunctionContext {
        name,
        start_line: def_idx as u32 + 1,
        end_line: end_idx as u32 + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "\
import hashlib

def make_key(seed):
    digest = hashlib.md5(seed)
    return digest.hexdigest()

def unrelated():
    pass
";

    #[test]
    fn test_finding_inside_function() {
        let ctx = enclosing_function(SOURCE, 4).unwrap();
        assert_eq!(ctx.name, "make_key()");
        assert_eq!(ctx.start_line, 3);
        assert_eq!(ctx.end_line, 6);
    }

    #[test]
    fn test_finding_on_def_line() {
        let ctx = enclosing_function(SOURCE, 3).unwrap();
        assert_eq!(ctx.name, "make_key()");
    }

    #[test]
    fn test_finding_at_module_level_has_no_function() {
        assert_eq!(enclosing_function(SOURCE, 1), None);
    }

    #[test]
    fn test_nested_def_prefers_inner() {
        let nested = "\
def outer():
    def inner():
        x = eval(input())
        return x
    return inner
";
        let ctx = enclosing_function(nested, 3).unwrap();
        assert_eq!(ctx.name, "inner()");
        assert_eq!(ctx.start_line, 2);
    }

    #[test]
    fn test_line_past_eof_clamps() {
        let ctx = enclosing_function("def f():\n    return 1\n", 99).unwrap();
        assert_eq!(ctx.name, "f()");
    }
}
