//! Lightweight signature scan of Python sources for test-generation prompts.

use std::sync::LazyLock;

use regex::Regex;

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:async\s+def|def|class)\s+[A-Za-z_]\w*")
        .expect("header regex should compile")
});

/// Headers longer than this are assumed unterminated and cut off.
const MAX_HEADER_LINES: usize = 64;

/// Collect `def`, `async def` and `class` headers together with their decorators.
///
/// Multi-line parameter lists are kept intact. Each signature is dedented to
/// its header's indentation.
pub fn extract_signatures(source: &str) -> Vec<String> {
    let lines: Vec<&str> = source.lines().collect();
    let mut signatures = Vec::new();
    let mut decorators: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();
        if trimmed.starts_with('@') {
            decorators.push(trimmed);
            i += 1;
            continue;
        }
        if !HEADER_RE.is_match(line) {
            if !trimmed.is_empty() && !trimmed.starts_with('#') {
                decorators.clear();
            }
            i += 1;
            continue;
        }

        let indent = line.len() - line.trim_start().len();
        let mut parts: Vec<String> = decorators.drain(..).map(str::to_string).collect();
        let mut depth: i32 = 0;
        let mut consumed = 0;
        while i < lines.len() && consumed < MAX_HEADER_LINES {
            let current = lines[i];
            let end = scan_header_line(current, &mut depth);
            let kept = end.map_or(current, |colon| &current[..=colon]);
            parts.push(dedent(kept, indent).trim_end().to_string());
            i += 1;
            consumed += 1;
            if end.is_some() {
                break;
            }
        }
        signatures.push(parts.join("\n"));
    }

    signatures
}

/// Track bracket depth across one header line, ignoring string literals and
/// comments. Returns the byte offset of the colon that ends the header.
fn scan_header_line(line: &str, depth: &mut i32) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (idx, c) in line.char_indices() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == open {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '#' => return None,
            '(' | '[' | '{' => *depth += 1,
            ')' | ']' | '}' => *depth -= 1,
            ':' if *depth <= 0 => return Some(idx),
            _ => {}
        }
    }
    None
}

fn dedent(line: &str, indent: usize) -> &str {
    let leading = line.len() - line.trim_start().len();
    &line[leading.min(indent)..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_functions_classes_and_decorators() {
        let source = "\
import os

@dataclass
class Point(Base):
    x: int

    @property
    def norm(self) -> float:
        return 0.0

async def fetch(url: str) -> bytes:
    pass
";
        let sigs = extract_signatures(source);
        assert_eq!(
            sigs,
            vec![
                "@dataclass\nclass Point(Base):".to_string(),
                "@property\ndef norm(self) -> float:".to_string(),
                "async def fetch(url: str) -> bytes:".to_string(),
            ]
        );
    }

    #[test]
    fn keeps_multiline_parameter_lists() {
        let source = "def build(\n    a: int,\n    b: dict[str, int],\n) -> None:\n    pass\n";
        let sigs = extract_signatures(source);
        assert_eq!(
            sigs,
            vec!["def build(\n    a: int,\n    b: dict[str, int],\n) -> None:".to_string()]
        );
    }

    #[test]
    fn decorator_detached_by_statement_is_dropped() {
        let source = "@decorator\nvalue = 1\ndef f():\n    pass\n";
        assert_eq!(extract_signatures(source), vec!["def f():".to_string()]);
    }

    #[test]
    fn one_line_def_does_not_swallow_next() {
        let source = "def f(): return 1\ndef g(x):\n    return x\n";
        assert_eq!(
            extract_signatures(source),
            vec!["def f():".to_string(), "def g(x):".to_string()]
        );
    }

    #[test]
    fn hash_inside_string_default_is_not_comment() {
        let source = "def f(sep='#'):\n    pass\n\ndef g():\n    pass\n";
        assert_eq!(
            extract_signatures(source),
            vec!["def f(sep='#'):".to_string(), "def g():".to_string()]
        );
    }

    #[test]
    fn colon_in_string_or_brackets_does_not_end_header() {
        let source = "def f(\n    a: str = \"x:y\",\n    b: dict = {1: 2},\n) -> None:  # done\n";
        assert_eq!(
            extract_signatures(source),
            vec!["def f(\n    a: str = \"x:y\",\n    b: dict = {1: 2},\n) -> None:".to_string()]
        );
    }
}
