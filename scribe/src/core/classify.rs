//! Exit-code classification for tool-backed checks.

use crate::core::types::StepStatus;

/// How a check tool reports its outcome through exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckPolicy {
    /// Exit code the tool documents as "issues found".
    pub issues_code: i32,
    /// Exit code meaning "nothing to check" (pytest uses 5), classified as a warning.
    pub empty_code: Option<i32>,
    /// Issues fail the step when set, otherwise they only warn.
    pub strict: bool,
}

impl CheckPolicy {
    pub fn issues(issues_code: i32, strict: bool) -> Self {
        Self {
            issues_code,
            empty_code: None,
            strict,
        }
    }

    pub fn with_empty_code(mut self, code: i32) -> Self {
        self.empty_code = Some(code);
        self
    }
}

/// Classify a tool exit code.
///
/// Returns `None` for codes outside the tool's documented set; callers treat
/// those as tool errors.
pub fn classify_exit(code: i32, policy: &CheckPolicy) -> Option<StepStatus> {
    if code == 0 {
        return Some(StepStatus::Success);
    }
    if code == policy.issues_code {
        return Some(if policy.strict {
            StepStatus::Failure
        } else {
            StepStatus::Warning
        });
    }
    if policy.empty_code == Some(code) {
        return Some(StepStatus::Warning);
    }
    None
}

const SUMMARY_LIMIT: usize = 500;
const SUMMARY_HEAD: usize = 200;
const SUMMARY_TAIL: usize = 200;

/// Shorten tool output for step details, keeping head and tail.
pub fn summarize_output(raw: &str) -> String {
    let trimmed = raw.trim();
    let total = trimmed.chars().count();
    if total <= SUMMARY_LIMIT {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(SUMMARY_HEAD).collect();
    let tail: String = trimmed.chars().skip(total - SUMMARY_TAIL).collect();
    format!("{head}\n...({total} chars)...\n{tail}")
}

/// Truncate `text` to `limit` characters, appending `...` when shortened.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_issues_fail_and_lenient_issues_warn() {
        let strict = CheckPolicy::issues(1, true);
        let lenient = CheckPolicy::issues(1, false);
        assert_eq!(classify_exit(0, &strict), Some(StepStatus::Success));
        assert_eq!(classify_exit(1, &strict), Some(StepStatus::Failure));
        assert_eq!(classify_exit(1, &lenient), Some(StepStatus::Warning));
    }

    #[test]
    fn undocumented_codes_are_unclassified() {
        let policy = CheckPolicy::issues(1, true);
        assert_eq!(classify_exit(2, &policy), None);
        assert_eq!(classify_exit(-1, &policy), None);
    }

    #[test]
    fn empty_code_warns_even_when_strict() {
        let policy = CheckPolicy::issues(1, true).with_empty_code(5);
        assert_eq!(classify_exit(5, &policy), Some(StepStatus::Warning));
    }

    #[test]
    fn summarize_keeps_short_output() {
        assert_eq!(summarize_output("  ok \n"), "ok");
    }

    #[test]
    fn summarize_elides_middle_of_long_output() {
        let raw = format!("{}{}", "a".repeat(300), "b".repeat(300));
        let summary = summarize_output(&raw);
        assert!(summary.starts_with(&"a".repeat(200)));
        assert!(summary.ends_with(&"b".repeat(200)));
        assert!(summary.contains("...(600 chars)..."));
    }

    #[test]
    fn truncate_chars_marks_cut() {
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }
}
