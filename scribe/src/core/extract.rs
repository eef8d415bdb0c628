//! Fenced-block extraction from free-form model output.
//!
//! Models wrap code in Markdown fences inconsistently, so extraction prefers
//! blocks tagged with the target language, falls back to the first fenced block
//! of any tag, and finally treats the whole response as the payload.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Inserted between language-tagged blocks when a response carries several.
pub const BLOCK_SEPARATOR: &str = "\n\n# scribe: concatenated block\n\n";

static ANY_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:[a-zA-Z0-9_.-]*)?\n(.*?)\n```").expect("fence regex should compile")
});

/// Extract code for `language` from a model response.
pub fn extract_code(text: &str, language: &str) -> String {
    let tagged = tagged_blocks(text, language);
    if !tagged.is_empty() {
        if tagged.len() > 1 {
            warn!(
                blocks = tagged.len(),
                language, "multiple tagged blocks, concatenating"
            );
        }
        return tagged.join(BLOCK_SEPARATOR).trim().to_string();
    }
    if let Some(caps) = ANY_FENCE_RE.captures(text) {
        debug!(language, "no tagged block, using first fenced block");
        return caps[1].trim().to_string();
    }
    debug!("no fenced block, using whole response");
    text.trim().to_string()
}

fn tagged_blocks(text: &str, language: &str) -> Vec<String> {
    let pattern = format!(r"(?is)```{}\n(.*?)\n```", regex::escape(language));
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(err) => {
            warn!(%err, language, "language tag produced an invalid pattern");
            return Vec::new();
        }
    };
    re.captures_iter(text)
        .map(|caps| caps[1].trim().to_string())
        .collect()
}

/// One AI review finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFinding {
    pub severity: String,
    pub description: String,
    pub location: String,
}

impl ReviewFinding {
    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let field = |key: &str| obj.get(key).map(stringify_trimmed);
        Some(Self {
            severity: field("severity")?,
            description: field("description")?,
            location: field("location")?,
        })
    }
}

fn stringify_trimmed(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

#[derive(Debug, Error)]
pub enum FindingsError {
    #[error("review payload is not valid JSON")]
    Json(#[from] serde_json::Error),
    #[error("review payload must be an array of findings or a single finding, got {0}")]
    Shape(&'static str),
}

/// Parse structured review findings from a model response.
///
/// Malformed array elements are dropped one by one; a single well-formed
/// object is wrapped; any other shape is an error. An empty response yields
/// no findings.
pub fn parse_findings(text: &str) -> Result<Vec<ReviewFinding>, FindingsError> {
    let payload = extract_code(text, "json");
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(&payload)?;
    match value {
        Value::Array(items) => {
            let total = items.len();
            let findings: Vec<ReviewFinding> =
                items.iter().filter_map(ReviewFinding::from_value).collect();
            if findings.len() < total {
                warn!(
                    dropped = total - findings.len(),
                    "skipping malformed review findings"
                );
            }
            Ok(findings)
        }
        Value::Object(_) => match ReviewFinding::from_value(&value) {
            Some(finding) => {
                debug!("single review finding, wrapping");
                Ok(vec![finding])
            }
            None => Err(FindingsError::Shape("an object without finding fields")),
        },
        Value::Null => Err(FindingsError::Shape("null")),
        Value::Bool(_) => Err(FindingsError::Shape("a boolean")),
        Value::Number(_) => Err(FindingsError::Shape("a number")),
        Value::String(_) => Err(FindingsError::Shape("a string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_language_tagged_blocks() {
        let text = "Here:\n```python\n  def a():\n    pass  \n```\nand\n```Python\nx = 1\n```\n";
        let code = extract_code(text, "python");
        assert_eq!(code, format!("def a():\n    pass{BLOCK_SEPARATOR}x = 1"));
    }

    #[test]
    fn falls_back_to_first_generic_block() {
        let text = "```\nfirst\n```\n```js\nsecond\n```";
        assert_eq!(extract_code(text, "python"), "first");
    }

    #[test]
    fn whole_response_without_fences() {
        assert_eq!(extract_code("  x = 1\n", "python"), "x = 1");
    }

    #[test]
    fn parses_array_and_drops_malformed_items() {
        let text = r#"[
            {"severity": "high", "description": " bad ", "location": "line 3"},
            {"severity": "low"},
            "junk",
            {"severity": "low", "description": "nit", "location": 7}
        ]"#;
        let findings = parse_findings(text).expect("parse");
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].description, "bad");
        assert_eq!(findings[1].location, "7");
    }

    #[test]
    fn wraps_single_object() {
        let text = "```json\n\
                    {\"severity\":\"medium\",\"description\":\"d\",\"location\":\"l\"}\n\
                    ```";
        let findings = parse_findings(text).expect("parse");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, "medium");
    }

    #[test]
    fn rejects_other_shapes() {
        assert!(matches!(
            parse_findings("42"),
            Err(FindingsError::Shape("a number"))
        ));
        assert!(matches!(
            parse_findings(r#"{"note": "fine"}"#),
            Err(FindingsError::Shape(_))
        ));
        assert!(matches!(
            parse_findings("not json"),
            Err(FindingsError::Json(_))
        ));
    }

    #[test]
    fn empty_response_has_no_findings() {
        assert!(parse_findings("   ").expect("parse").is_empty());
    }
}
