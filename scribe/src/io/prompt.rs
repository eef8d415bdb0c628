//! Prompt and commit-message rendering with minijinja.

use minijinja::{Environment, UndefinedBehavior, context};
use tracing::debug;

use crate::core::classify::truncate_chars;
use crate::error::ScribeError;
use crate::io::config::PromptConfig;

pub const DEFAULT_TEST_GENERATION_TEMPLATE: &str = include_str!("prompts/test_generation.md");
pub const DEFAULT_REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");

const TEST_CODE_LIMIT: usize = 7000;
const SIGNATURE_LIMIT: usize = 1000;
const REVIEW_CODE_LIMIT: usize = 8000;

/// Renders the configured model prompts.
///
/// Undefined variables are errors so a typo in a user template surfaces as a
/// configuration problem instead of a silently empty prompt section.
pub struct PromptRenderer {
    env: Environment<'static>,
    language: String,
    test_generation: String,
    review: String,
}

impl PromptRenderer {
    pub fn new(prompts: &PromptConfig, language: &str) -> Self {
        Self {
            env: strict_env(),
            language: language.to_string(),
            test_generation: prompts.test_generation.clone(),
            review: prompts.review.clone(),
        }
    }

    pub fn test_generation(
        &self,
        code: &str,
        target_file_path: &str,
        signatures: &str,
    ) -> Result<String, ScribeError> {
        let code = truncate_chars(code, TEST_CODE_LIMIT);
        let signatures = truncate_chars(signatures, SIGNATURE_LIMIT);
        let prompt = self
            .env
            .render_str(
                &self.test_generation,
                context! {
                    language => &self.language,
                    code_content => code,
                    target_file_path => target_file_path,
                    signatures => signatures,
                },
            )
            .map_err(|err| template_error("prompts.test_generation", &err))?;
        debug!(chars = prompt.len(), "rendered test generation prompt");
        Ok(prompt)
    }

    pub fn review(&self, code: &str, target_file_path: &str) -> Result<String, ScribeError> {
        let code = truncate_chars(code, REVIEW_CODE_LIMIT);
        let prompt = self
            .env
            .render_str(
                &self.review,
                context! {
                    language => &self.language,
                    code_content => code,
                    target_file_path => target_file_path,
                },
            )
            .map_err(|err| template_error("prompts.review", &err))?;
        debug!(chars = prompt.len(), "rendered review prompt");
        Ok(prompt)
    }
}

/// Render `commit_message_template` for the staged file.
pub fn render_commit_message(
    template: &str,
    target_file: &str,
    version: &str,
) -> Result<String, ScribeError> {
    strict_env()
        .render_str(
            template,
            context! { target_file => target_file, version => version },
        )
        .map(|msg| msg.trim().to_string())
        .map_err(|err| template_error("commit_message_template", &err))
}

fn strict_env() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
}

fn template_error(key: &str, err: &minijinja::Error) -> ScribeError {
    ScribeError::configuration(format!("invalid template `{key}`: {err}"))
        .with_detail("template", key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_templates_render_all_inputs() {
        let renderer = PromptRenderer::new(&PromptConfig::default(), "python");
        let prompt = renderer
            .test_generation("def f():\n    return 1", "pkg/mod.py", "def f():")
            .expect("render");
        assert!(prompt.contains("Target file: pkg/mod.py"));
        assert!(prompt.contains("```python\ndef f():\n    return 1\n```"));

        let review = renderer.review("x = 1", "pkg/mod.py").expect("render");
        assert!(review.contains("x = 1"));
        assert!(review.contains("raw JSON array"));
    }

    #[test]
    fn long_code_is_truncated() {
        let renderer = PromptRenderer::new(&PromptConfig::default(), "python");
        let code = "y".repeat(REVIEW_CODE_LIMIT + 50);
        let review = renderer.review(&code, "a.py").expect("render");
        assert!(review.contains(&format!("{}...", "y".repeat(REVIEW_CODE_LIMIT))));
        assert!(!review.contains(&"y".repeat(REVIEW_CODE_LIMIT + 1)));
    }

    #[test]
    fn unknown_variable_is_a_configuration_error() {
        let prompts = PromptConfig {
            review: "{{ code_contents }}".to_string(),
            ..PromptConfig::default()
        };
        let renderer = PromptRenderer::new(&prompts, "python");
        let err = renderer.review("x", "a.py").expect_err("should fail");
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn commit_message_substitutes_file_and_version() {
        let msg = render_commit_message(
            "feat: apply v{{ version }} to {{ target_file }}",
            "mod.py",
            "1.1.2",
        )
        .expect("render");
        assert_eq!(msg, "feat: apply v1.1.2 to mod.py");
    }
}
