//! Scribe configuration stored in `.scribe.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::audit::Severity;
use crate::core::types::default_step_names;
use crate::error::ScribeError;
use crate::io::prompt::{DEFAULT_REVIEW_TEMPLATE, DEFAULT_TEST_GENERATION_TEMPLATE};

pub const CONFIG_FILE_NAME: &str = ".scribe.toml";

/// Scribe configuration (TOML).
///
/// Every table is `#[serde(default)]`, so a partial file only overrides the
/// keys it names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScribeConfig {
    /// Target directories must live under one of these. Empty means unrestricted.
    pub allowed_target_bases: Vec<PathBuf>,

    /// Audit findings at or above this severity fail the audit step.
    pub fail_on_audit_severity: Severity,

    pub fail_on_format_issues: bool,
    pub fail_on_lint_issues: bool,
    pub fail_on_type_errors: bool,
    pub fail_on_test_failure: bool,

    /// Per-tool wall-clock limit in seconds. `0` disables the limit.
    pub default_tool_timeout_secs: u64,

    /// Truncate captured tool stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Interpreter used to create the isolated environment.
    pub python_executable: String,

    /// Language tag used for fenced-block extraction and the report.
    pub language: String,

    /// minijinja template with `target_file` and `version`.
    pub commit_message_template: String,

    /// Ordered step names to execute.
    pub validation_steps: Vec<String>,

    /// Explicit executable overrides keyed by tool name (e.g. `ruff`).
    pub tool_paths: BTreeMap<String, PathBuf>,

    pub model: ModelConfig,
    pub prompts: PromptConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    pub request_timeout_secs: u64,
    /// Additional attempts after the first failed one.
    pub retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "gemma:2b".to_string(),
            request_timeout_secs: 180,
            retries: 2,
            retry_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    /// Variables: `code_content`, `target_file_path`, `signatures`.
    pub test_generation: String,
    /// Variables: `code_content`, `target_file_path`.
    pub review: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            test_generation: DEFAULT_TEST_GENERATION_TEMPLATE.to_string(),
            review: DEFAULT_REVIEW_TEMPLATE.to_string(),
        }
    }
}

impl Default for ScribeConfig {
    fn default() -> Self {
        Self {
            allowed_target_bases: default_target_bases(),
            fail_on_audit_severity: Severity::High,
            fail_on_format_issues: true,
            fail_on_lint_issues: true,
            fail_on_type_errors: true,
            fail_on_test_failure: true,
            default_tool_timeout_secs: 180,
            output_limit_bytes: 1_000_000,
            python_executable: "python3".to_string(),
            language: "python".to_string(),
            commit_message_template:
                "feat(scribe): apply v{{ version }} validated changes to {{ target_file }}"
                    .to_string(),
            validation_steps: default_step_names(),
            tool_paths: BTreeMap::new(),
            model: ModelConfig::default(),
            prompts: PromptConfig::default(),
        }
    }
}

fn default_target_bases() -> Vec<PathBuf> {
    let mut bases = Vec::new();
    if let Some(home) = dirs::home_dir() {
        bases.push(home);
    }
    bases.push(std::env::temp_dir());
    if let Ok(cwd) = std::env::current_dir() {
        bases.push(cwd);
    }
    bases
}

impl ScribeConfig {
    pub fn validate(&self) -> Result<(), ScribeError> {
        if self.output_limit_bytes == 0 {
            return Err(ScribeError::configuration(
                "output_limit_bytes must be > 0",
            ));
        }
        if self.python_executable.trim().is_empty() {
            return Err(ScribeError::configuration(
                "python_executable must not be empty",
            ));
        }
        if self.language.trim().is_empty() {
            return Err(ScribeError::configuration("language must not be empty"));
        }
        let base = self.model.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ScribeError::configuration(format!(
                "model.base_url must be an http(s) URL, got '{base}'"
            )));
        }
        if self.model.model.trim().is_empty() {
            return Err(ScribeError::configuration("model.model must not be empty"));
        }
        if self.model.request_timeout_secs == 0 {
            return Err(ScribeError::configuration(
                "model.request_timeout_secs must be > 0",
            ));
        }
        Ok(())
    }

    /// Apply `OLLAMA_API_BASE` / `OLLAMA_MODEL` overrides read through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base) = lookup("OLLAMA_API_BASE").filter(|v| !v.trim().is_empty()) {
            debug!(base_url = %base, "model base url from environment");
            self.model.base_url = base;
        }
        if let Some(model) = lookup("OLLAMA_MODEL").filter(|v| !v.trim().is_empty()) {
            debug!(model = %model, "model name from environment");
            self.model.model = model;
        }
    }

    /// Resolved per-tool timeout; `None` when disabled.
    pub fn tool_timeout(&self) -> Option<std::time::Duration> {
        (self.default_tool_timeout_secs > 0)
            .then(|| std::time::Duration::from_secs(self.default_tool_timeout_secs))
    }
}

/// Pick the config file to load.
///
/// Order: explicit path (skipped with a warning if missing), then
/// `<target_dir>/.scribe.toml`, then `<cwd>/.scribe.toml`.
pub fn locate_config(explicit: Option<&Path>, target_dir: &Path, cwd: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        warn!(path = %path.display(), "config file not found, searching defaults");
    }
    [target_dir.join(CONFIG_FILE_NAME), cwd.join(CONFIG_FILE_NAME)]
        .into_iter()
        .find(|candidate| candidate.is_file())
}

/// Load config from a TOML file.
///
/// If `path` is `None`, returns `ScribeConfig::default()`.
pub fn load_config(path: Option<&Path>) -> Result<ScribeConfig, ScribeError> {
    let Some(path) = path else {
        info!("no config file found, using defaults");
        let cfg = ScribeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    };
    let contents =
        fs::read_to_string(path).map_err(|err| ScribeError::file_system(path, err))?;
    let cfg: ScribeConfig = toml::from_str(&contents).map_err(|err| {
        ScribeError::configuration(format!("parse {}: {err}", path.display()))
            .with_detail("path", path.display().to_string())
    })?;
    cfg.validate()?;
    info!(path = %path.display(), "loaded config");
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let cfg = load_config(None).expect("load");
        assert_eq!(cfg, ScribeConfig::default());
        assert_eq!(cfg.validation_steps.len(), 16);
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            "fail_on_lint_issues = false\n\
             validation_steps = [\"validate_inputs\"]\n\n\
             [model]\nretries = 0\n",
        )
        .expect("write");
        let cfg = load_config(Some(&path)).expect("load");
        assert!(!cfg.fail_on_lint_issues);
        assert!(cfg.fail_on_type_errors);
        assert_eq!(cfg.validation_steps, vec!["validate_inputs".to_string()]);
        assert_eq!(cfg.model.retries, 0);
        assert_eq!(cfg.model.model, "gemma:2b");
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "validation_steps = 3\n").expect("write");
        let err = load_config(Some(&path)).expect_err("should fail");
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[model]\nbase_url = \"localhost\"\n").expect("write");
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn target_dir_config_wins_over_cwd() {
        let target = tempfile::tempdir().expect("tempdir");
        let cwd = tempfile::tempdir().expect("tempdir");
        fs::write(cwd.path().join(CONFIG_FILE_NAME), "").expect("write");
        assert_eq!(
            locate_config(None, target.path(), cwd.path()),
            Some(cwd.path().join(CONFIG_FILE_NAME))
        );
        fs::write(target.path().join(CONFIG_FILE_NAME), "").expect("write");
        assert_eq!(
            locate_config(None, target.path(), cwd.path()),
            Some(target.path().join(CONFIG_FILE_NAME))
        );
    }

    #[test]
    fn missing_explicit_path_falls_back_to_search() {
        let target = tempfile::tempdir().expect("tempdir");
        let missing = target.path().join("nope.toml");
        assert_eq!(locate_config(Some(&missing), target.path(), target.path()), None);
    }

    #[test]
    fn environment_overrides_model_settings() {
        let mut cfg = ScribeConfig::default();
        cfg.apply_env_overrides(|key| match key {
            "OLLAMA_MODEL" => Some("llama3".to_string()),
            "OLLAMA_API_BASE" => Some(String::new()),
            _ => None,
        });
        assert_eq!(cfg.model.model, "llama3");
        assert_eq!(cfg.model.base_url, "http://localhost:11434");
    }
}
