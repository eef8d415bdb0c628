//! Tool-backed checks: formatter, linter, type checker, tests, pre-commit.

use std::env;
use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};

use super::{StepOutput, Workflow, input_text};
use crate::core::classify::{CheckPolicy, classify_exit, summarize_output};
use crate::core::run_state::{StepArtifact, TestSummary};
use crate::core::types::{Details, StepStatus, message_details};
use crate::error::ScribeError;
use crate::io::process::{TIMEOUT_MARKER, ToolCommand, ToolOutput};

/// pytest's exit code for "no tests collected".
const PYTEST_NO_TESTS: i32 = 5;

const PRECOMMIT_CONFIG: &str = ".pre-commit-config.yaml";

struct Check {
    label: &'static str,
    command: ToolCommand,
    policy: CheckPolicy,
    clean: &'static str,
    issues: &'static str,
}

impl Check {
    fn run(self, wf: &Workflow) -> Result<(StepOutput, ToolOutput), ScribeError> {
        let out = wf.tools.run(&self.command)?;
        let mut details = Details::new();
        details.insert("tool_name".to_string(), Value::from(self.label));
        details.insert("return_code".to_string(), Value::from(out.exit_code));
        details.insert(
            "stdout_summary".to_string(),
            Value::String(summarize_output(&out.stdout)),
        );

        let Some(status) = classify_exit(out.exit_code, &self.policy) else {
            let reason = if out.stderr.contains(TIMEOUT_MARKER) {
                "timed out".to_string()
            } else {
                format!("exited {}", out.exit_code)
            };
            return Err(ScribeError::tool(format!(
                "{} {reason}: {}",
                self.label,
                summarize_output(&out.stderr)
            ))
            .with_detail("tool_name", self.label)
            .with_detail("return_code", out.exit_code));
        };

        let message = match status {
            StepStatus::Success => self.clean.to_string(),
            _ if out.exit_code == self.policy.issues_code => self.issues.to_string(),
            _ => format!("{} reported exit {}", self.label, out.exit_code),
        };
        info!(tool = self.label, %status, exit_code = out.exit_code, "check finished");
        details.insert("message".to_string(), Value::String(message));
        Ok((StepOutput::new(status, details), out))
    }
}

fn tool_command(wf: &Workflow, program: &str) -> ToolCommand {
    ToolCommand::new(program, wf.project_dir())
        .in_env(Some(&wf.venv_path()))
        .timeout(wf.config.tool_timeout())
}

pub(super) fn format_code(
    wf: &Workflow,
    _input: Option<&Details>,
) -> Result<StepOutput, ScribeError> {
    let check = Check {
        label: "ruff format",
        command: tool_command(wf, "ruff").args(["format".to_string(), wf.target_arg()]),
        policy: CheckPolicy::issues(1, wf.config.fail_on_format_issues),
        clean: "formatted",
        issues: "formatter reported issues",
    };
    Ok(check.run(wf)?.0)
}

pub(super) fn lint_code(
    wf: &Workflow,
    _input: Option<&Details>,
) -> Result<StepOutput, ScribeError> {
    let check = Check {
        label: "ruff check --fix",
        command: tool_command(wf, "ruff").args([
            "check".to_string(),
            "--fix".to_string(),
            wf.target_arg(),
        ]),
        policy: CheckPolicy::issues(1, wf.config.fail_on_lint_issues),
        clean: "lint clean",
        issues: "lint issues found",
    };
    Ok(check.run(wf)?.0)
}

pub(super) fn type_check(
    wf: &Workflow,
    _input: Option<&Details>,
) -> Result<StepOutput, ScribeError> {
    let check = Check {
        label: "mypy",
        command: tool_command(wf, "mypy").arg(wf.target_arg()),
        policy: CheckPolicy::issues(1, wf.config.fail_on_type_errors),
        clean: "type check passed",
        issues: "type errors found",
    };
    Ok(check.run(wf)?.0)
}

/// Run the saved generated tests with pytest.
pub(super) fn execute_tests(
    wf: &Workflow,
    input: Option<&Details>,
) -> Result<StepOutput, ScribeError> {
    let Some(test_path) = input_text(input, "raw_output").filter(|p| Path::new(p).is_file()) else {
        let shown = input_text(input, "raw_output").unwrap_or("<none>");
        warn!(path = shown, "no saved test file to execute");
        return Ok(StepOutput::new(
            StepStatus::Failure,
            message_details(format!("test file not found: {shown}")),
        ));
    };

    let command = tool_command(wf, "pytest")
        .args([test_path, "-v"])
        .env("PYTHONPATH", python_path(wf.project_dir()));

    let check = Check {
        label: "pytest",
        command,
        policy: CheckPolicy::issues(1, wf.config.fail_on_test_failure)
            .with_empty_code(PYTEST_NO_TESTS),
        clean: "all tests passed",
        issues: "some tests failed",
    };
    let (mut output, raw) = check.run(wf)?;
    if raw.exit_code == PYTEST_NO_TESTS {
        output
            .details
            .insert("message".to_string(), Value::from("no tests collected"));
    }
    Ok(output.with_artifact(StepArtifact::TestSummary(TestSummary {
        stdout: raw.stdout,
        stderr: raw.stderr,
        return_code: raw.exit_code,
    })))
}

/// Project root and `src/`, followed by any inherited `PYTHONPATH`.
fn python_path(project_dir: &Path) -> String {
    let mut parts = vec![project_dir.to_path_buf(), project_dir.join("src")];
    if let Some(existing) = env::var_os("PYTHONPATH") {
        parts.extend(env::split_paths(&existing));
    }
    env::join_paths(parts)
        .map(|joined| joined.to_string_lossy().into_owned())
        .unwrap_or_else(|_| project_dir.display().to_string())
}

pub(super) fn run_precommit(
    wf: &Workflow,
    _input: Option<&Details>,
) -> Result<StepOutput, ScribeError> {
    if !wf.project_dir().join(PRECOMMIT_CONFIG).is_file() {
        return Ok(StepOutput::new(
            StepStatus::Skipped,
            message_details(format!("no {PRECOMMIT_CONFIG}")),
        ));
    }
    let out = wf.tools.run(&tool_command(wf, "pre-commit").args([
        "run".to_string(),
        "--files".to_string(),
        wf.target_arg(),
    ]))?;
    let mut details = Details::new();
    details.insert("tool_name".to_string(), Value::from("pre-commit"));
    details.insert("return_code".to_string(), Value::from(out.exit_code));
    if out.success() {
        details.insert("message".to_string(), Value::from("pre-commit hooks passed"));
        return Ok(StepOutput::new(StepStatus::Success, details));
    }
    details.insert(
        "message".to_string(),
        Value::String(format!("pre-commit failed with exit {}", out.exit_code)),
    );
    details.insert(
        "stdout_summary".to_string(),
        Value::String(summarize_output(&out.stdout)),
    );
    Ok(StepOutput::new(StepStatus::Failure, details))
}
