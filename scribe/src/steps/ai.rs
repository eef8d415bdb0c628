//! Signature extraction and the model-assisted steps.

use std::fs;

use serde_json::Value;
use tracing::info;

use super::{StepOutput, Workflow, input_text};
use crate::core::run_state::StepArtifact;
use crate::core::signatures::extract_signatures as scan_signatures;
use crate::core::types::{Details, StepStatus, message_details};
use crate::error::ScribeError;

/// Directory, relative to the project, where generated tests are saved.
pub(super) const GENERATED_TESTS_DIR: &str = "tests/scribe_generated";

pub(super) fn extract_signatures(
    wf: &Workflow,
    _input: Option<&Details>,
) -> Result<StepOutput, ScribeError> {
    let code = wf.read_target()?;
    let signatures = scan_signatures(&code);
    let mut details = message_details(format!("extracted {} signatures", signatures.len()));
    details.insert("count".to_string(), Value::from(signatures.len()));
    details.insert(
        "raw_output".to_string(),
        Value::String(signatures.join("\n\n")),
    );
    Ok(StepOutput::new(StepStatus::Success, details))
}

pub(super) fn generate_tests(
    wf: &Workflow,
    input: Option<&Details>,
) -> Result<StepOutput, ScribeError> {
    let code = wf.read_target()?;
    let signatures = input_text(input, "raw_output").unwrap_or_default();
    let tests = wf
        .model
        .generate_tests(&code, &wf.target.target_file_relative, signatures)?;
    let mut details = message_details(format!("generated {} chars of tests", tests.len()));
    details.insert("model".to_string(), Value::from(wf.model.model()));
    details.insert("raw_output".to_string(), Value::String(tests));
    Ok(StepOutput::new(StepStatus::Success, details))
}

pub(super) fn save_tests(
    wf: &Workflow,
    input: Option<&Details>,
) -> Result<StepOutput, ScribeError> {
    let Some(code) = input_text(input, "raw_output") else {
        return Ok(StepOutput::new(
            StepStatus::Warning,
            message_details("no test code to save"),
        ));
    };
    let dir = wf.project_dir().join(GENERATED_TESTS_DIR);
    fs::create_dir_all(&dir).map_err(|err| ScribeError::file_system(&dir, err))?;
    let path = dir.join(test_file_name(&wf.target.target_file_relative));
    fs::write(&path, code).map_err(|err| ScribeError::file_system(&path, err))?;
    info!(path = %path.display(), "generated tests saved");

    let shown = path.display().to_string();
    let mut details = message_details(format!("tests saved to {shown}"));
    details.insert("generated_content_path".to_string(), Value::String(shown.clone()));
    details.insert("raw_output".to_string(), Value::String(shown));
    Ok(StepOutput::new(StepStatus::Success, details))
}

/// `test_<stem>_scribe.py`, with non-alphanumeric stem characters replaced by `_`.
fn test_file_name(target_file: &str) -> String {
    let stem = std::path::Path::new(target_file)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let safe: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    format!("test_{safe}_scribe.py")
}

/// Ask the model for a review. Findings are advisory and never fail the step.
pub(super) fn review_code(
    wf: &Workflow,
    _input: Option<&Details>,
) -> Result<StepOutput, ScribeError> {
    let code = wf.read_target()?;
    let findings = wf
        .model
        .generate_review(&code, &wf.target.target_file_relative)?;
    let mut details = message_details(format!("AI review found {} items", findings.len()));
    let issues =
        serde_json::to_value(&findings).map_err(|err| ScribeError::Unexpected(err.into()))?;
    details.insert("issues_found".to_string(), issues);
    Ok(StepOutput::new(StepStatus::Advisory, details)
        .with_artifact(StepArtifact::ReviewFindings(findings)))
}
