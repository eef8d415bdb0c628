use std::fs;

use serde_json::Value;
use tracing::info;

use super::{StepOutput, Workflow};
use crate::core::types::{Details, StepStatus, message_details};
use crate::error::ScribeError;

/// Re-check the source and prepare the staged file's parent directory.
pub(super) fn validate_inputs(
    wf: &Workflow,
    _input: Option<&Details>,
) -> Result<StepOutput, ScribeError> {
    let target = wf.target();
    if !target.source_file.is_file() {
        return Err(ScribeError::input(format!(
            "source {} is not a file",
            target.source_file.display()
        )));
    }
    if let Some(parent) = target.target_file.parent() {
        fs::create_dir_all(parent).map_err(|err| ScribeError::file_system(parent, err))?;
    }
    let mut details = message_details(format!(
        "inputs ok: staging {} into {}",
        target.source_file.display(),
        target.target_file.display()
    ));
    details.insert(
        "target_file".to_string(),
        Value::String(target.target_file.display().to_string()),
    );
    details.insert(
        "source_file".to_string(),
        Value::String(target.source_file.display().to_string()),
    );
    Ok(StepOutput::new(StepStatus::Success, details))
}

/// Copy the candidate source over the staged target file.
pub(super) fn apply_code(
    wf: &Workflow,
    _input: Option<&Details>,
) -> Result<StepOutput, ScribeError> {
    let target = wf.target();
    let code = fs::read(&target.source_file)
        .map_err(|err| ScribeError::file_system(&target.source_file, err))?;
    if let Some(parent) = target.target_file.parent() {
        fs::create_dir_all(parent).map_err(|err| ScribeError::file_system(parent, err))?;
    }
    fs::write(&target.target_file, &code)
        .map_err(|err| ScribeError::file_system(&target.target_file, err))?;
    info!(bytes = code.len(), target = %target.target_file.display(), "code applied");

    let mut details = message_details(format!("wrote {} bytes", code.len()));
    details.insert("bytes_written".to_string(), Value::from(code.len()));
    Ok(StepOutput::new(StepStatus::Success, details))
}
