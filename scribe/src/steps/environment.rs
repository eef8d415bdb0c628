use serde_json::Value;

use super::{StepOutput, Workflow};
use crate::core::audit::exceeds_threshold;
use crate::core::run_state::StepArtifact;
use crate::core::types::{Details, StepStatus, message_details};
use crate::error::ScribeError;
use crate::io::environment::{AuditOutcome, InstallOutcome, SetupOutcome};

pub(super) fn setup_environment(
    wf: &Workflow,
    _input: Option<&Details>,
) -> Result<StepOutput, ScribeError> {
    let provisioner = wf.provisioner();
    let outcome = provisioner.setup()?;
    let venv = provisioner.venv_path();
    let verb = match outcome {
        SetupOutcome::Created => "created",
        SetupOutcome::Reused => "reused",
    };
    let mut details = message_details(format!("environment {verb} at {}", venv.display()));
    details.insert(
        "venv_path".to_string(),
        Value::String(venv.display().to_string()),
    );
    details.insert(
        "created".to_string(),
        Value::Bool(outcome == SetupOutcome::Created),
    );
    Ok(StepOutput::new(StepStatus::Success, details))
}

pub(super) fn install_deps(
    wf: &Workflow,
    _input: Option<&Details>,
) -> Result<StepOutput, ScribeError> {
    let details = match wf.provisioner().install_dependencies()? {
        InstallOutcome::NothingToInstall => {
            message_details("no dependency manifest, nothing to install")
        }
        InstallOutcome::Installed { manifest, target } => {
            let mut details =
                message_details(format!("dependencies installed from {manifest} ({target})"));
            details.insert("manifest".to_string(), Value::String(manifest));
            details.insert("install_target".to_string(), Value::String(target));
            details
        }
    };
    Ok(StepOutput::new(StepStatus::Success, details))
}

pub(super) fn audit_deps(
    wf: &Workflow,
    _input: Option<&Details>,
) -> Result<StepOutput, ScribeError> {
    let mut details = Details::new();
    details.insert("tool_name".to_string(), Value::from("pip-audit"));

    match wf.provisioner().audit_dependencies()? {
        AuditOutcome::Degraded { reason } => {
            details.insert(
                "message".to_string(),
                Value::String(format!("audit unavailable: {reason}")),
            );
            Ok(StepOutput::new(StepStatus::Warning, details))
        }
        AuditOutcome::Unparseable {
            return_code,
            message,
        } => {
            details.insert("return_code".to_string(), Value::from(return_code));
            details.insert("message".to_string(), Value::String(message));
            Ok(StepOutput::new(StepStatus::Warning, details))
        }
        AuditOutcome::Completed {
            return_code,
            findings,
        } => {
            let threshold = wf.config.fail_on_audit_severity;
            details.insert("return_code".to_string(), Value::from(return_code));
            details.insert(
                "vulnerability_count".to_string(),
                Value::from(findings.len()),
            );
            let status = if findings.is_empty() {
                details.insert("message".to_string(), Value::from("no vulnerabilities found"));
                StepStatus::Success
            } else if exceeds_threshold(&findings, threshold) {
                details.insert(
                    "message".to_string(),
                    Value::String(format!(
                        "{} vulnerabilities, at least one at or above {threshold}",
                        findings.len()
                    )),
                );
                StepStatus::Failure
            } else {
                details.insert(
                    "message".to_string(),
                    Value::String(format!("{} vulnerabilities found", findings.len())),
                );
                StepStatus::Warning
            };
            Ok(StepOutput::new(status, details)
                .with_artifact(StepArtifact::AuditFindings(findings)))
        }
    }
}
