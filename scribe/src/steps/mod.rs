//! Pipeline step implementations and the registry that names them.
//!
//! Steps are plain functions over a read-only [`Workflow`]. Each returns its
//! own [`StepOutput`] or a classified error; none of them decides whether the
//! pipeline skips or halts.

mod ai;
mod checks;
mod commit;
mod environment;
mod staging;

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::core::run_state::{RunTarget, StepArtifact};
use crate::core::types::{Details, StepId, StepStatus, message_details};
use crate::error::ScribeError;
use crate::io::config::ScribeConfig;
use crate::io::environment::Provisioner;
use crate::io::model::ModelClient;
use crate::io::process::ToolRunner;

/// What a step hands back to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub status: StepStatus,
    pub details: Details,
    pub artifact: Option<StepArtifact>,
}

impl StepOutput {
    pub fn new(status: StepStatus, details: Details) -> Self {
        Self {
            status,
            details,
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, artifact: StepArtifact) -> Self {
        self.artifact = Some(artifact);
        self
    }
}

/// Signature shared by every registered step.
pub type StepFn = fn(&Workflow, Option<&Details>) -> Result<StepOutput, ScribeError>;

/// Invokes a step by identifier. The pipeline only sees this seam.
pub trait StepRunner {
    fn run_step(&mut self, step: StepId, input: Option<&Details>)
    -> Result<StepOutput, ScribeError>;
}

/// Step identifiers mapped to their implementations.
pub struct StepRegistry {
    steps: HashMap<StepId, StepFn>,
}

impl StepRegistry {
    /// Registry with every standard step.
    pub fn standard() -> Self {
        let entries: [(StepId, StepFn); 16] = [
            (StepId::ValidateInputs, staging::validate_inputs),
            (StepId::SetupEnvironment, environment::setup_environment),
            (StepId::InstallDeps, environment::install_deps),
            (StepId::AuditDeps, environment::audit_deps),
            (StepId::ApplyCode, staging::apply_code),
            (StepId::FormatCode, checks::format_code),
            (StepId::LintCode, checks::lint_code),
            (StepId::TypeCheck, checks::type_check),
            (StepId::ExtractSignatures, ai::extract_signatures),
            (StepId::GenerateTests, ai::generate_tests),
            (StepId::SaveTests, ai::save_tests),
            (StepId::ExecuteTests, checks::execute_tests),
            (StepId::ReviewCode, ai::review_code),
            (StepId::RunPrecommit, checks::run_precommit),
            (StepId::CommitChanges, commit::commit_changes),
            (StepId::GenerateReport, generate_report),
        ];
        Self {
            steps: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, step: StepId) -> Option<StepFn> {
        self.steps.get(&step).copied()
    }
}

/// Read-only context shared by all steps of one run.
pub struct Workflow {
    target: RunTarget,
    config: ScribeConfig,
    tools: Box<dyn ToolRunner>,
    model: ModelClient,
}

impl Workflow {
    pub fn new(
        target: RunTarget,
        config: ScribeConfig,
        tools: Box<dyn ToolRunner>,
        model: ModelClient,
    ) -> Self {
        Self {
            target,
            config,
            tools,
            model,
        }
    }

    pub fn target(&self) -> &RunTarget {
        &self.target
    }

    fn project_dir(&self) -> &Path {
        &self.target.target_dir
    }

    fn target_arg(&self) -> String {
        self.target.target_file.display().to_string()
    }

    fn provisioner(&self) -> Provisioner<'_> {
        Provisioner::new(
            self.tools.as_ref(),
            self.project_dir(),
            self.config.python_executable.clone(),
            self.config.tool_timeout(),
        )
    }

    fn venv_path(&self) -> std::path::PathBuf {
        self.provisioner().venv_path()
    }

    fn read_target(&self) -> Result<String, ScribeError> {
        std::fs::read_to_string(&self.target.target_file)
            .map_err(|err| ScribeError::file_system(&self.target.target_file, err))
    }
}

/// [`StepRunner`] dispatching through a [`StepRegistry`].
pub struct WorkflowRunner {
    workflow: Workflow,
    registry: StepRegistry,
}

impl WorkflowRunner {
    pub fn new(workflow: Workflow, registry: StepRegistry) -> Self {
        Self { workflow, registry }
    }
}

impl StepRunner for WorkflowRunner {
    fn run_step(
        &mut self,
        step: StepId,
        input: Option<&Details>,
    ) -> Result<StepOutput, ScribeError> {
        let func = self.registry.get(step).ok_or_else(|| {
            ScribeError::configuration(format!("step '{step}' has no registered implementation"))
        })?;
        debug!(step = %step, has_input = input.is_some(), "dispatching step");
        func(&self.workflow, input)
    }
}

/// Terminal marker step; the report itself is assembled after the loop.
fn generate_report(_wf: &Workflow, _input: Option<&Details>) -> Result<StepOutput, ScribeError> {
    Ok(StepOutput::new(
        StepStatus::Success,
        message_details("final report assembled after the last step"),
    ))
}

/// String field of an upstream step's details, if present and non-empty.
fn input_text<'a>(input: Option<&'a Details>, key: &str) -> Option<&'a str> {
    input
        .and_then(|details| details.get(key))
        .and_then(|value| value.as_str())
        .filter(|text| !text.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_every_step() {
        let registry = StepRegistry::standard();
        for id in StepId::ALL {
            assert!(registry.get(id).is_some(), "{id} missing");
        }
    }

    #[test]
    fn input_text_ignores_blank_values() {
        let mut details = Details::new();
        details.insert("raw_output".to_string(), " ".into());
        assert_eq!(input_text(Some(&details), "raw_output"), None);
        details.insert("raw_output".to_string(), "x".into());
        assert_eq!(input_text(Some(&details), "raw_output"), Some("x"));
        assert_eq!(input_text(None, "raw_output"), None);
    }
}
