//! Shared vocabulary for step identity and outcome classification.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form, serializable payload attached to a step result.
pub type Details = Map<String, Value>;

/// Outcome classification for a single pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Success,
    Failure,
    Warning,
    Skipped,
    /// Non-blocking outcome used for AI review findings.
    Advisory,
    Pending,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Success => "SUCCESS",
            StepStatus::Failure => "FAILURE",
            StepStatus::Warning => "WARNING",
            StepStatus::Skipped => "SKIPPED",
            StepStatus::Advisory => "ADVISORY",
            StepStatus::Pending => "PENDING",
        }
    }

    pub fn is_failure(self) -> bool {
        self == StepStatus::Failure
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of pipeline steps known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepId {
    ValidateInputs,
    SetupEnvironment,
    InstallDeps,
    AuditDeps,
    ApplyCode,
    FormatCode,
    LintCode,
    TypeCheck,
    ExtractSignatures,
    GenerateTests,
    SaveTests,
    ExecuteTests,
    ReviewCode,
    RunPrecommit,
    CommitChanges,
    GenerateReport,
}

impl StepId {
    /// Every step in the standard pipeline order.
    pub const ALL: [StepId; 16] = [
        StepId::ValidateInputs,
        StepId::SetupEnvironment,
        StepId::InstallDeps,
        StepId::AuditDeps,
        StepId::ApplyCode,
        StepId::FormatCode,
        StepId::LintCode,
        StepId::TypeCheck,
        StepId::ExtractSignatures,
        StepId::GenerateTests,
        StepId::SaveTests,
        StepId::ExecuteTests,
        StepId::ReviewCode,
        StepId::RunPrecommit,
        StepId::CommitChanges,
        StepId::GenerateReport,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepId::ValidateInputs => "validate_inputs",
            StepId::SetupEnvironment => "setup_environment",
            StepId::InstallDeps => "install_deps",
            StepId::AuditDeps => "audit_deps",
            StepId::ApplyCode => "apply_code",
            StepId::FormatCode => "format_code",
            StepId::LintCode => "lint_code",
            StepId::TypeCheck => "type_check",
            StepId::ExtractSignatures => "extract_signatures",
            StepId::GenerateTests => "generate_tests",
            StepId::SaveTests => "save_tests",
            StepId::ExecuteTests => "execute_tests",
            StepId::ReviewCode => "review_code",
            StepId::RunPrecommit => "run_precommit",
            StepId::CommitChanges => "commit_changes",
            StepId::GenerateReport => "generate_report",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|id| id.as_str() == name)
    }

    /// Upstream step whose recorded details this step consumes.
    pub fn dependency(self) -> Option<StepId> {
        match self {
            StepId::GenerateTests => Some(StepId::ExtractSignatures),
            StepId::SaveTests => Some(StepId::GenerateTests),
            StepId::ExecuteTests => Some(StepId::SaveTests),
            _ => None,
        }
    }

    /// The report step still runs after a failure has been recorded.
    pub fn is_terminal(self) -> bool {
        self == StepId::GenerateReport
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step names of the standard pipeline, used when the config does not override them.
pub fn default_step_names() -> Vec<String> {
    StepId::ALL
        .iter()
        .map(|id| id.as_str().to_string())
        .collect()
}

/// Build a `Details` map holding a single `message` entry.
pub fn message_details(message: impl Into<String>) -> Details {
    let mut details = Details::new();
    details.insert("message".to_string(), Value::String(message.into()));
    details
}
