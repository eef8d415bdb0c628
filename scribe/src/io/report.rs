//! Final run report: assembly from run state and rendering.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::core::audit::AuditFinding;
use crate::core::extract::ReviewFinding;
use crate::core::run_state::{RunState, StepResult, TestSummary};
use crate::core::types::{StepStatus, message_details};

pub const SCRIBE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Report rendering selected on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    #[default]
    Json,
    Text,
}

/// The single structured document emitted at the end of every run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalReport {
    pub scribe_version: String,
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_duration_seconds: f64,
    pub overall_status: StepStatus,
    pub target_project_dir: String,
    pub target_file_relative: String,
    pub language: String,
    pub commit_attempted: bool,
    pub commit_sha: Option<String>,
    pub steps: Vec<StepResult>,
    pub audit_findings: Option<Vec<AuditFinding>>,
    pub ai_review_findings: Option<Vec<ReviewFinding>>,
    pub test_results_summary: Option<TestSummary>,
    pub error_message: Option<String>,
}

/// Context available when bootstrap fails before a run state exists.
#[derive(Debug, Clone)]
pub struct InitFailure<'a> {
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub target_dir: &'a str,
    pub target_file: &'a str,
    pub language: &'a str,
    pub commit_intent: bool,
    pub error_kind: &'a str,
    pub message: String,
}

impl FinalReport {
    pub fn from_run(state: &RunState) -> Self {
        Self {
            scribe_version: SCRIBE_VERSION.to_string(),
            run_id: state.run_id.clone(),
            start_time: state.start_time,
            end_time: state.end_time.unwrap_or_else(Utc::now),
            total_duration_seconds: state.total_duration_seconds(),
            overall_status: state.overall_status,
            target_project_dir: state.target.target_dir.display().to_string(),
            target_file_relative: state.target.target_file_relative.clone(),
            language: state.language.clone(),
            commit_attempted: state.commit_attempted,
            commit_sha: state.commit.report_value(),
            steps: state.steps.clone(),
            audit_findings: state.audit_findings.clone(),
            ai_review_findings: state.review_findings.clone(),
            test_results_summary: state.test_summary.clone(),
            error_message: state.error_message.clone(),
        }
    }

    /// Minimal report with a single `initialization_failure` step.
    pub fn initialization_failure(failure: InitFailure<'_>) -> Self {
        let mut details = message_details(failure.message.clone());
        details.insert(
            "error_kind".to_string(),
            Value::String(failure.error_kind.to_string()),
        );
        let step = StepResult::instant(
            "initialization_failure",
            StepStatus::Failure,
            details,
            Some(failure.message.clone()),
        );
        let end_time = Utc::now();
        let millis = (end_time - failure.start_time).num_milliseconds().max(0);
        Self {
            scribe_version: SCRIBE_VERSION.to_string(),
            run_id: failure.run_id,
            start_time: failure.start_time,
            end_time,
            total_duration_seconds: millis as f64 / 1000.0,
            overall_status: StepStatus::Failure,
            target_project_dir: failure.target_dir.to_string(),
            target_file_relative: failure.target_file.to_string(),
            language: failure.language.to_string(),
            commit_attempted: failure.commit_intent,
            commit_sha: None,
            steps: vec![step],
            audit_findings: None,
            ai_review_findings: None,
            test_results_summary: None,
            error_message: Some(failure.message),
        }
    }

    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Json => {
                let mut out = serde_json::to_string_pretty(self).context("serialize report")?;
                out.push('\n');
                Ok(out)
            }
            ReportFormat::Text => Ok(self.render_text()),
        }
    }

    fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Scribe v{} run {}: {}",
            self.scribe_version, self.run_id, self.overall_status
        );
        let _ = writeln!(
            out,
            "Target: {} ({})",
            self.target_project_dir, self.target_file_relative
        );
        let _ = writeln!(out, "Duration: {:.3}s", self.total_duration_seconds);
        let commit = self.commit_sha.as_deref().unwrap_or("none");
        let _ = writeln!(
            out,
            "Commit attempted: {} (sha: {commit})",
            if self.commit_attempted { "yes" } else { "no" }
        );
        let _ = writeln!(out, "Steps:");
        for step in &self.steps {
            let message = step
                .details
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let _ = write!(
                out,
                "  [{:<8}] {} ({:.3}s)",
                step.status.as_str(),
                step.name,
                step.duration_seconds
            );
            if !message.is_empty() {
                let _ = write!(out, " {message}");
            }
            out.push('\n');
            if let Some(err) = &step.error_message {
                let _ = writeln!(out, "             error: {err}");
            }
        }
        if let Some(findings) = &self.audit_findings {
            let _ = writeln!(out, "Audit findings: {}", findings.len());
            for f in findings {
                let severity = f.severity.as_deref().unwrap_or("unknown");
                let _ = writeln!(out, "  - {} {} ({severity})", f.package, f.id);
            }
        }
        if let Some(findings) = &self.ai_review_findings {
            let _ = writeln!(out, "AI review findings: {}", findings.len());
            for f in findings {
                let _ = writeln!(
                    out,
                    "  - [{}] {} @ {}",
                    f.severity, f.description, f.location
                );
            }
        }
        if let Some(summary) = &self.test_results_summary {
            let _ = writeln!(out, "Tests: exit code {}", summary.return_code);
        }
        if let Some(err) = &self.error_message {
            let _ = writeln!(out, "Error: {err}");
        }
        out
    }
}

/// Render `report` and write it to `out` in one go.
pub fn emit(report: &FinalReport, format: ReportFormat, out: &mut impl Write) -> Result<()> {
    let rendered = report.render(format)?;
    out.write_all(rendered.as_bytes()).context("write report")?;
    out.flush().context("flush report")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::policy::RunFlags;
    use crate::core::run_state::{CommitOutcome, RunTarget};
    use crate::core::types::Details;

    fn finished_state() -> RunState {
        let target = RunTarget {
            target_dir: PathBuf::from("/work/project"),
            source_file: PathBuf::from("/work/candidate.py"),
            target_file: PathBuf::from("/work/project/app.py"),
            target_file_relative: "app.py".to_string(),
        };
        let mut state = RunState::new(
            target,
            "python",
            RunFlags::default(),
            vec!["validate_inputs".to_string(), "commit_changes".to_string()],
        );
        state.record(StepResult::instant(
            "validate_inputs",
            StepStatus::Success,
            message_details("inputs ok"),
            None,
        ));
        state.record(StepResult::instant(
            "commit_changes",
            StepStatus::Success,
            Details::new(),
            None,
        ));
        state.commit = CommitOutcome::NoChanges;
        state.finalize(true);
        state
    }

    #[test]
    fn json_report_carries_top_level_fields() {
        let report = FinalReport::from_run(&finished_state());
        let rendered = report.render(ReportFormat::Json).expect("render");
        let value: Value = serde_json::from_str(&rendered).expect("json");
        assert_eq!(value["overall_status"], "SUCCESS");
        assert_eq!(value["commit_sha"], "NO_CHANGES");
        assert_eq!(value["commit_attempted"], true);
        assert_eq!(value["target_file_relative"], "app.py");
        assert_eq!(value["steps"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["steps"][0]["status"], "SUCCESS");
        assert!(value["audit_findings"].is_null());
        assert_eq!(value["scribe_version"], SCRIBE_VERSION);
    }

    #[test]
    fn text_report_lists_steps() {
        let report = FinalReport::from_run(&finished_state());
        let text = report.render(ReportFormat::Text).expect("render");
        assert!(text.contains("[SUCCESS ] validate_inputs"));
        assert!(text.contains("inputs ok"));
        assert!(text.contains("sha: NO_CHANGES"));
    }

    #[test]
    fn initialization_failure_has_single_failed_step() {
        let report = FinalReport::initialization_failure(InitFailure {
            run_id: "scribe_x".to_string(),
            start_time: Utc::now(),
            target_dir: "/missing",
            target_file: "a.py",
            language: "python",
            commit_intent: true,
            error_kind: "input",
            message: "target directory missing".to_string(),
        });
        assert_eq!(report.overall_status, StepStatus::Failure);
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].name, "initialization_failure");
        assert_eq!(report.steps[0].details["error_kind"], "input");
    }
}
