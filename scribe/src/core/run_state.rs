//! In-memory record of a single pipeline run.
//!
//! `RunState` is owned by the pipeline and mutated only between step
//! invocations. Steps never touch it; they hand back a [`StepArtifact`] and the
//! pipeline records it here.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::audit::AuditFinding;
use crate::core::extract::ReviewFinding;
use crate::core::policy::RunFlags;
use crate::core::types::{Details, StepId, StepStatus};

/// Validated locations of the files a run operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTarget {
    /// Canonical project root.
    pub target_dir: PathBuf,
    /// Canonical candidate source file.
    pub source_file: PathBuf,
    /// Absolute staged path inside `target_dir`.
    pub target_file: PathBuf,
    /// Staged path as given, relative to `target_dir`.
    pub target_file_relative: String,
}

/// Immutable outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub details: Details,
    pub error_message: Option<String>,
}

impl StepResult {
    /// A result recorded without invoking anything (skips, synthetic failures).
    pub fn instant(
        name: impl Into<String>,
        status: StepStatus,
        details: Details,
        error_message: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            status,
            start_time: now,
            end_time: now,
            duration_seconds: 0.0,
            details,
            error_message,
        }
    }

    /// A result for an invoked step that started at `start_time` and ran for `elapsed`.
    pub fn timed(
        name: impl Into<String>,
        status: StepStatus,
        details: Details,
        error_message: Option<String>,
        start_time: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            status,
            start_time,
            end_time: Utc::now(),
            duration_seconds: round_millis(elapsed.as_secs_f64()),
            details,
            error_message,
        }
    }
}

/// Result of the commit step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CommitOutcome {
    #[default]
    NotAttempted,
    /// The staged path had no modifications.
    NoChanges,
    /// `git commit` reported nothing to commit after staging.
    NoEffectiveChanges,
    Committed(String),
}

impl CommitOutcome {
    /// Value reported in the `commit_sha` field.
    pub fn report_value(&self) -> Option<String> {
        match self {
            CommitOutcome::NotAttempted => None,
            CommitOutcome::NoChanges => Some("NO_CHANGES".to_string()),
            CommitOutcome::NoEffectiveChanges => Some("NO_EFFECTIVE_CHANGES_STAGED".to_string()),
            CommitOutcome::Committed(sha) => Some(sha.clone()),
        }
    }
}

/// Captured output of the test runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestSummary {
    pub stdout: String,
    pub stderr: String,
    pub return_code: i32,
}

/// Typed side output a step hands back for the run record.
#[derive(Debug, Clone, PartialEq)]
pub enum StepArtifact {
    AuditFindings(Vec<AuditFinding>),
    ReviewFindings(Vec<ReviewFinding>),
    TestSummary(TestSummary),
    Commit(CommitOutcome),
}

/// Mutable record of one pipeline execution.
#[derive(Debug, Clone)]
pub struct RunState {
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub target: RunTarget,
    pub language: String,
    pub flags: RunFlags,
    pub step_names: Vec<String>,
    pub steps: Vec<StepResult>,
    pub overall_status: StepStatus,
    pub commit_attempted: bool,
    pub commit: CommitOutcome,
    pub audit_findings: Option<Vec<AuditFinding>>,
    pub review_findings: Option<Vec<ReviewFinding>>,
    pub test_summary: Option<TestSummary>,
    pub error_message: Option<String>,
}

impl RunState {
    pub fn new(
        target: RunTarget,
        language: impl Into<String>,
        flags: RunFlags,
        step_names: Vec<String>,
    ) -> Self {
        let start_time = Utc::now();
        Self {
            run_id: run_id_for(start_time),
            start_time,
            end_time: None,
            target,
            language: language.into(),
            flags,
            step_names,
            steps: Vec::new(),
            overall_status: StepStatus::Pending,
            commit_attempted: false,
            commit: CommitOutcome::NotAttempted,
            audit_findings: None,
            review_findings: None,
            test_summary: None,
            error_message: None,
        }
    }

    pub fn record(&mut self, result: StepResult) {
        self.steps.push(result);
    }

    pub fn has_failure(&self) -> bool {
        self.steps.iter().any(|step| step.status.is_failure())
    }

    /// Details of the most recent invoked (non-skipped) result named `name`.
    pub fn last_invoked_details(&self, name: &str) -> Option<&Details> {
        self.steps
            .iter()
            .rev()
            .find(|step| step.name == name && step.status != StepStatus::Skipped)
            .map(|step| &step.details)
    }

    pub fn absorb(&mut self, artifact: StepArtifact) {
        match artifact {
            StepArtifact::AuditFindings(findings) => self.audit_findings = Some(findings),
            StepArtifact::ReviewFindings(findings) => self.review_findings = Some(findings),
            StepArtifact::TestSummary(summary) => self.test_summary = Some(summary),
            StepArtifact::Commit(outcome) => self.commit = outcome,
        }
    }

    /// Stamp the end time and derive overall status and commit-attempted.
    pub fn finalize(&mut self, commit_step_ran: bool) {
        self.end_time = Some(Utc::now());
        self.overall_status = if self.has_failure() {
            StepStatus::Failure
        } else {
            StepStatus::Success
        };
        let commit_configured = self
            .step_names
            .iter()
            .any(|name| name == StepId::CommitChanges.as_str());
        self.commit_attempted = self.flags.commit_intent() && commit_configured && commit_step_ran;
    }

    pub fn total_duration_seconds(&self) -> f64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        let millis = (end - self.start_time).num_milliseconds().max(0);
        round_millis(millis as f64 / 1000.0)
    }

    pub fn is_success(&self) -> bool {
        self.overall_status == StepStatus::Success
    }
}

/// Run identifier derived from the start time, e.g. `scribe_20250101_120000`.
pub fn run_id_for(start: DateTime<Utc>) -> String {
    format!("scribe_{}", start.format("%Y%m%d_%H%M%S"))
}

fn round_millis(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::message_details;
    use chrono::TimeZone;

    fn target() -> RunTarget {
        RunTarget {
            target_dir: PathBuf::from("/tmp/project"),
            source_file: PathBuf::from("/tmp/candidate.py"),
            target_file: PathBuf::from("/tmp/project/pkg/mod.py"),
            target_file_relative: "pkg/mod.py".to_string(),
        }
    }

    #[test]
    fn run_id_uses_utc_timestamp() {
        let start = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).single().expect("time");
        assert_eq!(run_id_for(start), "scribe_20240309_070501");
    }

    #[test]
    fn dependency_lookup_ignores_skipped_results() {
        let mut state = RunState::new(target(), "python", RunFlags::default(), Vec::new());
        state.record(StepResult::instant(
            "extract_signatures",
            StepStatus::Success,
            message_details("first"),
            None,
        ));
        state.record(StepResult::instant(
            "extract_signatures",
            StepStatus::Skipped,
            message_details("skipped"),
            None,
        ));
        let details = state
            .last_invoked_details("extract_signatures")
            .expect("details");
        assert_eq!(details["message"], "first");
        assert!(state.last_invoked_details("save_tests").is_none());
    }

    #[test]
    fn finalize_marks_failure_and_commit_attempt() {
        let mut state = RunState::new(
            target(),
            "python",
            RunFlags::default(),
            vec!["commit_changes".to_string()],
        );
        state.record(StepResult::instant(
            "commit_changes",
            StepStatus::Failure,
            Details::new(),
            Some("boom".to_string()),
        ));
        state.finalize(true);
        assert_eq!(state.overall_status, StepStatus::Failure);
        assert!(state.commit_attempted);
        assert!(!state.is_success());
    }

    #[test]
    fn commit_sentinels_render_for_report() {
        assert_eq!(CommitOutcome::NotAttempted.report_value(), None);
        assert_eq!(
            CommitOutcome::NoChanges.report_value().as_deref(),
            Some("NO_CHANGES")
        );
        assert_eq!(
            CommitOutcome::Committed("abc".to_string())
                .report_value()
                .as_deref(),
            Some("abc")
        );
    }
}
