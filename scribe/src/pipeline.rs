//! Ordered execution of the configured steps over one [`RunState`].
//!
//! The pipeline owns the run state and is the only step boundary: every
//! `Err` and every panic a step produces becomes a recorded `FAILURE`.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn};

use crate::core::policy::flag_skip;
use crate::core::run_state::{RunState, StepResult};
use crate::core::types::{Details, StepId, StepStatus, message_details};
use crate::error::ScribeError;
use crate::steps::{StepOutput, StepRunner};

const PRIOR_FAILURE: &str = "skipped due to prior failure";
const REVIEW_ONLY_DONE: &str = "review-only run ended after review";

/// Drives a [`StepRunner`] through the configured step names.
pub struct Pipeline<S: StepRunner> {
    runner: S,
    state: RunState,
}

impl<S: StepRunner> Pipeline<S> {
    pub fn new(runner: S, state: RunState) -> Self {
        Self { runner, state }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn runner(&self) -> &S {
        &self.runner
    }

    pub fn into_state(self) -> RunState {
        self.state
    }

    /// Execute every configured step in order, then finalize the run state.
    ///
    /// Returns whether the run succeeded.
    pub fn run(&mut self) -> bool {
        let names = self.state.step_names.clone();
        let _span = info_span!("pipeline", run_id = %self.state.run_id).entered();
        info!(steps = names.len(), flags = ?self.state.flags, "pipeline starting");

        if names.is_empty() {
            let err = ScribeError::configuration("no validation steps configured");
            error!(%err, "pipeline cannot start");
            self.state.record(StepResult::instant(
                "pipeline_setup",
                StepStatus::Failure,
                err.details(),
                Some(err.to_string()),
            ));
            self.state.error_message = Some(err.to_string());
            self.state.finalize(false);
            return false;
        }

        let mut commit_step_ran = false;
        let mut review_finished = false;
        for name in &names {
            let step = StepId::from_name(name);
            let terminal = step.is_some_and(StepId::is_terminal);

            if let Some(id) = step
                && let Some(reason) = flag_skip(id, &self.state.flags)
            {
                self.skip(name, &reason);
                continue;
            }
            if review_finished && !terminal {
                self.skip(name, REVIEW_ONLY_DONE);
                continue;
            }
            if self.state.has_failure() && !terminal {
                self.skip(name, PRIOR_FAILURE);
                continue;
            }
            let Some(id) = step else {
                self.record_invalid(name);
                continue;
            };

            let status = self.invoke(id);
            if id == StepId::CommitChanges {
                commit_step_ran = true;
            }
            if id == StepId::ReviewCode && self.state.flags.review_only && !status.is_failure() {
                info!("review-only run complete after review");
                review_finished = true;
            }
        }

        self.state.finalize(commit_step_ran);
        info!(
            status = %self.state.overall_status,
            duration = self.state.total_duration_seconds(),
            "pipeline finished"
        );
        self.state.is_success()
    }

    fn skip(&mut self, name: &str, reason: &str) {
        debug!(step = name, reason, "step skipped");
        self.state.record(StepResult::instant(
            name,
            StepStatus::Skipped,
            message_details(reason),
            None,
        ));
    }

    fn record_invalid(&mut self, name: &str) {
        let message = format!("invalid step '{name}' in configuration");
        error!(step = name, "unknown step name, halting");
        let err = ScribeError::configuration(message);
        self.state.record(StepResult::instant(
            name,
            StepStatus::Failure,
            err.details(),
            Some(format!("invalid step '{name}'")),
        ));
        self.note_first_failure(&err.to_string());
    }

    /// Run one step at the boundary and record its result.
    fn invoke(&mut self, id: StepId) -> StepStatus {
        let input = id
            .dependency()
            .and_then(|dep| self.state.last_invoked_details(dep.as_str()))
            .cloned();
        let _span = info_span!("step", step = %id).entered();
        info!(has_input = input.is_some(), "step starting");

        let started_at = Utc::now();
        let clock = Instant::now();
        let runner = &mut self.runner;
        let outcome = catch_unwind(AssertUnwindSafe(|| runner.run_step(id, input.as_ref())));
        let elapsed = clock.elapsed();

        let (status, details, error_message) = match outcome {
            Ok(Ok(StepOutput {
                status,
                details,
                artifact,
            })) => {
                if let Some(artifact) = artifact {
                    self.state.absorb(artifact);
                }
                (status, details, None)
            }
            Ok(Err(err)) => {
                if matches!(err, ScribeError::Unexpected(_)) {
                    error!(error = ?err, "step raised an unexpected error");
                } else {
                    warn!(%err, kind = err.kind(), "step failed");
                }
                (StepStatus::Failure, err.details(), Some(err.to_string()))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "step panicked");
                let mut details = message_details(format!("unexpected panic: {message}"));
                details.insert("error_kind".to_string(), Value::from("unexpected"));
                (
                    StepStatus::Failure,
                    details,
                    Some(format!("unexpected: {message}")),
                )
            }
        };

        info!(%status, duration_ms = elapsed.as_millis() as u64, "step finished");
        if status.is_failure() {
            let reason = error_message
                .clone()
                .or_else(|| message_of(&details))
                .unwrap_or_else(|| "step reported failure".to_string());
            self.note_first_failure(&format!("{id}: {reason}"));
        }
        self.state.record(StepResult::timed(
            id.as_str(),
            status,
            details,
            error_message,
            started_at,
            elapsed,
        ));
        status
    }

    fn note_first_failure(&mut self, message: &str) {
        if self.state.error_message.is_none() {
            self.state.error_message = Some(message.to_string());
        }
    }
}

fn message_of(details: &Details) -> Option<String> {
    details
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::RunFlags;
    use crate::core::run_state::StepArtifact;
    use crate::test_support::{ScriptedSteps, run_state};

    fn statuses(state: &RunState) -> Vec<(&str, StepStatus)> {
        state
            .steps
            .iter()
            .map(|step| (step.name.as_str(), step.status))
            .collect()
    }

    #[test]
    fn empty_step_list_records_setup_failure() {
        let mut pipeline = Pipeline::new(ScriptedSteps::new(), run_state(&[], RunFlags::default()));
        assert!(!pipeline.run());
        let state = pipeline.state();
        assert_eq!(statuses(state), vec![("pipeline_setup", StepStatus::Failure)]);
        assert_eq!(state.steps[0].details["error_kind"], "configuration");
        assert_eq!(state.overall_status, StepStatus::Failure);
        assert!(pipeline.runner().invocations().is_empty());
    }

    #[test]
    fn unknown_step_halts_and_later_steps_are_skipped() {
        let mut pipeline = Pipeline::new(
            ScriptedSteps::new(),
            run_state(
                &["validate_inputs", "bogus_step", "apply_code", "generate_report"],
                RunFlags::default(),
            ),
        );
        assert!(!pipeline.run());
        let state = pipeline.state();
        assert_eq!(
            statuses(state),
            vec![
                ("validate_inputs", StepStatus::Success),
                ("bogus_step", StepStatus::Failure),
                ("apply_code", StepStatus::Skipped),
                ("generate_report", StepStatus::Success),
            ]
        );
        assert_eq!(
            state.steps[1].details["message"],
            "invalid step 'bogus_step' in configuration"
        );
        assert_eq!(
            pipeline.runner().invocations(),
            vec![StepId::ValidateInputs, StepId::GenerateReport]
        );
    }

    #[test]
    fn error_becomes_failure_with_kind() {
        let steps = ScriptedSteps::new();
        steps.fail(StepId::FormatCode, ScribeError::tool("ruff format exited 2"));
        let mut pipeline = Pipeline::new(
            steps,
            run_state(&["format_code", "lint_code"], RunFlags::default()),
        );
        assert!(!pipeline.run());
        let state = pipeline.state();
        let failed = &state.steps[0];
        assert_eq!(failed.status, StepStatus::Failure);
        assert_eq!(failed.details["error_kind"], "tool");
        assert_eq!(
            failed.error_message.as_deref(),
            Some("tool error: ruff format exited 2")
        );
        assert_eq!(state.steps[1].details["message"], PRIOR_FAILURE);
        assert!(
            state
                .error_message
                .as_deref()
                .is_some_and(|msg| msg.starts_with("format_code"))
        );
    }

    #[test]
    fn panic_is_contained_as_failure() {
        let steps = ScriptedSteps::new();
        steps.panic_on(StepId::LintCode);
        let mut pipeline = Pipeline::new(
            steps,
            run_state(&["lint_code", "generate_report"], RunFlags::default()),
        );
        assert!(!pipeline.run());
        let state = pipeline.state();
        assert_eq!(state.steps[0].status, StepStatus::Failure);
        assert_eq!(state.steps[0].details["error_kind"], "unexpected");
        assert_eq!(state.steps[1].status, StepStatus::Success);
    }

    #[test]
    fn dependency_details_are_passed_to_consumer() {
        let steps = ScriptedSteps::new();
        let mut details = message_details("sigs");
        details.insert("raw_output".to_string(), Value::from("def f():"));
        steps.succeed_with(StepId::ExtractSignatures, details.clone());
        let mut pipeline = Pipeline::new(
            steps,
            run_state(&["extract_signatures", "generate_tests"], RunFlags::default()),
        );
        assert!(pipeline.run());
        let inputs = pipeline.runner().inputs_for(StepId::GenerateTests);
        assert_eq!(inputs, vec![Some(details)]);
    }

    #[test]
    fn artifacts_are_absorbed_into_state() {
        let steps = ScriptedSteps::new();
        steps.push(
            StepId::ReviewCode,
            StepOutput::new(StepStatus::Advisory, message_details("0 items"))
                .with_artifact(StepArtifact::ReviewFindings(Vec::new())),
        );
        let mut pipeline =
            Pipeline::new(steps, run_state(&["review_code"], RunFlags::default()));
        assert!(pipeline.run());
        assert_eq!(pipeline.state().review_findings, Some(Vec::new()));
    }

    #[test]
    fn commit_not_requested_is_skipped_and_not_attempted() {
        let flags = RunFlags {
            commit: Some(false),
            ..RunFlags::default()
        };
        let mut pipeline = Pipeline::new(
            ScriptedSteps::new(),
            run_state(&["apply_code", "commit_changes"], flags),
        );
        assert!(pipeline.run());
        let state = pipeline.state();
        assert_eq!(state.steps[1].status, StepStatus::Skipped);
        assert_eq!(state.steps[1].details["message"], "skipped: commit not planned");
        assert!(!state.commit_attempted);
    }

    #[test]
    fn review_only_failure_in_review_still_skips_commit_by_flag() {
        let steps = ScriptedSteps::new();
        steps.fail(StepId::ReviewCode, ScribeError::configuration("bad template"));
        let flags = RunFlags {
            review_only: true,
            ..RunFlags::default()
        };
        let mut pipeline = Pipeline::new(
            steps,
            run_state(&["review_code", "run_precommit", "commit_changes"], flags),
        );
        assert!(!pipeline.run());
        let state = pipeline.state();
        assert_eq!(
            state.steps[1].details["message"],
            "skipped: --review-only active"
        );
        assert_eq!(state.steps[2].status, StepStatus::Skipped);
    }
}
