use std::path::Path;

use serde_json::Value;
use tracing::{info, instrument, warn};

use super::{StepOutput, Workflow};
use crate::core::run_state::{CommitOutcome, StepArtifact};
use crate::core::types::{Details, StepStatus, message_details};
use crate::error::ScribeError;
use crate::io::git::{CommitResult, Git};
use crate::io::prompt::render_commit_message;
use crate::io::report::SCRIBE_VERSION;

/// Stage and commit the target file. A clean path issues no `add` or `commit`.
#[instrument(skip_all, fields(target = %wf.target.target_file_relative))]
pub(super) fn commit_changes(
    wf: &Workflow,
    _input: Option<&Details>,
) -> Result<StepOutput, ScribeError> {
    let git = Git::new(wf.tools.as_ref(), wf.project_dir()).with_timeout(wf.config.tool_timeout());
    if !git.is_available() {
        return Ok(StepOutput::new(
            StepStatus::Warning,
            message_details("git not available, commit skipped"),
        ));
    }

    let path = Path::new(&wf.target.target_file_relative);
    let entries = git.status_porcelain(path)?;
    if entries.is_empty() {
        info!("no changes to commit");
        return Ok(
            StepOutput::new(StepStatus::Success, message_details("no changes to commit"))
                .with_artifact(StepArtifact::Commit(CommitOutcome::NoChanges)),
        );
    }

    git.add(path)?;
    let message = render_commit_message(
        &wf.config.commit_message_template,
        &wf.target.target_file_relative,
        SCRIBE_VERSION,
    )?;
    match git.commit(&message)? {
        CommitResult::NothingToCommit => {
            warn!("staged path produced no effective change");
            Ok(StepOutput::new(
                StepStatus::Success,
                message_details("nothing to commit after staging"),
            )
            .with_artifact(StepArtifact::Commit(CommitOutcome::NoEffectiveChanges)))
        }
        CommitResult::Committed => {
            let sha = git.head_sha()?;
            info!(%sha, "changes committed");
            let mut details = message_details(format!("committed {sha}"));
            details.insert("commit_sha".to_string(), Value::String(sha.clone()));
            details.insert("commit_message".to_string(), Value::String(message));
            Ok(StepOutput::new(StepStatus::Success, details)
                .with_artifact(StepArtifact::Commit(CommitOutcome::Committed(sha))))
        }
    }
}
