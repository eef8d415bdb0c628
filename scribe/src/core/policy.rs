//! Run-mode flags and the skip rules derived from them.

use crate::core::types::StepId;

/// Run-mode flags supplied on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunFlags {
    /// Validate and critique only; never mutate the repository.
    pub review_only: bool,
    /// Run the full pipeline but skip the final commit.
    pub no_commit: bool,
    /// Explicit commit request. `None` falls back to committing.
    pub commit: Option<bool>,
}

impl RunFlags {
    /// Resolve whether the commit step should execute.
    ///
    /// Review-only wins over no-commit, which wins over the explicit flag.
    /// With no flags at all the pipeline commits.
    pub fn commit_intent(&self) -> bool {
        if self.review_only || self.no_commit {
            return false;
        }
        self.commit.unwrap_or(true)
    }

    fn commit_skip_reason(&self) -> &'static str {
        if self.review_only {
            "--review-only active"
        } else if self.no_commit {
            "--no-commit active"
        } else {
            "commit not planned"
        }
    }
}

/// Return a skip message when run-mode flags forbid invoking `step`.
pub fn flag_skip(step: StepId, flags: &RunFlags) -> Option<String> {
    match step {
        StepId::RunPrecommit if flags.review_only => {
            Some("skipped: --review-only active".to_string())
        }
        StepId::CommitChanges if !flags.commit_intent() => {
            Some(format!("skipped: {}", flags.commit_skip_reason()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_intent_defaults_to_true() {
        assert!(RunFlags::default().commit_intent());
    }

    #[test]
    fn review_only_overrides_explicit_commit() {
        let flags = RunFlags {
            review_only: true,
            commit: Some(true),
            ..RunFlags::default()
        };
        assert!(!flags.commit_intent());
        assert_eq!(
            flag_skip(StepId::CommitChanges, &flags).as_deref(),
            Some("skipped: --review-only active")
        );
        assert!(flag_skip(StepId::RunPrecommit, &flags).is_some());
    }

    #[test]
    fn no_commit_skips_commit_but_not_precommit() {
        let flags = RunFlags {
            no_commit: true,
            ..RunFlags::default()
        };
        assert!(!flags.commit_intent());
        assert_eq!(
            flag_skip(StepId::CommitChanges, &flags).as_deref(),
            Some("skipped: --no-commit active")
        );
        assert_eq!(flag_skip(StepId::RunPrecommit, &flags), None);
    }

    #[test]
    fn explicit_false_commit_flag_is_honored() {
        let flags = RunFlags {
            commit: Some(false),
            ..RunFlags::default()
        };
        assert_eq!(
            flag_skip(StepId::CommitChanges, &flags).as_deref(),
            Some("skipped: commit not planned")
        );
    }

    #[test]
    fn other_steps_are_never_flag_skipped() {
        let flags = RunFlags {
            review_only: true,
            no_commit: true,
            commit: None,
        };
        assert_eq!(flag_skip(StepId::FormatCode, &flags), None);
        assert_eq!(flag_skip(StepId::GenerateReport, &flags), None);
    }
}
