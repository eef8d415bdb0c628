//! Git adapter for the commit step.
//!
//! Only four git commands are ever issued: `status --porcelain <path>`,
//! `add <path>`, `commit -m <message>` and `rev-parse HEAD`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::error::ScribeError;
use crate::io::process::{ToolCommand, ToolOutput, ToolRunner};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Outcome of `git commit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
    Committed,
    /// Git refused because the index matched HEAD.
    NothingToCommit,
}

/// Wrapper for executing git commands in a working directory.
pub struct Git<'a> {
    runner: &'a dyn ToolRunner,
    workdir: PathBuf,
    timeout: Option<Duration>,
}

impl<'a> Git<'a> {
    pub fn new(runner: &'a dyn ToolRunner, workdir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            workdir: workdir.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// True if a `git` executable can be resolved.
    pub fn is_available(&self) -> bool {
        match self.runner.resolve("git", None) {
            Ok(_) => true,
            Err(err) => {
                warn!(%err, "git not available");
                false
            }
        }
    }

    /// Status entries for a single path.
    pub fn status_porcelain(&self, path: &Path) -> Result<Vec<StatusEntry>, ScribeError> {
        let out = self.run_checked(&["status", "--porcelain", &path_arg(path)])?;
        let mut entries = Vec::new();
        for line in out.stdout.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    pub fn add(&self, path: &Path) -> Result<(), ScribeError> {
        self.run_checked(&["add", &path_arg(path)])?;
        Ok(())
    }

    /// Commit staged changes with a message.
    #[instrument(skip_all)]
    pub fn commit(&self, message: &str) -> Result<CommitResult, ScribeError> {
        let out = self.run(&["commit", "-m", message])?;
        if out.success() {
            debug!("commit created");
            return Ok(CommitResult::Committed);
        }
        let combined = format!("{}\n{}", out.stdout, out.stderr).to_lowercase();
        if combined.contains("nothing to commit") {
            debug!("git reported nothing to commit");
            return Ok(CommitResult::NothingToCommit);
        }
        Err(git_failure(&["commit", "-m", "<message>"], &out))
    }

    /// Full SHA of `HEAD`.
    pub fn head_sha(&self) -> Result<String, ScribeError> {
        let out = self.run_checked(&["rev-parse", "HEAD"])?;
        Ok(out.stdout.trim().to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<ToolOutput, ScribeError> {
        let out = self.run(args)?;
        if !out.success() {
            return Err(git_failure(args, &out));
        }
        Ok(out)
    }

    fn run(&self, args: &[&str]) -> Result<ToolOutput, ScribeError> {
        let command = ToolCommand::new("git", &self.workdir)
            .args(args.iter().copied())
            .timeout(self.timeout);
        self.runner.run(&command)
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

fn git_failure(args: &[&str], out: &ToolOutput) -> ScribeError {
    ScribeError::tool(format!(
        "git {} failed (exit {}): {}",
        args.join(" "),
        out.exit_code,
        out.stderr.trim()
    ))
    .with_detail("tool_name", "git")
    .with_detail("return_code", out.exit_code)
}

fn parse_status_line(line: &str) -> Result<StatusEntry, ScribeError> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 || !line.is_char_boundary(3) {
        return Err(ScribeError::tool(format!(
            "unexpected porcelain line: '{line}'"
        )));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedToolRunner;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.py").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.py".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.py -> new.py").expect("parse");
        assert_eq!(e.path, "new.py");
    }

    #[test]
    fn rejects_short_line() {
        assert!(parse_status_line("M").is_err());
    }

    #[test]
    fn commit_detects_nothing_to_commit() {
        let runner = ScriptedToolRunner::new();
        runner.respond("git", 1, "nothing to commit, working tree clean\n", "");
        let git = Git::new(&runner, "/tmp/project");
        assert_eq!(
            git.commit("msg").expect("commit"),
            CommitResult::NothingToCommit
        );
    }

    #[test]
    fn commit_failure_is_tool_error() {
        let runner = ScriptedToolRunner::new();
        runner.respond("git", 128, "", "fatal: bad things\n");
        let git = Git::new(&runner, "/tmp/project");
        let err = git.commit("msg").expect_err("fails");
        assert_eq!(err.kind(), "tool");
        assert_eq!(err.details()["return_code"], 128);
    }
}
