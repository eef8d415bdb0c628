//! Validation pipeline for AI-generated code changes.
//!
//! Scribe stages a candidate source file into a target project, runs it
//! through an ordered list of validation steps (isolated environment,
//! dependency install and audit, formatter, linter, type checker, generated
//! tests, AI review, pre-commit, commit) and emits one structured report.
//!
//! - **[`core`]**: Pure logic (step identifiers, skip rules, exit-code
//!   classification, code extraction, run state). No I/O.
//! - **[`io`]**: Side effects (processes, executable lookup, git, the
//!   inference backend, configuration, rendering).
//!
//! [`steps`] implements each named step over a read-only
//! [`steps::Workflow`]; [`pipeline`] sequences them and owns the run state;
//! [`session`] wires both together for the CLI.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod session;
pub mod steps;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
