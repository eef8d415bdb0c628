//! Stable exit codes for the scribe CLI.

/// Every recorded step finished without `FAILURE`.
pub const OK: i32 = 0;
/// The pipeline ran and at least one step failed (including an empty step list).
pub const FAILURE: i32 = 1;
/// Bootstrap failed before any step ran (configuration or input error).
pub const INIT_FAILURE: i32 = 2;
