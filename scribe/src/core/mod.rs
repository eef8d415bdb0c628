//! Pure pipeline logic: step identity, run-mode policy, classification and
//! response parsing. Nothing here touches the filesystem or spawns processes.

pub mod audit;
pub mod classify;
pub mod extract;
pub mod policy;
pub mod run_state;
pub mod signatures;
pub mod types;
