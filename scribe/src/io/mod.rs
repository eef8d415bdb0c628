//! Side-effecting adapters: configuration, processes, git, the isolated
//! environment, the model backend and report output.

pub mod config;
pub mod environment;
pub mod git;
pub mod model;
pub mod process;
pub mod prompt;
pub mod report;
pub mod resolver;
pub mod staging;
