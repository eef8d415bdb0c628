//! Locate tool executables: configured override, isolated environment, `PATH`.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ScribeError;

/// Name of the executables directory inside an isolated environment.
#[cfg(windows)]
pub const ENV_BIN_DIR: &str = "Scripts";
#[cfg(not(windows))]
pub const ENV_BIN_DIR: &str = "bin";

/// Executable lookup honoring configured overrides.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    overrides: BTreeMap<String, PathBuf>,
    search_path: Option<OsString>,
}

impl Resolver {
    pub fn new(overrides: BTreeMap<String, PathBuf>) -> Self {
        Self {
            overrides,
            search_path: env::var_os("PATH"),
        }
    }

    /// Use `search_path` instead of the process `PATH`.
    pub fn with_search_path(mut self, search_path: Option<OsString>) -> Self {
        self.search_path = search_path;
        self
    }

    /// Resolve `tool` to an executable path.
    ///
    /// Order: configured override (only if executable), `<env_root>/bin`, then
    /// `PATH`. A `tool` containing a path separator is checked directly.
    pub fn resolve(&self, tool: &str, env_root: Option<&Path>) -> Result<PathBuf, ScribeError> {
        if let Some(path) = self.overrides.get(tool) {
            if is_executable(path) {
                debug!(tool, path = %path.display(), "using configured executable");
                return Ok(path.clone());
            }
            warn!(tool, path = %path.display(), "configured executable is not usable, searching");
        }

        let as_path = Path::new(tool);
        if as_path.components().count() > 1 {
            if is_executable(as_path) {
                return Ok(as_path.to_path_buf());
            }
            return Err(not_found(tool));
        }

        if let Some(root) = env_root
            && let Some(found) = find_in_dir(&root.join(ENV_BIN_DIR), tool)
        {
            debug!(tool, path = %found.display(), "using isolated environment executable");
            return Ok(found);
        }

        if let Some(search_path) = &self.search_path {
            for dir in env::split_paths(search_path) {
                if let Some(found) = find_in_dir(&dir, tool) {
                    debug!(tool, path = %found.display(), "using PATH executable");
                    return Ok(found);
                }
            }
        }

        Err(not_found(tool))
    }
}

fn not_found(tool: &str) -> ScribeError {
    ScribeError::environment(format!("executable '{tool}' not found"))
        .with_detail("tool", tool)
}

fn find_in_dir(dir: &Path, tool: &str) -> Option<PathBuf> {
    let candidate = dir.join(tool);
    if is_executable(&candidate) {
        return Some(candidate);
    }
    if cfg!(windows) {
        let exe = dir.join(format!("{tool}.exe"));
        if is_executable(&exe) {
            return Some(exe);
        }
    }
    None
}

#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}
