//! Isolated environment provisioning: create, install dependencies, audit.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::audit::{AuditFinding, parse_audit_report};
use crate::core::classify::summarize_output;
use crate::error::ScribeError;
use crate::io::process::{ToolCommand, ToolOutput, ToolRunner};
use crate::io::resolver::ENV_BIN_DIR;

/// Directory of the isolated environment inside the target project.
pub const VENV_DIR: &str = ".venv";

/// Editable install targets tried in order when `pyproject.toml` is present.
const INSTALL_TARGETS: [&str; 5] = [
    ".[dev,test,lint,format]",
    ".[dev,test,lint]",
    ".[dev,test]",
    ".[dev]",
    ".",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    Created,
    Reused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// No manifest present.
    NothingToInstall,
    Installed { manifest: String, target: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuditOutcome {
    /// The audit tool could not be installed or found.
    Degraded { reason: String },
    /// The auditor ran but its output was not parseable.
    Unparseable { return_code: i32, message: String },
    Completed {
        return_code: i32,
        findings: Vec<AuditFinding>,
    },
}

/// Manages the per-project isolated environment.
pub struct Provisioner<'a> {
    runner: &'a dyn ToolRunner,
    project_dir: PathBuf,
    python: String,
    timeout: Option<Duration>,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        runner: &'a dyn ToolRunner,
        project_dir: impl Into<PathBuf>,
        python: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            runner,
            project_dir: project_dir.into(),
            python: python.into(),
            timeout,
        }
    }

    pub fn venv_path(&self) -> PathBuf {
        self.project_dir.join(VENV_DIR)
    }

    /// Create the environment if absent, then upgrade packaging tools.
    ///
    /// An existing environment is reused. A failed upgrade only warns.
    #[instrument(skip_all, fields(venv = %self.venv_path().display()))]
    pub fn setup(&self) -> Result<SetupOutcome, ScribeError> {
        let venv = self.venv_path();
        let outcome = if venv.is_dir() {
            info!("reusing existing environment");
            SetupOutcome::Reused
        } else {
            info!("creating environment");
            let out = self.runner.run(
                &ToolCommand::new(&self.python, &self.project_dir)
                    .args(["-m", "venv"])
                    .arg(venv.display().to_string())
                    .timeout(self.timeout),
            )?;
            if !out.success() {
                return Err(env_failure("environment creation failed", &out));
            }
            SetupOutcome::Created
        };

        for tool in ["python", "pip"] {
            let path = env_executable(&venv, tool);
            if !path.is_file() {
                return Err(ScribeError::environment(format!(
                    "{tool} missing from environment at {}",
                    path.display()
                ))
                .with_detail("venv", venv.display().to_string()));
            }
        }

        match self.pip(&["install", "--upgrade", "pip", "setuptools", "wheel"]) {
            Ok(out) if out.success() => debug!("packaging tools upgraded"),
            Ok(out) => warn!(exit_code = out.exit_code, "packaging tool upgrade failed"),
            Err(err) => warn!(%err, "packaging tool upgrade failed"),
        }
        Ok(outcome)
    }

    /// Install project dependencies from `pyproject.toml` or `requirements.txt`.
    #[instrument(skip_all)]
    pub fn install_dependencies(&self) -> Result<InstallOutcome, ScribeError> {
        let pyproject = self.project_dir.join("pyproject.toml");
        let requirements = self.project_dir.join("requirements.txt");

        if pyproject.is_file() {
            let mut last_failure = None;
            for target in INSTALL_TARGETS {
                let out = self.pip(&["install", "-e", target])?;
                if out.success() {
                    info!(target, "dependencies installed");
                    return Ok(InstallOutcome::Installed {
                        manifest: "pyproject.toml".to_string(),
                        target: target.to_string(),
                    });
                }
                debug!(target, exit_code = out.exit_code, "install target failed");
                last_failure = Some(out);
            }
            let out = last_failure.unwrap_or_default();
            return Err(env_failure(
                "every pyproject.toml install target failed",
                &out,
            ));
        }

        if requirements.is_file() {
            let out = self.pip(&["install", "-r", "requirements.txt"])?;
            if !out.success() {
                return Err(env_failure("requirements.txt install failed", &out));
            }
            info!("dependencies installed from requirements.txt");
            return Ok(InstallOutcome::Installed {
                manifest: "requirements.txt".to_string(),
                target: "requirements.txt".to_string(),
            });
        }

        info!("no dependency manifest found");
        Ok(InstallOutcome::NothingToInstall)
    }

    /// Best-effort vulnerability audit of the environment.
    #[instrument(skip_all)]
    pub fn audit_dependencies(&self) -> Result<AuditOutcome, ScribeError> {
        let venv = self.venv_path();
        let install_error = match self.pip(&["install", "pip-audit"]) {
            Ok(out) if out.success() => None,
            Ok(out) => Some(format!("pip install pip-audit exited {}", out.exit_code)),
            Err(err) => Some(err.to_string()),
        };
        if let Some(reason) = &install_error {
            warn!(reason = %reason, "audit tool install failed");
        }

        if let Err(err) = self.runner.resolve("pip-audit", Some(&venv)) {
            let reason = install_error.unwrap_or_else(|| err.to_string());
            return Ok(AuditOutcome::Degraded { reason });
        }

        let out = self.runner.run(
            &ToolCommand::new("pip-audit", &self.project_dir)
                .args(["--format", "json", "--progress-spinner", "off"])
                .in_env(Some(&venv))
                .timeout(self.timeout),
        )?;

        match parse_audit_report(&out.stdout) {
            Ok(findings) if out.stdout.trim().is_empty() && !out.success() => {
                debug!(count = findings.len(), "auditor produced no output");
                Ok(AuditOutcome::Unparseable {
                    return_code: out.exit_code,
                    message: format!(
                        "pip-audit exited {} without output: {}",
                        out.exit_code,
                        summarize_output(&out.stderr)
                    ),
                })
            }
            Ok(findings) => Ok(AuditOutcome::Completed {
                return_code: out.exit_code,
                findings,
            }),
            Err(err) => Ok(AuditOutcome::Unparseable {
                return_code: out.exit_code,
                message: format!("pip-audit JSON parse error: {err}"),
            }),
        }
    }

    fn pip(&self, args: &[&str]) -> Result<ToolOutput, ScribeError> {
        self.runner.run(
            &ToolCommand::new("pip", &self.project_dir)
                .args(args.iter().copied())
                .in_env(Some(&self.venv_path()))
                .timeout(self.timeout),
        )
    }
}

/// Path of `tool` inside the environment's executables directory.
pub fn env_executable(venv: &Path, tool: &str) -> PathBuf {
    let name = if cfg!(windows) {
        format!("{tool}.exe")
    } else {
        tool.to_string()
    };
    venv.join(ENV_BIN_DIR).join(name)
}

fn env_failure(message: &str, out: &ToolOutput) -> ScribeError {
    ScribeError::environment(format!("{message} (exit {})", out.exit_code))
        .with_detail("return_code", out.exit_code)
        .with_detail("stderr_summary", summarize_output(&out.stderr))
}
