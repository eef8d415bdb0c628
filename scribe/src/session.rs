//! Session bootstrap: configuration, input validation and wiring of the
//! real tool runner and model client before the pipeline runs.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, instrument};

use crate::core::policy::RunFlags;
use crate::core::run_state::{RunState, run_id_for};
use crate::error::ScribeError;
use crate::exit_codes;
use crate::io::config::{ScribeConfig, load_config, locate_config};
use crate::io::model::{HttpTransport, ModelClient};
use crate::io::process::SystemToolRunner;
use crate::io::prompt::PromptRenderer;
use crate::io::report::{FinalReport, InitFailure};
use crate::io::resolver::Resolver;
use crate::io::staging::resolve_run_target;
use crate::pipeline::Pipeline;
use crate::steps::{StepRegistry, Workflow, WorkflowRunner};

/// Everything the command line contributes to one run.
#[derive(Debug, Clone, Default)]
pub struct SessionRequest {
    pub target_dir: PathBuf,
    pub source_file: PathBuf,
    pub target_file: String,
    pub flags: RunFlags,
    pub config_file: Option<PathBuf>,
    /// Overrides `model.base_url` after environment overrides.
    pub ollama_base_url: Option<String>,
    /// Overrides `model.model` after environment overrides.
    pub ollama_model: Option<String>,
}

/// Report to emit and the process exit code that goes with it.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub report: FinalReport,
    pub exit_code: i32,
}

/// Bootstrap and run one session. Always produces a report.
#[instrument(
    skip_all,
    fields(target_dir = %request.target_dir.display(), target_file = %request.target_file)
)]
pub fn run_session(request: &SessionRequest) -> SessionOutcome {
    let start_time = Utc::now();
    match bootstrap(request) {
        Ok((runner, state)) => {
            let mut pipeline = Pipeline::new(runner, state);
            let success = pipeline.run();
            SessionOutcome {
                report: FinalReport::from_run(pipeline.state()),
                exit_code: if success {
                    exit_codes::OK
                } else {
                    exit_codes::FAILURE
                },
            }
        }
        Err(err) => {
            error!(%err, kind = err.kind(), "session bootstrap failed");
            let target_dir = request.target_dir.display().to_string();
            let language = ScribeConfig::default().language;
            let report = FinalReport::initialization_failure(InitFailure {
                run_id: run_id_for(start_time),
                start_time,
                target_dir: &target_dir,
                target_file: &request.target_file,
                language: &language,
                commit_intent: request.flags.commit_intent(),
                error_kind: err.kind(),
                message: err.to_string(),
            });
            SessionOutcome {
                report,
                exit_code: exit_codes::INIT_FAILURE,
            }
        }
    }
}

/// Resolve configuration and inputs, then wire the production step runner.
fn bootstrap(request: &SessionRequest) -> Result<(WorkflowRunner, RunState), ScribeError> {
    let config = resolve_config(request)?;
    let target = resolve_run_target(
        &request.target_dir,
        &request.source_file,
        &request.target_file,
        &config.allowed_target_bases,
    )?;
    info!(
        target = %target.target_file.display(),
        steps = config.validation_steps.len(),
        model = %config.model.model,
        "session ready"
    );

    let tools = SystemToolRunner::new(
        Resolver::new(config.tool_paths.clone()),
        config.output_limit_bytes,
    );
    let transport = HttpTransport::new(
        &config.model.base_url,
        Duration::from_secs(config.model.request_timeout_secs),
    )?;
    let model = ModelClient::new(
        Box::new(transport),
        &config.model,
        PromptRenderer::new(&config.prompts, &config.language),
        &config.language,
    );

    let state = RunState::new(
        target.clone(),
        config.language.clone(),
        request.flags,
        config.validation_steps.clone(),
    );
    let workflow = Workflow::new(target, config, Box::new(tools), model);
    Ok((WorkflowRunner::new(workflow, StepRegistry::standard()), state))
}

/// File, then environment, then command-line overrides.
fn resolve_config(request: &SessionRequest) -> Result<ScribeConfig, ScribeError> {
    let cwd = env::current_dir()
        .map_err(|err| ScribeError::environment(format!("cannot read current directory: {err}")))?;
    let path = locate_config(request.config_file.as_deref(), &request.target_dir, &cwd);
    let mut config = load_config(path.as_deref())?;
    config.apply_env_overrides(|key| env::var(key).ok());
    if let Some(base_url) = &request.ollama_base_url {
        config.model.base_url = base_url.clone();
    }
    if let Some(model) = &request.ollama_model {
        config.model.model = model.clone();
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StepStatus;
    use crate::test_support::TestProject;

    /// Verifies a missing target directory yields the minimal init report.
    #[test]
    fn missing_target_dir_is_init_failure() {
        let project = TestProject::new("x = 1\n").expect("project");
        let request = SessionRequest {
            target_dir: project.path().join("nope"),
            source_file: project.source().to_path_buf(),
            target_file: "app.py".to_string(),
            ..SessionRequest::default()
        };
        let outcome = run_session(&request);
        assert_eq!(outcome.exit_code, exit_codes::INIT_FAILURE);
        assert_eq!(outcome.report.steps.len(), 1);
        assert_eq!(outcome.report.steps[0].name, "initialization_failure");
        assert_eq!(outcome.report.steps[0].details["error_kind"], "input");
        assert_eq!(outcome.report.overall_status, StepStatus::Failure);
    }

    /// Verifies command-line model overrides beat the file.
    #[test]
    fn cli_overrides_apply_over_file() {
        let project = TestProject::new("x = 1\n").expect("project");
        project
            .write(".scribe.toml", "[model]\nmodel = \"from-file\"\n")
            .expect("config");
        let request = SessionRequest {
            target_dir: project.path().to_path_buf(),
            ollama_model: Some("from-cli".to_string()),
            ..SessionRequest::default()
        };
        let config = resolve_config(&request).expect("config");
        assert_eq!(config.model.model, "from-cli");
    }

    /// Verifies an invalid override is rejected at bootstrap.
    #[test]
    fn invalid_base_url_override_is_configuration_error() {
        let project = TestProject::new("x = 1\n").expect("project");
        let request = SessionRequest {
            target_dir: project.path().to_path_buf(),
            ollama_base_url: Some("localhost:11434".to_string()),
            ..SessionRequest::default()
        };
        let err = resolve_config(&request).expect_err("invalid");
        assert_eq!(err.kind(), "configuration");
    }
}
