//! Scripted fakes and fixtures shared by unit and integration tests.
//!
//! Compiled for `cfg(test)` and behind the `test-support` feature so the
//! integration tests in `tests/` can drive the real pipeline without external
//! tools or an inference backend.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::core::policy::RunFlags;
use crate::core::run_state::{RunState, RunTarget};
use crate::core::types::{Details, StepId, StepStatus, message_details};
use crate::error::ScribeError;
use crate::io::config::{ModelConfig, ScribeConfig};
use crate::io::environment::env_executable;
use crate::io::model::{GenerateRequest, ModelClient, Transport, TransportError};
use crate::io::process::{ToolCommand, ToolOutput, ToolRunner};
use crate::io::prompt::PromptRenderer;
use crate::io::staging::resolve_run_target;
use crate::steps::{StepOutput, StepRunner, Workflow};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("test support lock poisoned")
}

/// Computes a tool's output from the command it was given.
pub type ToolScript = Arc<dyn Fn(&ToolCommand) -> ToolOutput + Send + Sync>;

#[derive(Default)]
struct ToolScriptState {
    queued: HashMap<String, VecDeque<ToolOutput>>,
    scripts: HashMap<String, ToolScript>,
    missing: HashSet<String>,
    calls: Vec<ToolCommand>,
}

/// [`ToolRunner`] answering from per-program queues.
///
/// Lookup order for a call: queued responses (consumed once), then a
/// persistent script, then a successful empty result. Clones share state, so
/// a test can hand one clone to a workflow and inspect calls through another.
#[derive(Clone, Default)]
pub struct ScriptedToolRunner {
    state: Arc<Mutex<ToolScriptState>>,
}

impl ScriptedToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response for the next call to `program`.
    pub fn respond(&self, program: &str, exit_code: i32, stdout: &str, stderr: &str) {
        lock(&self.state)
            .queued
            .entry(program.to_string())
            .or_default()
            .push_back(ToolOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                timed_out: false,
            });
    }

    /// Answer every unqueued call to `program` with `script`.
    pub fn script(
        &self,
        program: &str,
        script: impl Fn(&ToolCommand) -> ToolOutput + Send + Sync + 'static,
    ) {
        lock(&self.state)
            .scripts
            .insert(program.to_string(), Arc::new(script));
    }

    /// Make `program` unresolvable.
    pub fn mark_missing(&self, program: &str) {
        lock(&self.state).missing.insert(program.to_string());
    }

    pub fn calls(&self) -> Vec<ToolCommand> {
        lock(&self.state).calls.clone()
    }

    pub fn calls_for(&self, program: &str) -> Vec<ToolCommand> {
        self.calls()
            .into_iter()
            .filter(|call| call.program == program)
            .collect()
    }

    /// True if any recorded call to `program` starts with `args`.
    pub fn called_with(&self, program: &str, args: &[&str]) -> bool {
        self.calls_for(program).iter().any(|call| {
            call.args.len() >= args.len() && call.args.iter().zip(args).all(|(a, b)| a == b)
        })
    }
}

impl ToolRunner for ScriptedToolRunner {
    fn resolve(&self, tool: &str, _env_root: Option<&Path>) -> Result<PathBuf, ScribeError> {
        if lock(&self.state).missing.contains(tool) {
            return Err(ScribeError::environment(format!("executable '{tool}' not found"))
                .with_detail("tool", tool));
        }
        Ok(PathBuf::from(tool))
    }

    fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ScribeError> {
        self.resolve(&command.program, command.env_root.as_deref())?;
        let script = {
            let mut state = lock(&self.state);
            state.calls.push(command.clone());
            if let Some(out) = state
                .queued
                .get_mut(&command.program)
                .and_then(VecDeque::pop_front)
            {
                return Ok(out);
            }
            state.scripts.get(&command.program).cloned()
        };
        Ok(script.map(|script| script(command)).unwrap_or_default())
    }
}

/// Script for `python -m venv <path>` that lays out a fake environment.
pub fn fake_venv_creator() -> impl Fn(&ToolCommand) -> ToolOutput + Send + Sync + 'static {
    |command: &ToolCommand| {
        let Some(venv) = command.args.last().map(PathBuf::from) else {
            return ToolOutput {
                exit_code: 2,
                stderr: "missing venv path".to_string(),
                ..ToolOutput::default()
            };
        };
        for tool in ["python", "pip"] {
            let path = env_executable(&venv, tool);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("create fake venv bin dir");
            }
            fs::write(&path, "").expect("write fake venv executable");
        }
        ToolOutput::default()
    }
}

/// Write an executable script `dir/name` and return its path.
#[cfg(unix)]
pub fn write_executable(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    fs::create_dir_all(dir).expect("create script dir");
    let path = dir.join(name);
    fs::write(&path, body).expect("write script");
    let mut perms = fs::metadata(&path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod script");
    path
}

#[derive(Default)]
struct TransportState {
    responses: VecDeque<Result<String, TransportError>>,
    requests: Vec<GenerateRequest>,
}

/// [`Transport`] replaying scripted bodies and failures in order.
///
/// Once the script is exhausted every call fails with a network error.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<TransportState>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<String, TransportError>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState {
                responses: responses.into(),
                requests: Vec::new(),
            })),
        }
    }

    /// Transport whose single response carries `text` in the `response` field.
    pub fn replying(text: &str) -> Self {
        Self::new(vec![Ok(serde_json::json!({ "response": text }).to_string())])
    }

    /// Queue another `response` body.
    pub fn then_reply(&self, text: &str) {
        lock(&self.state)
            .responses
            .push_back(Ok(serde_json::json!({ "response": text }).to_string()));
    }

    pub fn attempts(&self) -> usize {
        lock(&self.state).requests.len()
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        lock(&self.state).requests.clone()
    }
}

impl Transport for ScriptedTransport {
    fn post_generate(&self, request: &GenerateRequest) -> Result<String, TransportError> {
        let mut state = lock(&self.state);
        state.requests.push(request.clone());
        state
            .responses
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("no scripted response".to_string())))
    }
}

/// Model client over `transport` with no delay between retries.
pub fn model_client(transport: ScriptedTransport, retries: u32) -> ModelClient {
    let settings = ModelConfig {
        retries,
        retry_delay_secs: 0,
        ..ModelConfig::default()
    };
    let config = ScribeConfig::default();
    ModelClient::new(
        Box::new(transport),
        &settings,
        PromptRenderer::new(&config.prompts, &config.language),
        &config.language,
    )
}

enum Scripted {
    Output(StepOutput),
    Error(ScribeError),
    Panic,
}

#[derive(Default)]
struct StepScriptState {
    queued: HashMap<StepId, VecDeque<Scripted>>,
    invocations: Vec<(StepId, Option<Details>)>,
}

/// [`StepRunner`] returning scripted outcomes. Unscripted steps succeed.
#[derive(Default)]
pub struct ScriptedSteps {
    state: Mutex<StepScriptState>,
}

impl ScriptedSteps {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, step: StepId, outcome: Scripted) {
        lock(&self.state)
            .queued
            .entry(step)
            .or_default()
            .push_back(outcome);
    }

    pub fn push(&self, step: StepId, output: StepOutput) {
        self.queue(step, Scripted::Output(output));
    }

    pub fn succeed_with(&self, step: StepId, details: Details) {
        self.push(step, StepOutput::new(StepStatus::Success, details));
    }

    pub fn report(&self, step: StepId, status: StepStatus, message: &str) {
        self.push(step, StepOutput::new(status, message_details(message)));
    }

    pub fn fail(&self, step: StepId, err: ScribeError) {
        self.queue(step, Scripted::Error(err));
    }

    pub fn panic_on(&self, step: StepId) {
        self.queue(step, Scripted::Panic);
    }

    /// Invoked steps, in order.
    pub fn invocations(&self) -> Vec<StepId> {
        lock(&self.state)
            .invocations
            .iter()
            .map(|(step, _)| *step)
            .collect()
    }

    /// Dependency inputs passed on each invocation of `step`.
    pub fn inputs_for(&self, step: StepId) -> Vec<Option<Details>> {
        lock(&self.state)
            .invocations
            .iter()
            .filter(|(id, _)| *id == step)
            .map(|(_, input)| input.clone())
            .collect()
    }
}

impl StepRunner for ScriptedSteps {
    fn run_step(
        &mut self,
        step: StepId,
        input: Option<&Details>,
    ) -> Result<StepOutput, ScribeError> {
        let next = {
            let mut state = lock(&self.state);
            state.invocations.push((step, input.cloned()));
            state.queued.get_mut(&step).and_then(VecDeque::pop_front)
        };
        match next {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::Error(err)) => Err(err),
            Some(Scripted::Panic) => panic!("scripted panic in {step}"),
            None => Ok(StepOutput::new(
                StepStatus::Success,
                message_details(format!("{step} ok")),
            )),
        }
    }
}

/// Placeholder target for runs that never touch the filesystem.
pub fn placeholder_target() -> RunTarget {
    RunTarget {
        target_dir: PathBuf::from("/tmp/project"),
        source_file: PathBuf::from("/tmp/candidate.py"),
        target_file: PathBuf::from("/tmp/project/app.py"),
        target_file_relative: "app.py".to_string(),
    }
}

/// Fresh run state over [`placeholder_target`] with the given step names.
pub fn run_state(steps: &[&str], flags: RunFlags) -> RunState {
    RunState::new(
        placeholder_target(),
        "python",
        flags,
        steps.iter().map(|name| name.to_string()).collect(),
    )
}

/// Temporary project directory plus a candidate source file outside it.
pub struct TestProject {
    _temp: TempDir,
    project: PathBuf,
    source: PathBuf,
}

impl TestProject {
    /// Project with an empty tree and a candidate `candidate.py` holding `source`.
    pub fn new(source: &str) -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let root = temp.path().canonicalize().context("canonicalize tempdir")?;
        let project = root.join("project");
        fs::create_dir_all(&project).context("create project dir")?;
        let incoming = root.join("incoming");
        fs::create_dir_all(&incoming).context("create incoming dir")?;
        let source_path = incoming.join("candidate.py");
        fs::write(&source_path, source).context("write candidate source")?;
        Ok(Self {
            _temp: temp,
            project,
            source: source_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.project
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Write `contents` to `relative` inside the project.
    pub fn write(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.project.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn target(&self, relative: &str) -> Result<RunTarget> {
        resolve_run_target(&self.project, &self.source, relative, &[])
            .with_context(|| format!("resolve target {relative}"))
    }

    /// Workflow over this project with scripted tools and model.
    pub fn workflow(
        &self,
        relative: &str,
        config: ScribeConfig,
        tools: &ScriptedToolRunner,
        transport: &ScriptedTransport,
    ) -> Result<Workflow> {
        let model = ModelClient::new(
            Box::new(transport.clone()),
            &ModelConfig {
                retry_delay_secs: 0,
                ..config.model.clone()
            },
            PromptRenderer::new(&config.prompts, &config.language),
            &config.language,
        );
        Ok(Workflow::new(
            self.target(relative)?,
            config,
            Box::new(tools.clone()),
            model,
        ))
    }
}
