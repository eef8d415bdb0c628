//! Running external tools with timeouts, bounded output and environment activation.

use std::env;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::error::ScribeError;
use crate::io::resolver::{ENV_BIN_DIR, Resolver};

/// Exit code reported when a command is killed for exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = -1;
/// Exit code reported when a command is terminated by a signal.
pub const SIGNAL_EXIT_CODE: i32 = -2;
/// Marker appended to stderr of timed-out commands.
pub const TIMEOUT_MARKER: &str = "TimeoutExpired";

/// How long output readers may keep draining after a timed-out tool is killed.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// One external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Logical tool name (resolved through the [`Resolver`]) or a path.
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    /// Isolated environment to activate for the child.
    pub env_root: Option<PathBuf>,
    /// Variables applied after activation.
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: workdir.into(),
            env_root: None,
            env: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn in_env(mut self, env_root: Option<&Path>) -> Self {
        self.env_root = env_root.map(Path::to_path_buf);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished (or timed-out) command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes tool commands. Non-zero exit is a normal outcome, not an error.
pub trait ToolRunner {
    /// Resolve `tool` to an executable path without running it.
    fn resolve(&self, tool: &str, env_root: Option<&Path>) -> Result<PathBuf, ScribeError>;

    /// Run `command` to completion or timeout.
    ///
    /// Errors only when the executable cannot be resolved (environment error)
    /// or the OS refuses to start it (tool error).
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ScribeError>;
}

/// [`ToolRunner`] backed by real child processes.
#[derive(Debug, Clone)]
pub struct SystemToolRunner {
    resolver: Resolver,
    output_limit_bytes: usize,
}

impl SystemToolRunner {
    pub fn new(resolver: Resolver, output_limit_bytes: usize) -> Self {
        Self {
            resolver,
            output_limit_bytes,
        }
    }
}

impl ToolRunner for SystemToolRunner {
    fn resolve(&self, tool: &str, env_root: Option<&Path>) -> Result<PathBuf, ScribeError> {
        self.resolver.resolve(tool, env_root)
    }

    #[instrument(skip_all, fields(command = %command, workdir = %command.workdir.display()))]
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ScribeError> {
        let program = self.resolve(&command.program, command.env_root.as_deref())?;
        let mut cmd = Command::new(&program);
        cmd.args(&command.args).current_dir(&command.workdir);
        if let Some(root) = &command.env_root {
            activate_env(&mut cmd, root)?;
        }
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group so a timeout can take down the whole tree.
            cmd.process_group(0);
        }

        debug!(program = %program.display(), "spawning tool");
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(%err, program = %program.display(), "failed to spawn tool");
                return Err(ScribeError::tool(format!(
                    "failed to start '{}': {err}",
                    program.display()
                ))
                .with_detail("command", command.to_string()));
            }
        };

        let output = wait_and_collect(child, command.timeout, self.output_limit_bytes)?;
        debug!(exit_code = output.exit_code, timed_out = output.timed_out, "tool finished");
        Ok(output)
    }
}

fn activate_env(cmd: &mut Command, root: &Path) -> Result<(), ScribeError> {
    let bin = root.join(ENV_BIN_DIR);
    let mut paths = vec![bin];
    if let Some(existing) = env::var_os("PATH") {
        paths.extend(env::split_paths(&existing));
    }
    let joined = env::join_paths(paths).map_err(|err| {
        ScribeError::environment(format!("cannot build PATH for {}: {err}", root.display()))
    })?;
    cmd.env("VIRTUAL_ENV", root)
        .env("PATH", joined)
        .env_remove("PYTHONHOME")
        .env_remove("PYTHONPATH");
    Ok(())
}

/// Wait for the child while draining stdout/stderr on reader threads.
fn wait_and_collect(
    mut child: std::process::Child,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
) -> Result<ToolOutput> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match timeout {
        Some(limit) => match child.wait_timeout(limit).context("wait for tool")? {
            Some(status) => status,
            None => {
                warn!(timeout_secs = limit.as_secs(), "tool timed out, killing");
                timed_out = true;
                kill_tree(&mut child).context("kill tool")?;
                child.wait().context("wait tool after kill")?
            }
        },
        None => child.wait().context("wait for tool")?,
    };

    let grace = timed_out.then_some(KILL_GRACE);
    let (stdout, stdout_truncated) = join_output(stdout_handle, grace).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle, grace).context("join stderr")?;
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "tool output truncated");
    }

    let mut stdout = String::from_utf8_lossy(&stdout).into_owned();
    let mut stderr = String::from_utf8_lossy(&stderr).into_owned();
    if stdout_truncated > 0 {
        stdout.push_str(&format!("\n[stdout truncated {stdout_truncated} bytes]\n"));
    }
    if stderr_truncated > 0 {
        stderr.push_str(&format!("\n[stderr truncated {stderr_truncated} bytes]\n"));
    }

    let exit_code = if timed_out {
        let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
        stderr.push_str(&format!("\n{TIMEOUT_MARKER}: command exceeded {secs}s\n"));
        TIMEOUT_EXIT_CODE
    } else {
        exit_code_of(status)
    };

    Ok(ToolOutput {
        exit_code,
        stdout,
        stderr,
        timed_out,
    })
}

fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(SIGNAL_EXIT_CODE)
}

/// Kill the child's process group, falling back to the child alone.
#[cfg(unix)]
fn kill_tree(child: &mut std::process::Child) -> std::io::Result<()> {
    let group = format!("-{}", child.id());
    match Command::new("kill")
        .args(["-KILL", "--", &group])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => {}
        Ok(status) => debug!(%status, "group kill failed"),
        Err(err) => debug!(%err, "group kill unavailable"),
    }
    match child.kill() {
        Ok(()) => Ok(()),
        // Already gone with its group.
        Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut std::process::Child) -> std::io::Result<()> {
    child.kill()
}

type ReaderHandle = thread::JoinHandle<Result<(Vec<u8>, usize)>>;

/// Join a reader thread. With a grace period, a reader still blocked when it
/// runs out is abandoned and its stream reported empty.
fn join_output(handle: ReaderHandle, grace: Option<Duration>) -> Result<(Vec<u8>, usize)> {
    if let Some(grace) = grace {
        let deadline = Instant::now() + grace;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("output pipe still held open after kill, abandoning reader");
                return Ok((Vec::new(), 0));
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        let keep = n.min(remaining);
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::write_executable;

    fn runner_with(bin_dir: &Path, limit: usize) -> SystemToolRunner {
        let resolver =
            Resolver::default().with_search_path(Some(bin_dir.as_os_str().to_os_string()));
        SystemToolRunner::new(resolver, limit)
    }

    #[test]
    fn captures_streams_and_nonzero_exit() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_executable(
            temp.path(),
            "noisy",
            "#!/bin/sh\necho out-$1\necho err >&2\nexit 3\n",
        );
        let runner = runner_with(temp.path(), 1024);
        let out = runner
            .run(&ToolCommand::new("noisy", temp.path()).arg("x"))
            .expect("run");
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "out-x");
        assert_eq!(out.stderr.trim(), "err");
        assert!(!out.timed_out);
    }

    #[test]
    fn timeout_yields_synthetic_result() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_executable(temp.path(), "sleepy", "#!/bin/sh\nexec sleep 5\n");
        let runner = runner_with(temp.path(), 1024);
        let out = runner
            .run(
                &ToolCommand::new("sleepy", temp.path())
                    .timeout(Some(Duration::from_millis(200))),
            )
            .expect("run");
        assert!(out.timed_out);
        assert_eq!(out.exit_code, TIMEOUT_EXIT_CODE);
        assert!(out.stderr.contains(TIMEOUT_MARKER));
    }

    #[test]
    fn timeout_kills_grandchildren() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_executable(temp.path(), "wrapper", "#!/bin/sh\nsleep 4\n");
        let runner = runner_with(temp.path(), 1024);
        let started = Instant::now();
        let out = runner
            .run(
                &ToolCommand::new("wrapper", temp.path())
                    .timeout(Some(Duration::from_millis(300))),
            )
            .expect("run");
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    }

    #[test]
    fn output_beyond_limit_is_dropped() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_executable(temp.path(), "chatty", "#!/bin/sh\nprintf 'abcdefghij'\n");
        let runner = runner_with(temp.path(), 4);
        let out = runner
            .run(&ToolCommand::new("chatty", temp.path()))
            .expect("run");
        assert!(out.stdout.starts_with("abcd"));
        assert!(out.stdout.contains("[stdout truncated 6 bytes]"));
    }

    #[test]
    fn env_activation_sets_virtual_env_and_clears_pythonpath() {
        let temp = tempfile::tempdir().expect("tempdir");
        let venv = temp.path().join(".venv");
        write_executable(
            &venv.join(ENV_BIN_DIR),
            "showenv",
            "#!/bin/sh\necho \"$VIRTUAL_ENV|${PYTHONHOME:-none}|$EXTRA\"\n",
        );
        let runner = SystemToolRunner::new(Resolver::default().with_search_path(None), 1024);
        let out = runner
            .run(
                &ToolCommand::new("showenv", temp.path())
                    .in_env(Some(&venv))
                    .env("EXTRA", "yes"),
            )
            .expect("run");
        assert_eq!(
            out.stdout.trim(),
            format!("{}|none|yes", venv.display())
        );
    }

    #[test]
    fn unresolvable_program_is_environment_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = runner_with(temp.path(), 1024);
        let err = runner
            .run(&ToolCommand::new("missing-tool", temp.path()))
            .expect_err("missing");
        assert_eq!(err.kind(), "environment");
    }

    #[test]
    fn display_joins_program_and_args() {
        let cmd = ToolCommand::new("ruff", "/tmp").args(["check", "--fix", "a.py"]);
        assert_eq!(cmd.to_string(), "ruff check --fix a.py");
    }
}
