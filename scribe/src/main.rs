//! Scribe command line: validate a candidate file against a target project.

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use scribe::core::policy::RunFlags;
use scribe::exit_codes;
use scribe::io::report::{ReportFormat, emit};
use scribe::logging;
use scribe::session::{SessionRequest, run_session};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "scribe",
    version,
    about = "Validate a candidate source file inside a target project"
)]
struct Cli {
    /// Project directory the candidate is staged into.
    target_dir: PathBuf,

    /// Candidate source file to validate.
    #[arg(long)]
    source_file: PathBuf,

    /// Destination path, relative to TARGET_DIR.
    #[arg(long)]
    target_file: String,

    /// Validate and review only; never run pre-commit or commit.
    #[arg(long)]
    review_only: bool,

    /// Run everything except the final commit.
    #[arg(long)]
    no_commit: bool,

    /// Commit validated changes (the default unless another flag disables it).
    #[arg(long, action = ArgAction::SetTrue)]
    commit: bool,

    #[arg(long, value_enum, default_value_t = ReportFormat::Json)]
    report_format: ReportFormat,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Also write debug-level logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Explicit `.scribe.toml` to load.
    #[arg(long)]
    config_file: Option<PathBuf>,

    #[arg(long)]
    ollama_base_url: Option<String>,

    #[arg(long)]
    ollama_model: Option<String>,
}

impl Cli {
    fn request(&self) -> SessionRequest {
        SessionRequest {
            target_dir: self.target_dir.clone(),
            source_file: self.source_file.clone(),
            target_file: self.target_file.clone(),
            flags: RunFlags {
                review_only: self.review_only,
                no_commit: self.no_commit,
                commit: self.commit.then_some(true),
            },
            config_file: self.config_file.clone(),
            ollama_base_url: self.ollama_base_url.clone(),
            ollama_model: self.ollama_model.clone(),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_filter(), cli.log_file.as_deref());
    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::FAILURE);
        }
    }
}

fn run(cli: &Cli) -> Result<i32> {
    let outcome = run_session(&cli.request());
    let mut stdout = io::stdout().lock();
    emit(&outcome.report, cli.report_format, &mut stdout).context("write report")?;
    Ok(outcome.exit_code)
}
