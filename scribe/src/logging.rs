//! Tracing setup for the scribe binary.
//!
//! Logs go to stderr (and optionally a file). The final report is the only
//! thing written to stdout.

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use tracing::warn;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global subscriber.
///
/// `RUST_LOG` wins over `level` for the console layer. The optional file
/// layer always records at `debug` without ANSI colors; if the file cannot be
/// created the run continues with console logging only.
///
/// # Example
/// ```bash
/// RUST_LOG=scribe=trace scribe ./project --source-file new.py --target-file app.py
/// ```
pub fn init(level: &str, log_file: Option<&Path>) {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .compact()
        .with_filter(console_filter);

    let mut open_error = None;
    let file_layer = log_file.and_then(|path| match File::create(path) {
        Ok(file) => Some(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(EnvFilter::new("debug")),
        ),
        Err(err) => {
            open_error = Some(format!("{}: {err}", path.display()));
            None
        }
    });

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .init();

    if let Some(err) = open_error {
        warn!(error = %err, "cannot open log file, logging to console only");
    }
}
