//! Classified failures raised by bootstrap and by pipeline steps.
//!
//! The pipeline's step boundary is the only place that converts these into
//! `FAILURE` results; everything below it propagates with `?`.

use std::io;
use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

use crate::core::types::{Details, message_details};
use crate::io::model::ModelFailure;

#[derive(Debug, Error)]
pub enum ScribeError {
    /// Bad or missing configuration, including unknown step names.
    #[error("configuration error: {message}")]
    Configuration { message: String, details: Details },

    /// Invalid source or target paths.
    #[error("input error: {message}")]
    Input { message: String, details: Details },

    /// Isolated environment or executable resolution failure.
    #[error("environment error: {message}")]
    Environment { message: String, details: Details },

    /// Unexpected tool exit or spawn failure.
    #[error("tool error: {message}")]
    Tool { message: String, details: Details },

    /// Inference backend failure after retries, or an unusable response.
    #[error("model API error: {message}")]
    Api {
        message: String,
        #[source]
        source: ModelFailure,
    },

    #[error("filesystem error at {}", path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unexpected error: {0:#}")]
    Unexpected(#[from] anyhow::Error),
}

impl ScribeError {
    pub fn configuration(message: impl Into<String>) -> Self {
        let message = message.into();
        ScribeError::Configuration {
            details: message_details(message.clone()),
            message,
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        let message = message.into();
        ScribeError::Input {
            details: message_details(message.clone()),
            message,
        }
    }

    pub fn environment(message: impl Into<String>) -> Self {
        let message = message.into();
        ScribeError::Environment {
            details: message_details(message.clone()),
            message,
        }
    }

    pub fn tool(message: impl Into<String>) -> Self {
        let message = message.into();
        ScribeError::Tool {
            details: message_details(message.clone()),
            message,
        }
    }

    pub fn api(message: impl Into<String>, source: ModelFailure) -> Self {
        ScribeError::Api {
            message: message.into(),
            source,
        }
    }

    pub fn file_system(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ScribeError::FileSystem {
            path: path.into(),
            source,
        }
    }

    /// Attach a structured detail to the error payload.
    ///
    /// Variants without a details map ignore the call.
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        match &mut self {
            ScribeError::Configuration { details, .. }
            | ScribeError::Input { details, .. }
            | ScribeError::Environment { details, .. }
            | ScribeError::Tool { details, .. } => {
                details.insert(key.to_string(), value.into());
            }
            ScribeError::Api { .. }
            | ScribeError::FileSystem { .. }
            | ScribeError::Unexpected(_) => {}
        }
        self
    }

    /// Stable lowercase label for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            ScribeError::Configuration { .. } => "configuration",
            ScribeError::Input { .. } => "input",
            ScribeError::Environment { .. } => "environment",
            ScribeError::Tool { .. } => "tool",
            ScribeError::Api { .. } => "api",
            ScribeError::FileSystem { .. } => "filesystem",
            ScribeError::Unexpected(_) => "unexpected",
        }
    }

    /// Structured payload recorded in the failed step's details.
    pub fn details(&self) -> Details {
        let mut details = match self {
            ScribeError::Configuration { details, .. }
            | ScribeError::Input { details, .. }
            | ScribeError::Environment { details, .. }
            | ScribeError::Tool { details, .. } => details.clone(),
            ScribeError::Api { message, source } => {
                let mut details = message_details(message.clone());
                details.insert("cause".to_string(), Value::String(source.to_string()));
                details
            }
            ScribeError::FileSystem { path, source } => {
                let mut details = message_details(source.to_string());
                details.insert(
                    "path".to_string(),
                    Value::String(path.display().to_string()),
                );
                details
            }
            ScribeError::Unexpected(err) => message_details(format!("{err:#}")),
        };
        details.insert(
            "error_kind".to_string(),
            Value::String(self.kind().to_string()),
        );
        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_carry_kind_and_extra_fields() {
        let err = ScribeError::tool("ruff exploded").with_detail("return_code", 2);
        let details = err.details();
        assert_eq!(details["error_kind"], "tool");
        assert_eq!(details["return_code"], 2);
        assert_eq!(details["message"], "ruff exploded");
        assert_eq!(err.to_string(), "tool error: ruff exploded");
    }

    #[test]
    fn filesystem_error_reports_path() {
        let err = ScribeError::file_system(
            "/nope/file.py",
            io::Error::new(io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(err.kind(), "filesystem");
        assert_eq!(err.details()["path"], "/nope/file.py");
    }
}
