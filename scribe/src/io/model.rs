//! Client for an Ollama-compatible `/api/generate` endpoint.
//!
//! HTTP lives behind [`Transport`] so retry and extraction behavior can be
//! exercised with scripted responses.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::extract::{FindingsError, ReviewFinding, extract_code, parse_findings};
use crate::error::ScribeError;
use crate::io::config::ModelConfig;
use crate::io::prompt::PromptRenderer;

/// Body of a generate request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
    error: Option<String>,
}

/// Failure to obtain a response body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl TransportError {
    /// Timeouts, connection failures and server-side (5xx) statuses are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout(_) | TransportError::Network(_) => true,
            TransportError::Status { status, .. } => *status >= 500,
        }
    }
}

/// Why a model call produced nothing usable.
#[derive(Debug, Error)]
pub enum ModelFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("response is not valid JSON")]
    Decode(#[source] serde_json::Error),
    #[error("backend reported an error: {0}")]
    Server(String),
    #[error("response has no `response` field")]
    MissingResponse,
    #[error("model returned no usable {0}")]
    Empty(&'static str),
    #[error(transparent)]
    Findings(#[from] FindingsError),
}

/// Sends one generate request and returns the raw response body.
pub trait Transport {
    fn post_generate(&self, request: &GenerateRequest) -> Result<String, TransportError>;
}

/// Blocking reqwest transport.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ScribeError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| {
                ScribeError::configuration(format!("cannot build HTTP client: {err}"))
            })?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", base_url.trim_end_matches('/')),
        })
    }
}

impl Transport for HttpTransport {
    fn post_generate(&self, request: &GenerateRequest) -> Result<String, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .map_err(classify_reqwest)?;
        let status = response.status();
        let body = response.text().map_err(classify_reqwest)?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

fn classify_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

/// Prompt-completion client with bounded retries.
pub struct ModelClient {
    transport: Box<dyn Transport>,
    model: String,
    retries: u32,
    retry_delay: Duration,
    prompts: PromptRenderer,
    language: String,
}

impl ModelClient {
    pub fn new(
        transport: Box<dyn Transport>,
        settings: &ModelConfig,
        prompts: PromptRenderer,
        language: &str,
    ) -> Self {
        Self {
            transport,
            model: settings.model.clone(),
            retries: settings.retries,
            retry_delay: Duration::from_secs(settings.retry_delay_secs),
            prompts,
            language: language.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `prompt` and return the `response` text.
    ///
    /// Retryable transport failures are attempted `retries + 1` times in
    /// total with a fixed delay between attempts. Anything else fails at once.
    #[instrument(skip_all, fields(model = %self.model, format = format.unwrap_or("text")))]
    pub fn complete(&self, prompt: &str, format: Option<&str>) -> Result<String, ScribeError> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: format.map(str::to_string),
        };
        info!(prompt_chars = prompt.len(), "calling model");

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.transport.post_generate(&request) {
                Ok(body) => {
                    debug!(attempt, "model call succeeded");
                    return parse_generate_body(&body)
                        .map_err(|failure| ScribeError::api("unusable model response", failure));
                }
                Err(err) if err.is_retryable() && attempt <= self.retries => {
                    warn!(attempt, %err, "model call failed, retrying");
                    if !self.retry_delay.is_zero() {
                        thread::sleep(self.retry_delay);
                    }
                }
                Err(err) => {
                    warn!(attempt, %err, "model call failed");
                    return Err(ScribeError::api(
                        format!("model call failed after {attempt} attempt(s)"),
                        ModelFailure::Transport(err),
                    ));
                }
            }
        }
    }

    /// Ask the model for tests of `code` and extract the test source.
    pub fn generate_tests(
        &self,
        code: &str,
        target_file_path: &str,
        signatures: &str,
    ) -> Result<String, ScribeError> {
        let prompt = self
            .prompts
            .test_generation(code, target_file_path, signatures)?;
        let text = self.complete(&prompt, None)?;
        if text.trim().is_empty() {
            return Err(ScribeError::api(
                "empty test generation response",
                ModelFailure::Empty("test code"),
            ));
        }
        let tests = extract_code(&text, &self.language);
        if tests.is_empty() {
            return Err(ScribeError::api(
                "no test code in response",
                ModelFailure::Empty("test code"),
            ));
        }
        info!(chars = tests.len(), "extracted generated tests");
        Ok(tests)
    }

    /// Ask the model for review findings on `code`.
    pub fn generate_review(
        &self,
        code: &str,
        target_file_path: &str,
    ) -> Result<Vec<ReviewFinding>, ScribeError> {
        let prompt = self.prompts.review(code, target_file_path)?;
        let text = self.complete(&prompt, Some("json"))?;
        let findings = parse_findings(&text)
            .map_err(|err| ScribeError::api("malformed review findings", err.into()))?;
        info!(count = findings.len(), "parsed review findings");
        Ok(findings)
    }
}

fn parse_generate_body(body: &str) -> Result<String, ModelFailure> {
    let parsed: GenerateResponse = serde_json::from_str(body).map_err(ModelFailure::Decode)?;
    if let Some(error) = parsed.error.filter(|e| !e.trim().is_empty()) {
        return Err(ModelFailure::Server(error));
    }
    parsed.response.ok_or(ModelFailure::MissingResponse)
}
