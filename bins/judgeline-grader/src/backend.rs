//! Execution Backend - client side of the untrusted-code runner
//!
//! **Responsibility:**
//! Speak the backend's batch API: one call to enqueue N runs, one call to read
//! the current state of N tokens. Nothing here waits, retries or grades.
//!
//! The `ExecutionBackend` trait is the seam the submitter and poller depend
//! on, so tests swap in a scripted backend without any network.

use crate::error::BackendError;
use async_trait::async_trait;
use judgeline_common::config::Config;
use judgeline_common::types::{ExecutionRequest, ExecutionResult, ExecutionStatus, SubmissionToken};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const AUTH_HEADER: &str = "X-Auth-Token";

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Enqueue every request; tokens come back index-aligned with `requests`
    async fn submit_batch(
        &self,
        requests: &[ExecutionRequest],
    ) -> Result<Vec<SubmissionToken>, BackendError>;

    /// Current state of every token, index-aligned with `tokens`
    async fn fetch_batch(
        &self,
        tokens: &[SubmissionToken],
    ) -> Result<Vec<ExecutionResult>, BackendError>;
}

#[derive(Serialize)]
struct BatchSubmitBody<'a> {
    submissions: &'a [ExecutionRequest],
}

/// One element of the batch-submit response. Rejected entries carry
/// field errors instead of a token.
#[derive(Deserialize)]
struct RawToken {
    token: Option<String>,
}

#[derive(Deserialize)]
struct RawBatch {
    submissions: Vec<Option<RawSubmission>>,
}

#[derive(Deserialize)]
struct RawSubmission {
    token: String,
    stdout: Option<String>,
    stderr: Option<String>,
    compile_output: Option<String>,
    message: Option<String>,
    /// Seconds, as a decimal string
    time: Option<String>,
    memory: Option<u64>,
    status: ExecutionStatus,
}

impl From<RawSubmission> for ExecutionResult {
    fn from(raw: RawSubmission) -> Self {
        ExecutionResult {
            token: SubmissionToken(raw.token),
            stdout: raw.stdout,
            stderr: raw.stderr,
            compile_output: raw.compile_output,
            message: raw.message,
            status: raw.status,
            time: raw.time.as_deref().and_then(parse_seconds),
            memory: raw.memory,
        }
    }
}

fn parse_seconds(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn parse_tokens(body: &str, expected: usize) -> Result<Vec<SubmissionToken>, BackendError> {
    let raw: Vec<RawToken> = serde_json::from_str(body)?;
    if raw.len() != expected {
        return Err(BackendError::Malformed(format!(
            "submitted {} runs but received {} tokens",
            expected,
            raw.len()
        )));
    }

    raw.into_iter()
        .enumerate()
        .map(|(idx, entry)| {
            entry.token.map(SubmissionToken).ok_or_else(|| {
                BackendError::Malformed(format!("run {} was rejected by the backend", idx + 1))
            })
        })
        .collect()
}

fn parse_results(
    body: &str,
    tokens: &[SubmissionToken],
) -> Result<Vec<ExecutionResult>, BackendError> {
    let raw: RawBatch = serde_json::from_str(body)?;
    if raw.submissions.len() != tokens.len() {
        return Err(BackendError::Malformed(format!(
            "queried {} tokens but received {} results",
            tokens.len(),
            raw.submissions.len()
        )));
    }

    raw.submissions
        .into_iter()
        .zip(tokens)
        .map(|(entry, token)| match entry {
            Some(submission) if submission.token == token.as_str() => Ok(submission.into()),
            Some(submission) => Err(BackendError::Malformed(format!(
                "expected result for token {} but got {}",
                token, submission.token
            ))),
            None => Err(BackendError::Malformed(format!("unknown token {}", token))),
        })
        .collect()
}

/// HTTP client for a Judge0-compatible backend
pub struct Judge0Client {
    http: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl Judge0Client {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, BackendError> {
        Self::new(
            config.judge0_url.clone(),
            config.judge0_auth_token.clone(),
            config.http_timeout(),
        )
    }

    fn batch_url(&self) -> String {
        format!("{}/submissions/batch", self.base_url)
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.header(AUTH_HEADER, token),
            None => request,
        }
    }

    async fn read_body(response: Response) -> Result<String, BackendError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl ExecutionBackend for Judge0Client {
    async fn submit_batch(
        &self,
        requests: &[ExecutionRequest],
    ) -> Result<Vec<SubmissionToken>, BackendError> {
        let request = self
            .http
            .post(self.batch_url())
            .query(&[("base64_encoded", "false")])
            .json(&BatchSubmitBody {
                submissions: requests,
            });

        let response = self.with_auth(request).send().await?;
        let body = Self::read_body(response).await?;
        debug!(runs = requests.len(), "Batch submitted");

        parse_tokens(&body, requests.len())
    }

    async fn fetch_batch(
        &self,
        tokens: &[SubmissionToken],
    ) -> Result<Vec<ExecutionResult>, BackendError> {
        let csv = tokens
            .iter()
            .map(SubmissionToken::as_str)
            .collect::<Vec<_>>()
            .join(",");

        let request = self
            .http
            .get(self.batch_url())
            .query(&[("tokens", csv.as_str()), ("base64_encoded", "false")]);

        let response = self.with_auth(request).send().await?;
        let body = Self::read_body(response).await?;

        parse_results(&body, tokens)
    }
}
