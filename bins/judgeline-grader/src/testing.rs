// In-process execution backend for tests: no network, scripted statuses

use crate::backend::ExecutionBackend;
use crate::error::BackendError;
use async_trait::async_trait;
use judgeline_common::types::{ExecutionRequest, ExecutionResult, ExecutionStatus, SubmissionToken};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// What one run looks like on a given poll
#[derive(Debug, Clone)]
pub struct Run {
    pub status: ExecutionStatus,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
}

impl Run {
    pub fn accepted(stdout: &str) -> Self {
        Self {
            status: ExecutionStatus::new(3, "Accepted"),
            stdout: Some(stdout.to_string()),
            stderr: None,
            compile_output: None,
        }
    }

    pub fn queued() -> Self {
        Self {
            status: ExecutionStatus::new(1, "In Queue"),
            stdout: None,
            stderr: None,
            compile_output: None,
        }
    }

    pub fn processing() -> Self {
        Self {
            status: ExecutionStatus::new(2, "Processing"),
            stdout: None,
            stderr: None,
            compile_output: None,
        }
    }

    pub fn runtime_error(stderr: &str) -> Self {
        Self {
            status: ExecutionStatus::new(11, "Runtime Error (NZEC)"),
            stdout: None,
            stderr: Some(stderr.to_string()),
            compile_output: None,
        }
    }

    pub fn compile_error(output: &str) -> Self {
        Self {
            status: ExecutionStatus::new(6, "Compilation Error"),
            stdout: None,
            stderr: None,
            compile_output: Some(output.to_string()),
        }
    }
}

/// Decides a run's state from its request and how many times its token was polled before
type Responder = Box<dyn Fn(&ExecutionRequest, usize) -> Run + Send + Sync>;

#[derive(Default)]
struct ScriptState {
    submitted: Vec<ExecutionRequest>,
    tokens: HashMap<String, usize>,
    polls_per_token: HashMap<String, usize>,
    submit_calls: usize,
    fetch_calls: usize,
}

pub struct ScriptedBackend {
    responder: Responder,
    fail_submit: bool,
    fail_fetch_on_call: Option<usize>,
    fetch_delay: Option<Duration>,
    state: Mutex<ScriptState>,
}

impl ScriptedBackend {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ExecutionRequest, usize) -> Run + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            fail_submit: false,
            fail_fetch_on_call: None,
            fetch_delay: None,
            state: Mutex::new(ScriptState::default()),
        }
    }

    /// A program that prints its stdin
    pub fn echo() -> Self {
        Self::new(|request, _| Run::accepted(&format!("{}\n", request.stdin)))
    }

    /// Reports `Processing` for the first `pending_polls` polls of each token, then `run`
    pub fn delayed(pending_polls: usize, run: Run) -> Self {
        Self::new(move |_, attempt| {
            if attempt < pending_polls {
                Run::processing()
            } else {
                run.clone()
            }
        })
    }

    pub fn failing_submit(mut self) -> Self {
        self.fail_submit = true;
        self
    }

    /// Fail the n-th (1-based) fetch call with a transport-like error
    pub fn failing_fetch_on(mut self, call: usize) -> Self {
        self.fail_fetch_on_call = Some(call);
        self
    }

    /// Make every fetch call take `delay` before answering
    pub fn slow_fetch(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn submit_calls(&self) -> usize {
        self.state.lock().unwrap().submit_calls
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.lock().unwrap().fetch_calls
    }

    pub fn submitted(&self) -> Vec<ExecutionRequest> {
        self.state.lock().unwrap().submitted.clone()
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    async fn submit_batch(
        &self,
        requests: &[ExecutionRequest],
    ) -> Result<Vec<SubmissionToken>, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.submit_calls += 1;
        if self.fail_submit {
            return Err(BackendError::Status {
                status: 503,
                body: "backend unavailable".to_string(),
            });
        }

        let mut tokens = Vec::with_capacity(requests.len());
        for request in requests {
            let idx = state.submitted.len();
            let token = format!("tok-{}", idx);
            state.submitted.push(request.clone());
            state.tokens.insert(token.clone(), idx);
            tokens.push(SubmissionToken(token));
        }
        Ok(tokens)
    }

    async fn fetch_batch(
        &self,
        tokens: &[SubmissionToken],
    ) -> Result<Vec<ExecutionResult>, BackendError> {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.fetch_calls += 1;
        if self.fail_fetch_on_call == Some(state.fetch_calls) {
            return Err(BackendError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }

        let mut results = Vec::with_capacity(tokens.len());
        for token in tokens {
            let idx = *state
                .tokens
                .get(token.as_str())
                .ok_or_else(|| BackendError::Malformed(format!("unknown token {}", token)))?;
            let request = state.submitted[idx].clone();
            let attempt = state.polls_per_token.entry(token.0.clone()).or_insert(0);
            let run = (self.responder)(&request, *attempt);
            *attempt += 1;

            let terminal = run.status.is_terminal();
            results.push(ExecutionResult {
                token: token.clone(),
                stdout: run.stdout,
                stderr: run.stderr,
                compile_output: run.compile_output,
                message: None,
                status: run.status,
                time: terminal.then(|| Duration::from_millis(20)),
                memory: terminal.then_some(2048),
            });
        }
        Ok(results)
    }
}
