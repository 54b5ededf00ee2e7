// Batch submitter: one backend call per grading call, no retries

use crate::backend::ExecutionBackend;
use crate::error::{BackendError, GradingError};
use judgeline_common::types::{ExecutionRequest, SubmissionToken};
use tracing::{error, info};

/// Build one request per test input.
///
/// `expected_outputs` is forwarded to the backend only for reference runs;
/// ad hoc runs compare locally and pass `None`.
pub fn build_requests(
    source_code: &str,
    language_id: u32,
    stdin: &[String],
    expected_outputs: Option<&[String]>,
) -> Vec<ExecutionRequest> {
    stdin
        .iter()
        .enumerate()
        .map(|(idx, input)| ExecutionRequest {
            source_code: source_code.to_string(),
            language_id,
            stdin: input.clone(),
            expected_output: expected_outputs.map(|outputs| outputs[idx].clone()),
        })
        .collect()
}

/// Enqueue all requests in a single batch call.
///
/// Tokens are index-aligned with `requests`. Any failure is fatal for the
/// grading call.
pub async fn submit_batch<B>(
    backend: &B,
    requests: &[ExecutionRequest],
) -> Result<Vec<SubmissionToken>, GradingError>
where
    B: ExecutionBackend + ?Sized,
{
    if requests.is_empty() {
        return Err(GradingError::InvalidRequest(
            "at least one test case is required".to_string(),
        ));
    }

    let tokens = backend.submit_batch(requests).await.map_err(|e| {
        error!(runs = requests.len(), error = %e, "Batch submit failed");
        GradingError::ExecutionBackend(e)
    })?;

    if tokens.len() != requests.len() {
        return Err(GradingError::ExecutionBackend(BackendError::Malformed(format!(
            "submitted {} runs but received {} tokens",
            requests.len(),
            tokens.len()
        ))));
    }

    info!(runs = requests.len(), "Batch submitted");
    Ok(tokens)
}
