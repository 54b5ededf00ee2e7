//! Result Poller - waits for a batch of runs to reach a terminal state
//!
//! **Algorithm:**
//! 1. Query the status of *all* tokens in one batched call
//! 2. Done when every status id is outside {queued, processing}
//! 3. Otherwise sleep for the poll interval and repeat
//!
//! A failed query aborts the wait; it is not retried. The wait is bounded
//! by `PollPolicy::max_wait`, including a query still in flight, and can be
//! cancelled by the caller at any point.
//!
//! Each call owns its own loop state, so concurrent gradings share nothing here.

use crate::backend::ExecutionBackend;
use crate::error::GradingError;
use judgeline_common::config::PollPolicy;
use judgeline_common::types::{ExecutionResult, SubmissionToken};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub async fn poll_until_complete<B>(
    backend: &B,
    tokens: &[SubmissionToken],
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<ExecutionResult>, GradingError>
where
    B: ExecutionBackend + ?Sized,
{
    let started = Instant::now();
    let deadline = policy.max_wait.map(|max_wait| started + max_wait);
    let mut attempt: u64 = 0;
    let mut pending = tokens.len();

    loop {
        attempt = attempt.saturating_add(1);

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GradingError::Cancelled),
            _ = until(deadline) => return Err(timed_out(started, attempt, pending)),
            fetched = backend.fetch_batch(tokens) => fetched,
        };

        let results = fetched.map_err(|e| {
            error!(attempt, tokens = tokens.len(), error = %e, "Polling failed");
            GradingError::PollingFailed(e)
        })?;

        pending = results.iter().filter(|r| !r.status.is_terminal()).count();
        debug!(attempt, tokens = tokens.len(), pending, "Poll cycle");

        if pending == 0 {
            info!(
                attempts = attempt,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "All runs terminal"
            );
            return Ok(results);
        }

        let sleep_for = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(timed_out(started, attempt, pending));
                }
                policy.interval.min(remaining)
            }
            None => policy.interval,
        };

        sleep_or_cancel(sleep_for, cancel).await?;
    }
}

/// Resolves at the deadline, or never without one
async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// `pending` is the count from the last completed query
fn timed_out(started: Instant, attempt: u64, pending: usize) -> GradingError {
    let waited = started.elapsed();
    warn!(attempt, pending, waited_ms = waited.as_millis() as u64, "Polling deadline exceeded");
    GradingError::PollingTimedOut { waited, pending }
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), GradingError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GradingError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submitter::{build_requests, submit_batch};
    use crate::testing::{Run, ScriptedBackend};
    use judgeline_common::types::ExecutionStatus;

    fn fast_policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_wait: Some(Duration::from_secs(5)),
        }
    }

    async fn submit(backend: &ScriptedBackend, n: usize) -> Vec<SubmissionToken> {
        let stdin: Vec<String> = (0..n).map(|i| i.to_string()).collect();
        let requests = build_requests("src", 71, &stdin, None);
        submit_batch(backend, &requests).await.unwrap()
    }

    #[tokio::test]
    async fn test_exactly_three_queries_for_two_pending_cycles() {
        let backend = ScriptedBackend::delayed(2, Run::accepted("ok"));
        let tokens = submit(&backend, 3).await;

        let results = poll_until_complete(&backend, &tokens, &fast_policy(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(backend.fetch_calls(), 3);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.status.is_accepted()));
    }

    #[tokio::test]
    async fn test_results_follow_token_order() {
        let backend = ScriptedBackend::echo();
        let tokens = submit(&backend, 4).await;

        let results = poll_until_complete(&backend, &tokens, &fast_policy(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(backend.fetch_calls(), 1);
        for (idx, (result, token)) in results.iter().zip(&tokens).enumerate() {
            assert_eq!(&result.token, token);
            assert_eq!(result.stdout.as_deref(), Some(format!("{}\n", idx).as_str()));
        }
    }

    #[tokio::test]
    async fn test_terminal_failure_ends_wait() {
        let backend = ScriptedBackend::delayed(1, Run::runtime_error("boom"));
        let tokens = submit(&backend, 1).await;

        let results = poll_until_complete(&backend, &tokens, &fast_policy(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(backend.fetch_calls(), 2);
        assert_eq!(results[0].status.id, 11);
    }

    #[tokio::test]
    async fn test_queued_then_processing_then_accepted() {
        let backend = ScriptedBackend::new(|_, attempt| match attempt {
            0 => Run::queued(),
            1 => Run::processing(),
            _ => Run::accepted("ok"),
        });
        let tokens = submit(&backend, 2).await;

        let results = poll_until_complete(&backend, &tokens, &fast_policy(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(backend.fetch_calls(), 3);
        assert!(results.iter().all(|r| r.status.id == ExecutionStatus::ACCEPTED));
    }

    #[tokio::test]
    async fn test_mixed_progress_waits_for_slowest() {
        // run "0" finishes immediately, run "1" needs three polls
        let backend = ScriptedBackend::new(|request, attempt| {
            if request.stdin == "1" && attempt < 3 {
                Run::processing()
            } else {
                Run::accepted("done")
            }
        });
        let tokens = submit(&backend, 2).await;

        poll_until_complete(&backend, &tokens, &fast_policy(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(backend.fetch_calls(), 4);
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_without_retry() {
        let backend = ScriptedBackend::delayed(5, Run::accepted("ok")).failing_fetch_on(2);
        let tokens = submit(&backend, 2).await;

        let err = poll_until_complete(&backend, &tokens, &fast_policy(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GradingError::PollingFailed(_)));
        assert_eq!(backend.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let backend = ScriptedBackend::delayed(usize::MAX, Run::accepted("never"));
        let tokens = submit(&backend, 2).await;
        let policy = PollPolicy {
            interval: Duration::from_millis(5),
            max_wait: Some(Duration::from_millis(30)),
        };

        let err = poll_until_complete(&backend, &tokens, &policy, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            GradingError::PollingTimedOut { pending, waited } => {
                assert_eq!(pending, 2);
                assert!(waited >= Duration::from_millis(30));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deadline_bounds_in_flight_query() {
        let backend = ScriptedBackend::echo().slow_fetch(Duration::from_millis(500));
        let tokens = submit(&backend, 3).await;
        let policy = PollPolicy {
            interval: Duration::from_millis(5),
            max_wait: Some(Duration::from_millis(30)),
        };

        let err = poll_until_complete(&backend, &tokens, &policy, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            GradingError::PollingTimedOut { pending, waited } => {
                assert_eq!(pending, 3);
                assert!(waited >= Duration::from_millis(30));
                assert!(waited < Duration::from_millis(500));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        // the slow query was dropped before it answered
        assert_eq!(backend.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_stops_waiting() {
        let backend = ScriptedBackend::delayed(usize::MAX, Run::accepted("never"));
        let tokens = submit(&backend, 1).await;
        let policy = PollPolicy {
            interval: Duration::from_millis(5),
            max_wait: None,
        };
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = poll_until_complete(&backend, &tokens, &policy, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, GradingError::Cancelled));
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_query() {
        let backend = ScriptedBackend::echo();
        let tokens = submit(&backend, 1).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = poll_until_complete(&backend, &tokens, &fast_policy(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, GradingError::Cancelled));
        assert_eq!(backend.fetch_calls(), 0);
    }
}
