//! Grading Orchestrator - High-Level Flow
//!
//! **Responsibility:**
//! Compose submitter, poller and aggregator for the two call sites:
//! 1. Ad hoc run: grade a submission against caller-provided cases, persist it
//! 2. Reference validation: gate problem authoring on every reference solution
//!    terminating with engine-level success on every canonical case
//!
//! **Per-call state machine:**
//! Built → Submitted → Polling → Aggregated → {Persisted | Rejected}
//!
//! Any failure terminates the call; nothing is retried and no partial result
//! is returned. This module is the glue layer - it knows nothing about:
//! - How the backend is reached (backend's job)
//! - How outputs are compared (evaluator's job)

use crate::backend::ExecutionBackend;
use crate::error::GradingError;
use crate::evaluator::{self, SubmissionMeta};
use crate::poller;
use crate::submitter;
use chrono::Utc;
use judgeline_common::config::PollPolicy;
use judgeline_common::language::{language_name, resolve_language_id, UnsupportedLanguage};
use judgeline_common::store::GradingStore;
use judgeline_common::types::{
    ExecutionRequest, ExecutionResult, GradedSubmission, LanguageSelector, NewProblem, Problem,
    ProblemUpdate, RunRequest, TestCase,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub struct Grader {
    backend: Arc<dyn ExecutionBackend>,
    store: Arc<dyn GradingStore>,
    policy: PollPolicy,
}

impl Grader {
    pub fn new(
        backend: Arc<dyn ExecutionBackend>,
        store: Arc<dyn GradingStore>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            backend,
            store,
            policy,
        }
    }

    /// Submit one batch and wait for every run to finish
    async fn execute(
        &self,
        requests: &[ExecutionRequest],
        cancel: &CancellationToken,
    ) -> Result<Vec<ExecutionResult>, GradingError> {
        let tokens = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GradingError::Cancelled),
            tokens = submitter::submit_batch(self.backend.as_ref(), requests) => tokens?,
        };

        poller::poll_until_complete(self.backend.as_ref(), &tokens, &self.policy, cancel).await
    }

    /// Grade a submission against caller-provided test cases and persist it.
    ///
    /// Marks the problem solved for the user when every case passes.
    #[instrument(skip_all, fields(user_id = %user_id, problem_id = %problem_id))]
    pub async fn run_submission(
        &self,
        user_id: &str,
        problem_id: &str,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<GradedSubmission, GradingError> {
        // Built
        let (language_id, language) = resolve_selector(&request.language).map_err(|e| {
            warn!(error = %e, "Rejected before submit");
            e
        })?;
        validate_run(&request)?;

        let requests = submitter::build_requests(&request.source_code, language_id, &request.stdin, None);

        // Submitted → Polling
        let results = self.execute(&requests, cancel).await.map_err(|e| {
            warn!(error = %e, "Grading call rejected");
            e
        })?;

        // Aggregated
        let verdict = evaluator::build_verdict(&results, &request.expected_outputs);
        info!(
            language = %language,
            passed = verdict.passed_count(),
            total = verdict.outcomes.len(),
            verdict = %verdict.label(),
            "Submission graded"
        );

        let meta = SubmissionMeta {
            user_id,
            problem_id,
            source_code: &request.source_code,
            language,
            stdin: &request.stdin,
        };
        let record = evaluator::build_submission_record(&meta, &verdict);

        // Persisted
        self.store
            .insert_graded_submission(&record, &verdict.outcomes, verdict.all_passed)
            .await?;

        info!(submission_id = %record.id, "Submission persisted");

        Ok(GradedSubmission {
            submission: record,
            test_cases: verdict.outcomes,
        })
    }

    /// Run every reference solution against the canonical cases.
    ///
    /// All languages are resolved before the first backend call. Languages are
    /// validated in name order and the first failing case aborts the call.
    pub async fn validate_reference_solutions(
        &self,
        solutions: &BTreeMap<String, String>,
        test_cases: &[TestCase],
        cancel: &CancellationToken,
    ) -> Result<(), GradingError> {
        if solutions.is_empty() {
            return Err(GradingError::InvalidRequest(
                "at least one reference solution is required".to_string(),
            ));
        }
        if test_cases.is_empty() {
            return Err(GradingError::InvalidRequest(
                "at least one test case is required".to_string(),
            ));
        }

        let resolved = solutions
            .iter()
            .map(|(language, source)| {
                resolve_language_id(language).map(|id| (language.as_str(), id, source.as_str()))
            })
            .collect::<Result<Vec<_>, UnsupportedLanguage>>()?;

        let stdin: Vec<String> = test_cases.iter().map(|tc| tc.input.clone()).collect();
        let expected: Vec<String> = test_cases.iter().map(|tc| tc.output.clone()).collect();

        for (language, language_id, source) in resolved {
            let requests = submitter::build_requests(source, language_id, &stdin, Some(expected.as_slice()));
            let results = self.execute(&requests, cancel).await?;

            if let Some((idx, result)) = results
                .iter()
                .enumerate()
                .find(|(_, r)| !r.status.is_accepted())
            {
                warn!(
                    language = %language,
                    case = idx + 1,
                    status = %result.status.description,
                    "Reference solution failed"
                );
                return Err(GradingError::ReferenceValidationFailed {
                    language: language.to_string(),
                    case: idx + 1,
                    status: result.status.description.clone(),
                });
            }

            info!(language = %language, cases = results.len(), "Reference solution validated");
        }

        Ok(())
    }

    /// Validate the reference solutions, then store the problem
    #[instrument(skip_all, fields(author_id = %author_id))]
    pub async fn create_problem(
        &self,
        author_id: &str,
        problem: NewProblem,
        cancel: &CancellationToken,
    ) -> Result<Problem, GradingError> {
        self.validate_reference_solutions(&problem.reference_solutions, &problem.test_cases, cancel)
            .await?;

        let now = Utc::now();
        let problem = Problem {
            id: Uuid::new_v4(),
            title: problem.title,
            description: problem.description,
            difficulty: problem.difficulty,
            tags: problem.tags,
            test_cases: problem.test_cases,
            reference_solutions: problem.reference_solutions,
            author_id: author_id.to_string(),
            created_at: now,
            updated_at: now,
        };

        self.store.insert_problem(&problem).await?;
        info!(problem_id = %problem.id, "Problem created");
        Ok(problem)
    }

    /// Apply a partial update. Reference solutions in the update are validated
    /// against the updated test cases, or the stored ones if none are given.
    #[instrument(skip_all, fields(problem_id = %problem_id, author_id = %author_id))]
    pub async fn update_problem(
        &self,
        problem_id: Uuid,
        author_id: &str,
        update: ProblemUpdate,
        cancel: &CancellationToken,
    ) -> Result<Problem, GradingError> {
        if update.is_empty() {
            return Err(GradingError::InvalidRequest(
                "at least one field is required to update".to_string(),
            ));
        }

        let mut problem = self
            .store
            .get_problem(problem_id)
            .await?
            .ok_or(GradingError::ProblemNotFound(problem_id))?;

        if let Some(solutions) = &update.reference_solutions {
            let test_cases = update.test_cases.as_deref().unwrap_or(&problem.test_cases);
            self.validate_reference_solutions(solutions, test_cases, cancel)
                .await?;
        }

        update.apply(&mut problem);
        problem.author_id = author_id.to_string();
        problem.updated_at = Utc::now();

        self.store.update_problem(&problem).await?;
        info!("Problem updated");
        Ok(problem)
    }
}

/// Resolve to (backend id, canonical name)
fn resolve_selector(selector: &LanguageSelector) -> Result<(u32, &'static str), GradingError> {
    match selector {
        LanguageSelector::Id(id) => language_name(*id)
            .map(|name| (*id, name))
            .ok_or_else(|| UnsupportedLanguage(id.to_string()).into()),
        LanguageSelector::Name(name) => {
            let id = resolve_language_id(name)?;
            let canonical = language_name(id).ok_or_else(|| UnsupportedLanguage(name.clone()))?;
            Ok((id, canonical))
        }
    }
}

fn validate_run(request: &RunRequest) -> Result<(), GradingError> {
    if request.source_code.trim().is_empty() {
        return Err(GradingError::InvalidRequest("source code is required".to_string()));
    }
    if request.stdin.is_empty() {
        return Err(GradingError::InvalidRequest("at least one test case is required".to_string()));
    }
    if request.stdin.len() != request.expected_outputs.len() {
        return Err(GradingError::InvalidRequest(format!(
            "{} inputs but {} expected outputs",
            request.stdin.len(),
            request.expected_outputs.len()
        )));
    }
    Ok(())
}
