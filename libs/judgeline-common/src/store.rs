use crate::types::{GradedSubmission, Problem, SubmissionRecord, TestCaseOutcome};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
}

/// Write sinks and lookups the grading pipeline persists through.
///
/// Implementations provide per-call atomicity; `mark_solved` must stay a
/// single marker under concurrent identical calls.
#[async_trait]
pub trait GradingStore: Send + Sync {
    async fn insert_submission(&self, record: &SubmissionRecord) -> Result<(), StoreError>;

    async fn insert_test_case_results(
        &self,
        submission_id: Uuid,
        outcomes: &[TestCaseOutcome],
    ) -> Result<(), StoreError>;

    /// Write a record, its outcome rows and, when `solved`, the solved marker
    /// as one unit. Either all of it lands or none of it does.
    async fn insert_graded_submission(
        &self,
        record: &SubmissionRecord,
        outcomes: &[TestCaseOutcome],
        solved: bool,
    ) -> Result<(), StoreError>;

    /// Upsert; marking an already-solved pair is a no-op
    async fn mark_solved(&self, user_id: &str, problem_id: &str) -> Result<(), StoreError>;

    async fn is_solved(&self, user_id: &str, problem_id: &str) -> Result<bool, StoreError>;

    async fn get_submission(&self, id: Uuid) -> Result<Option<GradedSubmission>, StoreError>;

    /// Newest first, optionally restricted to one problem
    async fn submissions_for_user(
        &self,
        user_id: &str,
        problem_id: Option<&str>,
    ) -> Result<Vec<SubmissionRecord>, StoreError>;

    async fn insert_problem(&self, problem: &Problem) -> Result<(), StoreError>;

    /// Fails with `NotFound` if the problem does not exist
    async fn update_problem(&self, problem: &Problem) -> Result<(), StoreError>;

    async fn get_problem(&self, id: Uuid) -> Result<Option<Problem>, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    submissions: Vec<SubmissionRecord>,
    test_cases: HashMap<Uuid, Vec<TestCaseOutcome>>,
    solved: HashSet<(String, String)>,
    problems: HashMap<Uuid, Problem>,
}

/// In-process store for tests and dry runs
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn submission_count(&self) -> usize {
        self.state.read().await.submissions.len()
    }

    pub async fn solved_count(&self) -> usize {
        self.state.read().await.solved.len()
    }

    pub async fn problem_count(&self) -> usize {
        self.state.read().await.problems.len()
    }
}

#[async_trait]
impl GradingStore for MemoryStore {
    async fn insert_submission(&self, record: &SubmissionRecord) -> Result<(), StoreError> {
        self.state.write().await.submissions.push(record.clone());
        Ok(())
    }

    async fn insert_test_case_results(
        &self,
        submission_id: Uuid,
        outcomes: &[TestCaseOutcome],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.submissions.iter().any(|s| s.id == submission_id) {
            return Err(StoreError::NotFound {
                kind: "submission",
                id: submission_id.to_string(),
            });
        }
        state
            .test_cases
            .entry(submission_id)
            .or_default()
            .extend_from_slice(outcomes);
        Ok(())
    }

    async fn insert_graded_submission(
        &self,
        record: &SubmissionRecord,
        outcomes: &[TestCaseOutcome],
        solved: bool,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.submissions.push(record.clone());
        state.test_cases.insert(record.id, outcomes.to_vec());
        if solved {
            state
                .solved
                .insert((record.user_id.clone(), record.problem_id.clone()));
        }
        Ok(())
    }

    async fn mark_solved(&self, user_id: &str, problem_id: &str) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .solved
            .insert((user_id.to_string(), problem_id.to_string()));
        Ok(())
    }

    async fn is_solved(&self, user_id: &str, problem_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .solved
            .contains(&(user_id.to_string(), problem_id.to_string())))
    }

    async fn get_submission(&self, id: Uuid) -> Result<Option<GradedSubmission>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .submissions
            .iter()
            .find(|s| s.id == id)
            .map(|submission| GradedSubmission {
                submission: submission.clone(),
                test_cases: state.test_cases.get(&id).cloned().unwrap_or_default(),
            }))
    }

    async fn submissions_for_user(
        &self,
        user_id: &str,
        problem_id: Option<&str>,
    ) -> Result<Vec<SubmissionRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .submissions
            .iter()
            .rev()
            .filter(|s| s.user_id == user_id)
            .filter(|s| problem_id.map_or(true, |pid| s.problem_id == pid))
            .cloned()
            .collect())
    }

    async fn insert_problem(&self, problem: &Problem) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .problems
            .insert(problem.id, problem.clone());
        Ok(())
    }

    async fn update_problem(&self, problem: &Problem) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        match state.problems.get_mut(&problem.id) {
            Some(existing) => {
                *existing = problem.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "problem",
                id: problem.id.to_string(),
            }),
        }
    }

    async fn get_problem(&self, id: Uuid) -> Result<Option<Problem>, StoreError> {
        Ok(self.state.read().await.problems.get(&id).cloned())
    }
}
