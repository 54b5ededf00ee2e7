use crate::store::{GradingStore, StoreError};
use crate::types::{GradedSubmission, Problem, SubmissionRecord, TestCaseOutcome};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

/// Redis key layout - deterministic so every process reads the same records

pub const SUBMISSION_PREFIX: &str = "judgeline:submission";
pub const TEST_CASES_PREFIX: &str = "judgeline:testcases";
pub const SOLVED_PREFIX: &str = "judgeline:solved";
pub const PROBLEM_PREFIX: &str = "judgeline:problem";
pub const USER_SUBMISSIONS_PREFIX: &str = "judgeline:user-submissions";

pub fn submission_key(id: &Uuid) -> String {
    format!("{}:{}", SUBMISSION_PREFIX, id)
}

pub fn test_cases_key(submission_id: &Uuid) -> String {
    format!("{}:{}", TEST_CASES_PREFIX, submission_id)
}

/// Set of problem ids solved by a user
pub fn solved_key(user_id: &str) -> String {
    format!("{}:{}", SOLVED_PREFIX, user_id)
}

pub fn problem_key(id: &Uuid) -> String {
    format!("{}:{}", PROBLEM_PREFIX, id)
}

/// List of submission ids, newest at the head
pub fn user_submissions_key(user_id: &str) -> String {
    format!("{}:{}", USER_SUBMISSIONS_PREFIX, user_id)
}

/// Redis-backed grading store
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(key).await?;
        match payload {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl GradingStore for RedisStore {
    async fn insert_submission(&self, record: &SubmissionRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .atomic()
            .set(submission_key(&record.id), payload)
            .ignore()
            .lpush(user_submissions_key(&record.user_id), record.id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn insert_test_case_results(
        &self,
        submission_id: Uuid,
        outcomes: &[TestCaseOutcome],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(submission_key(&submission_id)).await?;
        if !exists {
            return Err(StoreError::NotFound {
                kind: "submission",
                id: submission_id.to_string(),
            });
        }

        let payload = serde_json::to_string(outcomes)?;
        let _: () = conn.set(test_cases_key(&submission_id), payload).await?;
        Ok(())
    }

    async fn insert_graded_submission(
        &self,
        record: &SubmissionRecord,
        outcomes: &[TestCaseOutcome],
        solved: bool,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record)?;
        let outcomes = serde_json::to_string(outcomes)?;
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(submission_key(&record.id), payload)
            .ignore()
            .set(test_cases_key(&record.id), outcomes)
            .ignore()
            .lpush(user_submissions_key(&record.user_id), record.id.to_string())
            .ignore();
        if solved {
            pipe.sadd(solved_key(&record.user_id), &record.problem_id).ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn mark_solved(&self, user_id: &str, problem_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        // SADD of an existing member returns 0, which is still success
        let _added: i64 = conn.sadd(solved_key(user_id), problem_id).await?;
        Ok(())
    }

    async fn is_solved(&self, user_id: &str, problem_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.sismember(solved_key(user_id), problem_id).await?)
    }

    async fn get_submission(&self, id: Uuid) -> Result<Option<GradedSubmission>, StoreError> {
        let Some(submission) = self.get_json::<SubmissionRecord>(&submission_key(&id)).await?
        else {
            return Ok(None);
        };
        let test_cases = self
            .get_json::<Vec<TestCaseOutcome>>(&test_cases_key(&id))
            .await?
            .unwrap_or_default();

        Ok(Some(GradedSubmission {
            submission,
            test_cases,
        }))
    }

    async fn submissions_for_user(
        &self,
        user_id: &str,
        problem_id: Option<&str>,
    ) -> Result<Vec<SubmissionRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.lrange(user_submissions_key(user_id), 0, -1).await?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let key = format!("{}:{}", SUBMISSION_PREFIX, id);
            if let Some(record) = self.get_json::<SubmissionRecord>(&key).await? {
                if problem_id.map_or(true, |pid| record.problem_id == pid) {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    async fn insert_problem(&self, problem: &Problem) -> Result<(), StoreError> {
        let payload = serde_json::to_string(problem)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(problem_key(&problem.id), payload).await?;
        Ok(())
    }

    async fn update_problem(&self, problem: &Problem) -> Result<(), StoreError> {
        let payload = serde_json::to_string(problem)?;
        let mut conn = self.conn.clone();

        // XX: only overwrite an existing problem
        let written: Option<String> = redis::cmd("SET")
            .arg(problem_key(&problem.id))
            .arg(payload)
            .arg("XX")
            .query_async(&mut conn)
            .await?;

        match written {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                kind: "problem",
                id: problem.id.to_string(),
            }),
        }
    }

    async fn get_problem(&self, id: Uuid) -> Result<Option<Problem>, StoreError> {
        self.get_json(&problem_key(&id)).await
    }
}
