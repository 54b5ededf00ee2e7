use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// One program run handed to the execution backend.
///
/// Field names match the backend's batch-submit payload, so the request is
/// serialized as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub source_code: String,
    pub language_id: u32,
    pub stdin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
}

/// Opaque handle issued by the execution backend for one queued run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionToken(pub String);

impl SubmissionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend-side state of a run.
///
/// Ids 1 and 2 are queued and processing; 3 is a clean exit. Every other id
/// is a terminal failure (compile error, runtime error, time limit, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub id: u32,
    pub description: String,
}

impl ExecutionStatus {
    pub const IN_QUEUE: u32 = 1;
    pub const PROCESSING: u32 = 2;
    pub const ACCEPTED: u32 = 3;

    pub fn new(id: u32, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.id != Self::IN_QUEUE && self.id != Self::PROCESSING
    }

    /// Engine-level success. Says nothing about output correctness.
    pub fn is_accepted(&self) -> bool {
        self.id == Self::ACCEPTED
    }
}

/// Raw result of one run once the backend reports it terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub token: SubmissionToken,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub message: Option<String>,
    pub status: ExecutionStatus,
    pub time: Option<Duration>,
    /// Peak memory in kilobytes
    pub memory: Option<u64>,
}

/// Graded outcome of a single test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseOutcome {
    /// 1-based test case number
    pub test_case: u32,
    pub passed: bool,
    pub stdout: Option<String>,
    pub expected: String,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    /// Execution status description reported by the backend
    pub status: String,
    /// Formatted as `"<n> KB"`
    pub memory: Option<String>,
    /// Formatted as `"<secs>s"`
    pub time: Option<String>,
}

/// Coarse label persisted with a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictLabel {
    Accepted,
    WrongAnswer,
}

impl fmt::Display for VerdictLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictLabel::Accepted => write!(f, "Accepted"),
            VerdictLabel::WrongAnswer => write!(f, "Wrong Answer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub all_passed: bool,
    pub outcomes: Vec<TestCaseOutcome>,
}

impl Verdict {
    pub fn label(&self) -> VerdictLabel {
        if self.all_passed {
            VerdictLabel::Accepted
        } else {
            VerdictLabel::WrongAnswer
        }
    }

    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }
}

/// Persistence-ready form of a graded submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: Uuid,
    pub user_id: String,
    pub problem_id: String,
    pub source_code: String,
    pub language: String,
    /// Test inputs joined with `\n`
    pub stdin: String,
    /// JSON array of per-case stdout
    pub stdout: String,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub status: String,
    pub memory: Option<String>,
    pub time: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A submission together with its per-case rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradedSubmission {
    pub submission: SubmissionRecord,
    pub test_cases: Vec<TestCaseOutcome>,
}

/// Canonical test case of a problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tags: Vec<String>,
    pub test_cases: Vec<TestCase>,
    /// Language name -> reference source
    pub reference_solutions: BTreeMap<String, String>,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Authoring payload for a new problem
#[derive(Debug, Clone, Deserialize)]
pub struct NewProblem {
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tags: Vec<String>,
    pub test_cases: Vec<TestCase>,
    pub reference_solutions: BTreeMap<String, String>,
}

/// Partial update of a problem; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProblemUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub tags: Option<Vec<String>>,
    pub test_cases: Option<Vec<TestCase>>,
    pub reference_solutions: Option<BTreeMap<String, String>>,
}

impl ProblemUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.difficulty.is_none()
            && self.tags.is_none()
            && self.test_cases.is_none()
            && self.reference_solutions.is_none()
    }

    pub fn apply(self, problem: &mut Problem) {
        if let Some(title) = self.title {
            problem.title = title;
        }
        if let Some(description) = self.description {
            problem.description = description;
        }
        if let Some(difficulty) = self.difficulty {
            problem.difficulty = difficulty;
        }
        if let Some(tags) = self.tags {
            problem.tags = tags;
        }
        if let Some(test_cases) = self.test_cases {
            problem.test_cases = test_cases;
        }
        if let Some(reference_solutions) = self.reference_solutions {
            problem.reference_solutions = reference_solutions;
        }
    }
}

/// Language given either by backend id or by registry name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LanguageSelector {
    Id(u32),
    Name(String),
}

/// Inbound ad hoc run against caller-provided test cases
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub source_code: String,
    pub language: LanguageSelector,
    pub stdin: Vec<String>,
    pub expected_outputs: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal_ids() {
        assert!(!ExecutionStatus::new(1, "In Queue").is_terminal());
        assert!(!ExecutionStatus::new(2, "Processing").is_terminal());
        assert!(ExecutionStatus::new(3, "Accepted").is_terminal());
        assert!(ExecutionStatus::new(11, "Runtime Error (NZEC)").is_terminal());
        assert!(ExecutionStatus::new(3, "Accepted").is_accepted());
        assert!(!ExecutionStatus::new(4, "Wrong Answer").is_accepted());
    }

    #[test]
    fn test_verdict_label_display() {
        assert_eq!(VerdictLabel::Accepted.to_string(), "Accepted");
        assert_eq!(VerdictLabel::WrongAnswer.to_string(), "Wrong Answer");
    }

    #[test]
    fn test_execution_request_omits_missing_expected_output() {
        let request = ExecutionRequest {
            source_code: "print(1)".to_string(),
            language_id: 71,
            stdin: String::new(),
            expected_output: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("expected_output").is_none());
        assert_eq!(json["language_id"], 71);
    }

    #[test]
    fn test_language_selector_untagged() {
        let by_id: LanguageSelector = serde_json::from_str("71").unwrap();
        assert_eq!(by_id, LanguageSelector::Id(71));
        let by_name: LanguageSelector = serde_json::from_str("\"python\"").unwrap();
        assert_eq!(by_name, LanguageSelector::Name("python".to_string()));
    }

    #[test]
    fn test_problem_update_is_empty() {
        assert!(ProblemUpdate::default().is_empty());
        let update = ProblemUpdate {
            title: Some("Two Sum".to_string()),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
