//! Verdict Aggregator - Language-Agnostic Grading Logic
//!
//! **Core Responsibility:**
//! Compare raw backend results against expected outputs and derive a verdict.
//!
//! **Critical Properties:**
//! - Knows nothing about the execution backend's transport
//! - Knows nothing about persistence
//! - Pure function: (execution results, expected outputs) → verdict
//!
//! **Grading Rules:**
//! - A test case passes iff normalized stdout equals normalized expected output
//! - Backend status does not decide a pass: "Accepted" with wrong output still fails
//! - Missing stdout never passes, not even against an empty expected output
//! - all_passed = AND over every outcome; every outcome is still produced
//!
//! **Normalization Rules:**
//! - Trim leading and trailing whitespace: YES
//! - Internal whitespace: preserved
//! - Case sensitivity: YES (exact match required)

use chrono::Utc;
use judgeline_common::types::{
    ExecutionResult, SubmissionRecord, TestCaseOutcome, Verdict,
};
use std::time::Duration;
use uuid::Uuid;

/// Strip surrounding whitespace; internal whitespace and case are preserved
fn normalize_output(output: &str) -> &str {
    output.trim()
}

fn format_memory(kb: u64) -> String {
    format!("{} KB", kb)
}

fn format_time(time: Duration) -> String {
    format!("{}s", time.as_secs_f64())
}

/// Grade one result against its expected output
///
/// ## Arguments
/// * `test_case` - 1-based test case number
/// * `result` - Terminal backend result for the case
/// * `expected` - Expected stdout
pub fn evaluate_case(test_case: u32, result: &ExecutionResult, expected: &str) -> TestCaseOutcome {
    let passed = match &result.stdout {
        Some(stdout) => normalize_output(stdout) == normalize_output(expected),
        None => false,
    };

    TestCaseOutcome {
        test_case,
        passed,
        stdout: result.stdout.clone(),
        expected: expected.to_string(),
        stderr: result.stderr.clone().filter(|s| !s.is_empty()),
        compile_output: result.compile_output.clone().filter(|s| !s.is_empty()),
        status: result.status.description.clone(),
        memory: result.memory.map(format_memory),
        time: result.time.map(format_time),
    }
}

/// Pairwise, index-aligned grading of a whole batch
///
/// ## Panics
/// If `results` and `expected_outputs` differ in length. Callers validate
/// inputs before any backend call, so a mismatch is a bug.
pub fn build_verdict(results: &[ExecutionResult], expected_outputs: &[String]) -> Verdict {
    assert_eq!(
        results.len(),
        expected_outputs.len(),
        "results and expected outputs must be index-aligned"
    );

    let outcomes: Vec<TestCaseOutcome> = results
        .iter()
        .zip(expected_outputs)
        .enumerate()
        .map(|(idx, (result, expected))| evaluate_case((idx + 1) as u32, result, expected))
        .collect();

    let all_passed = outcomes.iter().all(|o| o.passed);

    Verdict {
        all_passed,
        outcomes,
    }
}

/// JSON array of per-case values, or `None` when no case has one
fn collect_present(values: Vec<Option<String>>) -> Option<String> {
    if values.iter().any(Option::is_some) {
        serde_json::to_string(&values).ok()
    } else {
        None
    }
}

/// Everything about a submission that is not derived from the verdict
pub struct SubmissionMeta<'a> {
    pub user_id: &'a str,
    pub problem_id: &'a str,
    pub source_code: &'a str,
    pub language: &'a str,
    pub stdin: &'a [String],
}

/// Shape a verdict into its persisted form
pub fn build_submission_record(meta: &SubmissionMeta<'_>, verdict: &Verdict) -> SubmissionRecord {
    let outcomes = &verdict.outcomes;
    let stdout: Vec<Option<String>> = outcomes.iter().map(|o| o.stdout.clone()).collect();

    SubmissionRecord {
        id: Uuid::new_v4(),
        user_id: meta.user_id.to_string(),
        problem_id: meta.problem_id.to_string(),
        source_code: meta.source_code.to_string(),
        language: meta.language.to_string(),
        stdin: meta.stdin.join("\n"),
        stdout: serde_json::to_string(&stdout).unwrap_or_else(|_| "[]".to_string()),
        stderr: collect_present(outcomes.iter().map(|o| o.stderr.clone()).collect()),
        compile_output: collect_present(outcomes.iter().map(|o| o.compile_output.clone()).collect()),
        status: verdict.label().to_string(),
        memory: collect_present(outcomes.iter().map(|o| o.memory.clone()).collect()),
        time: collect_present(outcomes.iter().map(|o| o.time.clone()).collect()),
        created_at: Utc::now(),
    }
}
