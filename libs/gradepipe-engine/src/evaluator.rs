//! Drives a sandbox executor across a submission's test cases and
//! folds the per-case outcomes into an `EvaluationReport`.

use crate::sandbox::{ExecVerdict, ExecutionRequest, SandboxExecutor};
use gradepipe_common::error::EvalError;
use gradepipe_common::types::{
    EvaluationReport, Language, TestCase, TestOutcome, TestVerdict,
};
use std::time::Duration;
use tracing::debug;

/// Compare outputs ignoring trailing whitespace on each line and
/// leading/trailing blank lines. Checkers in the wild disagree on a
/// final newline; graded submissions should not.
fn outputs_match(actual: &str, expected: &str) -> bool {
    let normalize = |s: &str| {
        s.trim_end()
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n")
    };
    normalize(actual) == normalize(expected)
}

async fn judge_case(
    executor: &dyn SandboxExecutor,
    code: &str,
    language: Language,
    case: &TestCase,
    time_limit: Duration,
    memory_limit_mb: u64,
) -> Result<TestOutcome, EvalError> {
    let request = ExecutionRequest {
        code: code.to_string(),
        stdin: case.input.clone(),
        language,
        time_limit,
        memory_limit_mb,
    };
    let outcome = executor.execute(&request).await?;

    let (verdict, passed, error) = match outcome.verdict {
        ExecVerdict::Ok => {
            // A run that finished but overshot the wall-clock budget
            // still fails, even with the right output.
            if outcome.execution_time_ms > time_limit.as_millis() as u64 {
                (
                    TestVerdict::TimeLimitExceeded,
                    false,
                    Some(format!(
                        "finished in {}ms, limit {}ms",
                        outcome.execution_time_ms,
                        time_limit.as_millis()
                    )),
                )
            } else if outputs_match(&outcome.output, &case.expected_output) {
                (TestVerdict::Accepted, true, None)
            } else {
                (TestVerdict::WrongAnswer, false, None)
            }
        }
        ExecVerdict::CompileError => (TestVerdict::CompileError, false, outcome.error.clone()),
        ExecVerdict::RuntimeError => (TestVerdict::RuntimeError, false, outcome.error.clone()),
        ExecVerdict::TimeLimitExceeded => {
            (TestVerdict::TimeLimitExceeded, false, outcome.error.clone())
        }
    };

    Ok(TestOutcome {
        verdict,
        passed,
        actual_output: if outcome.output.is_empty() {
            None
        } else {
            Some(outcome.output)
        },
        error,
        execution_time_ms: outcome.execution_time_ms,
    })
}

/// Run every test case in order and collect the report. A compile
/// error on the first case settles the whole submission; there is no
/// point re-invoking the compiler per case.
pub async fn evaluate_submission(
    executor: &dyn SandboxExecutor,
    code: &str,
    language: Language,
    test_cases: &[TestCase],
    time_limit: Duration,
    memory_limit_mb: u64,
) -> Result<EvaluationReport, EvalError> {
    let mut results = Vec::with_capacity(test_cases.len());
    let mut passed_tests = 0u32;

    for (index, case) in test_cases.iter().enumerate() {
        let outcome =
            judge_case(executor, code, language, case, time_limit, memory_limit_mb).await?;

        if index == 0 && outcome.verdict == TestVerdict::CompileError {
            debug!("compile error on first case, settling remaining cases");
            let remaining = test_cases.len() - 1;
            results.push(outcome.clone());
            for _ in 0..remaining {
                results.push(TestOutcome {
                    verdict: TestVerdict::CompileError,
                    passed: false,
                    actual_output: None,
                    error: outcome.error.clone(),
                    execution_time_ms: 0,
                });
            }
            break;
        }

        if outcome.passed {
            passed_tests += 1;
        }
        results.push(outcome);
    }

    Ok(EvaluationReport {
        total_tests: test_cases.len() as u32,
        passed_tests,
        results,
    })
}
