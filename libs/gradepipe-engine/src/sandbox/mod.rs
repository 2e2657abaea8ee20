//! Sandbox Executor - runs one program against one input under
//! caller-supplied time/memory limits and returns a classified
//! outcome.
//!
//! The executor knows HOW to run code (remote judge service, local
//! subprocess); it does not know scoring rules and never evaluates
//! correctness. Classified execution failures (compile error, runtime
//! error, time limit) come back as structured outcomes; `Err` is
//! reserved for failures reaching the backend itself, which the
//! ephemeral queue treats as retryable.

use async_trait::async_trait;
use gradepipe_common::error::EvalError;
use gradepipe_common::types::Language;
use std::time::Duration;

mod local;
mod remote;

pub use local::LocalRunner;
pub use remote::RemoteJudge;

/// Safety limits to keep pathological inputs away from the backends.
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_STDIN_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// One program, one input, one set of limits.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub code: String,
    pub stdin: String,
    pub language: Language,
    pub time_limit: Duration,
    pub memory_limit_mb: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecVerdict {
    Ok,
    CompileError,
    RuntimeError,
    TimeLimitExceeded,
}

/// Raw result of a single execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub verdict: ExecVerdict,
    pub output: String,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ExecutionOutcome {
    pub fn ok(output: String, execution_time_ms: u64) -> Self {
        Self {
            verdict: ExecVerdict::Ok,
            output,
            error: None,
            execution_time_ms,
        }
    }

    pub fn failed(
        verdict: ExecVerdict,
        error: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            verdict,
            output: String::new(),
            error: Some(error.into()),
            execution_time_ms,
        }
    }

    pub fn success(&self) -> bool {
        self.verdict == ExecVerdict::Ok
    }
}

#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    /// Run one program against one input under the request's limits.
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, EvalError>;
}

/// Reject oversized payloads before they reach a backend.
pub(crate) fn validate_request(request: &ExecutionRequest) -> Result<(), EvalError> {
    if request.code.len() > MAX_SOURCE_CODE_BYTES {
        return Err(EvalError::MalformedSubmission(format!(
            "source code exceeds maximum size of {} bytes",
            MAX_SOURCE_CODE_BYTES
        )));
    }
    if request.stdin.len() > MAX_STDIN_BYTES {
        return Err(EvalError::MalformedSubmission(format!(
            "test input exceeds maximum size of {} bytes",
            MAX_STDIN_BYTES
        )));
    }
    Ok(())
}
