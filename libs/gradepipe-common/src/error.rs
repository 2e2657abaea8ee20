use thiserror::Error;

/// Error kinds of the evaluation pipeline.
///
/// Each kind carries a human-readable message; `code()` gives the
/// stable machine-readable identifier callers may branch on. Sandbox
/// failures are always surfaced as structured values, never panics.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("compile error: {0}")]
    CompileError(String),

    #[error("runtime error: {0}")]
    RuntimeError(String),

    #[error("time limit exceeded ({limit_ms}ms)")]
    TimeLimitExceeded { limit_ms: u64 },

    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    #[error("malformed submission: {0}")]
    MalformedSubmission(String),

    #[error("task superseded by a new grading task")]
    TaskSuperseded,

    #[error("task stopped by request")]
    TaskStopped,

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EvalError {
    pub fn code(&self) -> &'static str {
        match self {
            EvalError::CompileError(_) => "COMPILE_ERROR",
            EvalError::RuntimeError(_) => "RUNTIME_ERROR",
            EvalError::TimeLimitExceeded { .. } => "TIME_LIMIT_EXCEEDED",
            EvalError::SandboxUnavailable(_) => "SANDBOX_UNAVAILABLE",
            EvalError::MalformedSubmission(_) => "MALFORMED_SUBMISSION",
            EvalError::TaskSuperseded => "TASK_SUPERSEDED",
            EvalError::TaskStopped => "TASK_STOPPED",
            EvalError::JobNotFound(_) => "JOB_NOT_FOUND",
            EvalError::TaskNotFound(_) => "TASK_NOT_FOUND",
            EvalError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Whether the ephemeral queue should requeue the job. Only
    /// infrastructure-level failures are retryable; verdict-shaped
    /// errors are part of a completed evaluation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EvalError::SandboxUnavailable(_))
    }
}

impl From<redis::RedisError> for EvalError {
    fn from(err: redis::RedisError) -> Self {
        EvalError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        EvalError::Storage(format!("serialization error: {}", err))
    }
}
