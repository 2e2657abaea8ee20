//! Mock sandbox executors shared by the engine's unit tests.

use crate::sandbox::{ExecutionOutcome, ExecutionRequest, SandboxExecutor};
use async_trait::async_trait;
use gradepipe_common::error::EvalError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

type Answer = Result<ExecutionOutcome, EvalError>;

/// Executor that replays scripted answers, looked up by stdin first,
/// then by source code, then a default. Counts invocations and records
/// the order in which submissions entered.
pub(crate) struct ScriptedExecutor {
    by_input: Mutex<HashMap<String, Answer>>,
    by_code: Mutex<HashMap<String, Answer>>,
    default: Mutex<Option<Answer>>,
    entered: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            by_input: Mutex::new(HashMap::new()),
            by_code: Mutex::new(HashMap::new()),
            default: Mutex::new(None),
            entered: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn answer_for_input(self, input: &str, outcome: ExecutionOutcome) -> Self {
        self.by_input
            .lock()
            .unwrap()
            .insert(input.to_string(), Ok(outcome));
        self
    }

    pub fn answer_for_code(self, code: &str, outcome: ExecutionOutcome) -> Self {
        self.by_code
            .lock()
            .unwrap()
            .insert(code.to_string(), Ok(outcome));
        self
    }

    pub fn default_answer(self, outcome: ExecutionOutcome) -> Self {
        *self.default.lock().unwrap() = Some(Ok(outcome));
        self
    }

    pub fn error_answer(self, error: EvalError) -> Self {
        *self.default.lock().unwrap() = Some(Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Source codes in the order executions began.
    pub fn entered(&self) -> Vec<String> {
        self.entered.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxExecutor for ScriptedExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, EvalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.lock().unwrap().push(request.code.clone());
        if let Some(answer) = self.by_input.lock().unwrap().get(&request.stdin) {
            return answer.clone();
        }
        if let Some(answer) = self.by_code.lock().unwrap().get(&request.code) {
            return answer.clone();
        }
        match self.default.lock().unwrap().as_ref() {
            Some(answer) => answer.clone(),
            None => Ok(ExecutionOutcome::ok(request.stdin.clone(), 1)),
        }
    }
}

/// Executor for scheduler tests: echoes stdin so a test case with
/// `expected_output == input` is accepted, records the order in which
/// submissions entered, and tracks the high-water mark of concurrent
/// executions. An optional semaphore gate lets a test hold executions
/// open until it decides to release them.
pub(crate) struct GatedExecutor {
    entered: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl GatedExecutor {
    pub fn new() -> Self {
        Self {
            entered: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Executions block until the test adds permits to `gate`.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Source codes in the order executions began.
    pub fn entered(&self) -> Vec<String> {
        self.entered.lock().unwrap().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxExecutor for GatedExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, EvalError> {
        self.entered.lock().unwrap().push(request.code.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| EvalError::SandboxUnavailable("gate closed".into()))?;
            permit.forget();
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(ExecutionOutcome::ok(request.stdin.clone(), 1))
    }
}
