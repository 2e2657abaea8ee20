//! Durable task queue: persisted, restart-safe bulk grading runs.
//!
//! One polling worker processes at most one task at a time across the
//! whole process, enforced by an in-process mutex, never by the
//! database. Within a task, questions and submissions are graded
//! strictly sequentially; the sandbox call dominates latency and
//! sequential processing keeps progress monotonic.

pub mod store;

pub use store::{MemoryTaskStore, RedisTaskStore, TaskStore};

use crate::evaluator::evaluate_submission;
use crate::sandbox::SandboxExecutor;
use crate::storage::{ExamResultRecord, ExamStore, Question};
use gradepipe_common::error::EvalError;
use gradepipe_common::scoring;
use gradepipe_common::types::{
    DurableTask, Language, QuestionOutcome, SubmissionOutcome, TaskProgress,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct TaskQueueConfig {
    /// How often the worker polls for pending tasks.
    pub poll_interval: Duration,
    /// Per-test-case budget for questions without their own limit.
    pub default_time_limit: Duration,
    pub memory_limit_mb: u64,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            default_time_limit: Duration::from_secs(1),
            memory_limit_mb: 512,
        }
    }
}

pub struct DurableQueue {
    store: Arc<dyn TaskStore>,
    exams: Arc<dyn ExamStore>,
    executor: Arc<dyn SandboxExecutor>,
    config: TaskQueueConfig,
    /// Held for the duration of one task run. `try_lock` on each tick
    /// guarantees at most one active run regardless of poll interval.
    busy: tokio::sync::Mutex<()>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DurableQueue {
    pub fn new(
        store: Arc<dyn TaskStore>,
        exams: Arc<dyn ExamStore>,
        executor: Arc<dyn SandboxExecutor>,
        config: TaskQueueConfig,
    ) -> Self {
        Self {
            store,
            exams,
            executor,
            config,
            busy: tokio::sync::Mutex::new(()),
            worker: std::sync::Mutex::new(None),
        }
    }

    /// Enqueue a grading run for an exam. Idempotent: while a task
    /// for this (exam, teacher) pair is still active, the same id is
    /// returned. With `force`, the active task is failed as
    /// superseded and a fresh one created.
    pub async fn enqueue(
        &self,
        exam_id: &str,
        teacher_id: &str,
        force: bool,
    ) -> Result<Uuid, EvalError> {
        if let Some(existing) = self.store.find_active(exam_id, teacher_id).await? {
            if !force {
                debug!(task_id = %existing.id, "returning existing active task");
                return Ok(existing.id);
            }
            warn!(task_id = %existing.id, "superseding active task");
            self.store.fail(&existing.id, &EvalError::TaskSuperseded).await?;
        }
        let task = DurableTask::new(exam_id.to_string(), teacher_id.to_string());
        self.store.create(&task).await?;
        info!(task_id = %task.id, exam_id, "grading task enqueued");
        Ok(task.id)
    }

    pub async fn status(&self, task_id: &Uuid) -> Result<Option<DurableTask>, EvalError> {
        self.store.get(task_id).await
    }

    /// Mark a task failed as stopped. The worker observes this
    /// cooperatively at the next progress write and aborts. Returns
    /// false if the task was already terminal.
    pub async fn stop(&self, task_id: &Uuid) -> Result<bool, EvalError> {
        let stopped = self.store.fail(task_id, &EvalError::TaskStopped).await?;
        if stopped {
            info!(task_id = %task_id, "task stop requested");
        }
        Ok(stopped)
    }

    /// Fail tasks a previous worker run left mid-processing. A
    /// restarted process cannot resume a half-graded run, so the
    /// records are failed and their (exam, teacher) pairs freed for
    /// re-enqueueing. Returns how many tasks were reclaimed.
    pub async fn recover(&self) -> Result<usize, EvalError> {
        let reason = EvalError::Storage("grading interrupted by a worker restart".to_string());
        let reclaimed = self.store.reclaim_processing(&reason).await?;
        for id in &reclaimed {
            warn!(task_id = %id, "reclaimed interrupted task");
        }
        Ok(reclaimed.len())
    }

    /// Reclaim interrupted tasks, then start the polling worker.
    pub fn start(self: &Arc<Self>) {
        let queue = Arc::clone(self);
        let interval = self.config.poll_interval;
        let handle = tokio::spawn(async move {
            if let Err(err) = queue.recover().await {
                error!(error = %err, "startup reclaim failed");
            }
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = queue.tick().await {
                    error!(error = %err, "worker tick failed");
                }
            }
        });
        *self.worker.lock().unwrap() = Some(handle);
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self.worker.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// One worker round: claim the oldest pending task (if no run is
    /// in flight) and process it to a terminal state.
    pub async fn tick(&self) -> Result<(), EvalError> {
        let Ok(_guard) = self.busy.try_lock() else {
            return Ok(());
        };
        let Some(task) = self.store.next_pending().await? else {
            return Ok(());
        };
        if !self.store.set_processing(&task.id).await? {
            return Ok(());
        }
        info!(task_id = %task.id, exam_id = %task.exam_id, "grading task started");

        match self.process(&task).await {
            Ok(()) => {}
            // already terminal, nothing to record
            Err(EvalError::TaskStopped) => {
                info!(task_id = %task.id, "task aborted after external stop");
            }
            Err(err) => {
                error!(task_id = %task.id, error = %err, "grading task failed");
                self.store.fail(&task.id, &err).await?;
            }
        }
        Ok(())
    }

    async fn process(&self, task: &DurableTask) -> Result<(), EvalError> {
        let exam = self
            .exams
            .load_exam(&task.exam_id)
            .await?
            .ok_or_else(|| EvalError::Storage(format!("exam {} not found", task.exam_id)))?;

        let questions: Vec<Question> =
            exam.programming_questions().into_iter().cloned().collect();
        if questions.is_empty() {
            return Err(EvalError::Storage(format!(
                "exam {} has no programming questions",
                task.exam_id
            )));
        }

        let records = self.exams.load_results(&task.exam_id).await?;
        let mut progress = TaskProgress {
            total: questions.len() as u32,
            completed: 0,
            current: None,
            submissions_total: (questions.len() * records.len()) as u32,
            submissions_completed: 0,
        };
        self.checkpoint(&task.id, &progress).await?;

        let mut outcomes = Vec::with_capacity(questions.len());
        for (index, question) in questions.iter().enumerate() {
            progress.current = Some(question.title.clone());
            self.checkpoint(&task.id, &progress).await?;

            let outcome = self
                .grade_question(&task.id, question, &records, &mut progress)
                .await?;
            outcomes.push(outcome);

            progress.completed = index as u32 + 1;
            self.checkpoint(&task.id, &progress).await?;
        }

        let grades = aggregate_grades(&outcomes);
        self.exams.apply_grades(&task.exam_id, &grades).await?;

        progress.current = None;
        if self
            .store
            .complete(&task.id, outcomes, &progress)
            .await?
        {
            info!(task_id = %task.id, students = grades.len(), "grading task completed");
        }
        Ok(())
    }

    /// Grade one question for every student. A single submission's
    /// failure is captured inline and never aborts the task; only the
    /// stop observation propagates out.
    async fn grade_question(
        &self,
        task_id: &Uuid,
        question: &Question,
        records: &[ExamResultRecord],
        progress: &mut TaskProgress,
    ) -> Result<QuestionOutcome, EvalError> {
        let time_limit = question
            .time_limit_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_time_limit);

        let mut results = Vec::new();
        for record in records {
            if let Some(outcome) = self
                .grade_submission(question, record, time_limit)
                .await
            {
                results.push(outcome);
            }
            progress.submissions_completed += 1;
            self.checkpoint(task_id, progress).await?;
        }

        Ok(QuestionOutcome {
            question_id: question.id.clone(),
            question_title: question.title.clone(),
            total_submissions: records.len() as u32,
            results,
            error: None,
        })
    }

    /// Never fails: extraction and execution problems become inline
    /// error outcomes. Students without a submission are skipped.
    async fn grade_submission(
        &self,
        question: &Question,
        record: &ExamResultRecord,
        time_limit: Duration,
    ) -> Option<SubmissionOutcome> {
        let submission = match extract_submission(&record.answers, &question.id) {
            Ok(Some(s)) => s,
            Ok(None) => {
                debug!(student_id = %record.student_id, question_id = %question.id, "no submission");
                return None;
            }
            Err(err) => {
                return Some(SubmissionOutcome {
                    student_id: record.student_id.clone(),
                    score: 0,
                    detail: None,
                    error: Some(err.to_string()),
                    error_code: Some(err.code().to_string()),
                });
            }
        };
        let language = submission
            .language
            .or(question.language)
            .unwrap_or(Language::Javascript);

        match evaluate_submission(
            self.executor.as_ref(),
            &submission.code,
            language,
            &question.test_cases,
            time_limit,
            self.config.memory_limit_mb,
        )
        .await
        {
            Ok(report) => {
                let score =
                    scoring::score(report.passed_tests, report.total_tests, question.points);
                Some(SubmissionOutcome {
                    student_id: record.student_id.clone(),
                    score,
                    detail: Some(report),
                    error: None,
                    error_code: None,
                })
            }
            Err(err) => Some(SubmissionOutcome {
                student_id: record.student_id.clone(),
                score: 0,
                detail: None,
                error: Some(err.to_string()),
                error_code: Some(err.code().to_string()),
            }),
        }
    }

    /// Progress write doubling as the cooperative stop check.
    async fn checkpoint(
        &self,
        task_id: &Uuid,
        progress: &TaskProgress,
    ) -> Result<(), EvalError> {
        if self.store.update_progress(task_id, progress).await? {
            Ok(())
        } else {
            Err(EvalError::TaskStopped)
        }
    }
}

/// Sum each student's per-question scores into one grade delta.
fn aggregate_grades(outcomes: &[QuestionOutcome]) -> HashMap<String, u32> {
    let mut grades: HashMap<String, u32> = HashMap::new();
    for outcome in outcomes {
        for result in &outcome.results {
            *grades.entry(result.student_id.clone()).or_default() += result.score;
        }
    }
    grades
}

struct ExtractedSubmission {
    code: String,
    language: Option<Language>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredAnswer {
    Plain(String),
    Tagged {
        code: String,
        #[serde(default)]
        language: Option<Language>,
    },
}

/// Pull one question's (code, language) out of a student's serialized
/// answer set. Answers are either a bare code string or a
/// `{code, language}` object; an unanswered question is `None`.
fn extract_submission(
    answers: &str,
    question_id: &str,
) -> Result<Option<ExtractedSubmission>, EvalError> {
    let parsed: HashMap<String, StoredAnswer> = serde_json::from_str(answers)
        .map_err(|e| EvalError::MalformedSubmission(format!("unreadable answer set: {}", e)))?;
    let Some(answer) = parsed.get(question_id) else {
        return Ok(None);
    };
    let (code, language) = match answer {
        StoredAnswer::Plain(code) => (code.clone(), None),
        StoredAnswer::Tagged { code, language } => (code.clone(), *language),
    };
    if code.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(ExtractedSubmission { code, language }))
}
