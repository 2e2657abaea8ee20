//! In-process, priority-ordered, concurrency-capped scheduler for
//! single-submission evaluation.
//!
//! Jobs live in process memory only. A job is picked by highest
//! priority (FIFO within a priority level), evaluated on a spawned
//! task, and its terminal outcome parked in a result store until the
//! result TTL purges it. Scheduling decisions happen under one lock;
//! the sandbox call itself runs outside it.

use crate::evaluator::evaluate_submission;
use crate::sandbox::SandboxExecutor;
use gradepipe_common::error::EvalError;
use gradepipe_common::types::{EvalJob, JobResult, PRIORITY_HIGH};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    pub max_retries: u32,
    /// How long a terminal result stays pollable.
    pub result_ttl: Duration,
    /// How long a job may sit unstarted before the sweep fails it.
    pub job_ttl: Duration,
    pub sweep_interval: Duration,
    pub retry_delay: Duration,
    /// Hard cap on one whole evaluation; expiry frees the slot and
    /// takes the retry path.
    pub eval_timeout: Duration,
    /// Per-test-case wall-clock budget handed to the executor.
    pub time_limit: Duration,
    pub memory_limit_mb: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retries: 3,
            result_ttl: Duration::from_secs(5 * 60),
            job_ttl: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(60),
            retry_delay: Duration::from_millis(100),
            eval_timeout: Duration::from_secs(30),
            time_limit: Duration::from_secs(5),
            memory_limit_mb: 512,
        }
    }
}

/// Poller-visible job state. Retry rounds re-enter the pending set
/// internally; pollers only ever observe these three phases.
#[derive(Debug, Clone)]
pub enum JobStatus {
    Pending {
        position: usize,
        estimated_secs: u64,
    },
    Processing,
    Completed(JobResult),
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

struct PendingJob {
    job: EvalJob,
    enqueued_at: Instant,
}

struct StoredResult {
    result: JobResult,
    stored_at: Instant,
}

#[derive(Default)]
struct QueueState {
    pending: HashMap<Uuid, PendingJob>,
    processing: HashSet<Uuid>,
    results: HashMap<Uuid, StoredResult>,
}

impl QueueState {
    /// Scheduling order: highest priority first, earliest submission
    /// within a priority level.
    fn scheduling_order(&self) -> Vec<Uuid> {
        let mut ids: Vec<&PendingJob> = self.pending.values().collect();
        ids.sort_by(|a, b| {
            b.job
                .priority
                .cmp(&a.job.priority)
                .then(a.job.submitted_at.cmp(&b.job.submitted_at))
        });
        ids.iter().map(|p| p.job.id).collect()
    }

    fn park_result(&mut self, id: Uuid, result: JobResult) {
        self.results.insert(
            id,
            StoredResult {
                result,
                stored_at: Instant::now(),
            },
        );
    }
}

struct Shared {
    state: Mutex<QueueState>,
    executor: Arc<dyn SandboxExecutor>,
    config: QueueConfig,
}

pub struct EphemeralQueue {
    shared: Arc<Shared>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl EphemeralQueue {
    pub fn new(executor: Arc<dyn SandboxExecutor>, config: QueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                executor,
                config,
            }),
            sweeper: Mutex::new(None),
        }
    }

    /// Enqueue a job and start it immediately if a slot is free.
    pub fn submit(&self, job: EvalJob) -> Uuid {
        let id = job.id;
        info!(job_id = %id, priority = job.priority, "job submitted");
        {
            let mut state = self.shared.state.lock().unwrap();
            state.pending.insert(
                id,
                PendingJob {
                    job,
                    enqueued_at: Instant::now(),
                },
            );
        }
        Shared::dispatch(&self.shared);
        id
    }

    /// Submit with a priority that outranks every normal job.
    pub fn submit_high_priority(&self, mut job: EvalJob) -> Uuid {
        job.priority = PRIORITY_HIGH;
        self.submit(job)
    }

    pub fn status(&self, id: Uuid) -> Option<JobStatus> {
        let state = self.shared.state.lock().unwrap();
        if let Some(stored) = state.results.get(&id) {
            return Some(JobStatus::Completed(stored.result.clone()));
        }
        if state.processing.contains(&id) {
            return Some(JobStatus::Processing);
        }
        if state.pending.contains_key(&id) {
            let position = state
                .scheduling_order()
                .iter()
                .position(|queued| *queued == id)
                .map(|i| i + 1)
                .unwrap_or(1);
            return Some(JobStatus::Pending {
                position,
                estimated_secs: (position as u64 * 2).max(1),
            });
        }
        None
    }

    /// Remove a job that has not started yet. Jobs already processing
    /// run to completion; cancelling them returns false.
    pub fn cancel(&self, id: Uuid) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        if state.pending.remove(&id).is_some() {
            state.park_result(id, JobResult::failure("job cancelled", "JOB_CANCELLED"));
            info!(job_id = %id, "job cancelled");
            true
        } else {
            false
        }
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.state.lock().unwrap();
        let completed = state
            .results
            .values()
            .filter(|s| s.result.success)
            .count();
        QueueStats {
            pending: state.pending.len(),
            processing: state.processing.len(),
            completed,
            failed: state.results.len() - completed,
        }
    }

    /// Purge pending jobs past the job TTL (parked as timeout
    /// failures) and results past the result TTL. Jobs already
    /// processing are never purged.
    pub fn sweep_once(&self) {
        Shared::sweep_once(&self.shared);
    }

    /// Start the periodic TTL sweeper.
    pub fn start(&self) {
        let shared = Arc::clone(&self.shared);
        let interval = shared.config.sweep_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                Shared::sweep_once(&shared);
            }
        });
        *self.sweeper.lock().unwrap() = Some(handle);
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for EphemeralQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    /// Fill free concurrency slots with the best pending jobs.
    fn dispatch(shared: &Arc<Shared>) {
        loop {
            let job = {
                let mut state = shared.state.lock().unwrap();
                if state.processing.len() >= shared.config.max_concurrent {
                    return;
                }
                let Some(next) = state.scheduling_order().first().copied() else {
                    return;
                };
                let pending = match state.pending.remove(&next) {
                    Some(p) => p,
                    None => continue,
                };
                state.processing.insert(next);
                pending
            };
            debug!(job_id = %job.job.id, "job dispatched");
            let shared = Arc::clone(shared);
            tokio::spawn(async move {
                Shared::run_job(shared, job).await;
            });
        }
    }

    async fn run_job(shared: Arc<Shared>, pending: PendingJob) {
        let config = shared.config;
        let mut job = pending.job;
        let id = job.id;

        let evaluated = tokio::time::timeout(
            config.eval_timeout,
            evaluate_submission(
                shared.executor.as_ref(),
                &job.code,
                job.language,
                &job.test_cases,
                config.time_limit,
                config.memory_limit_mb,
            ),
        )
        .await
        .unwrap_or_else(|_| {
            Err(EvalError::SandboxUnavailable(format!(
                "evaluation exceeded {}s",
                config.eval_timeout.as_secs()
            )))
        });

        match evaluated {
            Ok(report) => {
                info!(
                    job_id = %id,
                    passed = report.passed_tests,
                    total = report.total_tests,
                    "job completed"
                );
                let mut state = shared.state.lock().unwrap();
                state.processing.remove(&id);
                state.park_result(id, JobResult::success(report));
            }
            Err(err) => {
                job.retry_count += 1;
                if err.is_retryable() && job.retry_count < config.max_retries {
                    warn!(
                        job_id = %id,
                        retry = job.retry_count,
                        error = %err,
                        "job failed, requeueing"
                    );
                    tokio::time::sleep(config.retry_delay).await;
                    let mut state = shared.state.lock().unwrap();
                    state.processing.remove(&id);
                    // decay priority so retries stop starving others
                    job.priority = (job.priority - 1).max(1);
                    state.pending.insert(
                        id,
                        PendingJob {
                            job,
                            enqueued_at: pending.enqueued_at,
                        },
                    );
                } else {
                    warn!(job_id = %id, error = %err, "job failed terminally");
                    let mut state = shared.state.lock().unwrap();
                    state.processing.remove(&id);
                    state.park_result(id, JobResult::failure(err.to_string(), err.code()));
                }
            }
        }
        Shared::dispatch(&shared);
    }

    fn sweep_once(shared: &Arc<Shared>) {
        let mut state = shared.state.lock().unwrap();
        let expired: Vec<Uuid> = state
            .pending
            .iter()
            .filter(|(_, p)| p.enqueued_at.elapsed() > shared.config.job_ttl)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            state.pending.remove(&id);
            state.park_result(
                id,
                JobResult::failure("job expired before processing", "TIME_LIMIT_EXCEEDED"),
            );
            warn!(job_id = %id, "pending job expired");
        }
        let result_ttl = shared.config.result_ttl;
        state
            .results
            .retain(|_, stored| stored.stored_at.elapsed() <= result_ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ExecutionOutcome;
    use crate::test_support::{GatedExecutor, ScriptedExecutor};
    use gradepipe_common::types::{Language, TestCase, PRIORITY_NORMAL};
    use tokio::sync::Semaphore;

    fn job(code: &str) -> EvalJob {
        EvalJob::new(
            "exam-1".to_string(),
            "student-1".to_string(),
            code.to_string(),
            Language::Python,
            vec![TestCase {
                input: "x".to_string(),
                expected_output: "x".to_string(),
                description: None,
            }],
            PRIORITY_NORMAL,
        )
    }

    fn fast_config() -> QueueConfig {
        QueueConfig {
            retry_delay: Duration::from_millis(1),
            ..QueueConfig::default()
        }
    }

    async fn wait_for_completion(queue: &EphemeralQueue, id: Uuid) -> JobResult {
        for _ in 0..500 {
            if let Some(JobStatus::Completed(result)) = queue.status(id) {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} did not complete in time", id);
    }

    #[tokio::test]
    async fn successful_job_reports_result() {
        let executor = Arc::new(ScriptedExecutor::new());
        let queue = EphemeralQueue::new(executor, fast_config());

        let id = queue.submit(job("print(input())"));
        let result = wait_for_completion(&queue, id).await;
        assert!(result.success);
        let report = result.report.unwrap();
        assert_eq!(report.passed_tests, 1);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let executor = Arc::new(ScriptedExecutor::new());
        let queue = EphemeralQueue::new(executor, fast_config());
        assert!(queue.status(Uuid::new_v4()).is_none());
        assert!(!queue.cancel(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn processing_never_exceeds_max_concurrent() {
        let gate = Arc::new(Semaphore::new(0));
        let executor = Arc::new(GatedExecutor::new().with_gate(Arc::clone(&gate)));
        let queue = EphemeralQueue::new(executor.clone(), fast_config());

        let ids: Vec<Uuid> = (0..6).map(|i| queue.submit(job(&format!("code-{}", i)))).collect();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = queue.stats();
        assert_eq!(stats.processing, 3);
        assert_eq!(stats.pending, 3);
        assert_eq!(executor.max_active(), 3);

        gate.add_permits(16);
        for id in ids {
            let result = wait_for_completion(&queue, id).await;
            assert!(result.success);
        }
        assert!(executor.max_active() <= 3);
    }

    #[tokio::test]
    async fn high_priority_jobs_schedule_first() {
        let gate = Arc::new(Semaphore::new(0));
        let executor = Arc::new(GatedExecutor::new().with_gate(Arc::clone(&gate)));
        let config = QueueConfig {
            max_concurrent: 1,
            ..fast_config()
        };
        let queue = EphemeralQueue::new(executor.clone(), config);

        queue.submit(job("first"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.submit(job("normal-a"));
        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.submit(job("normal-b"));
        tokio::time::sleep(Duration::from_millis(5)).await;
        let urgent = queue.submit_high_priority(job("urgent"));

        if let Some(JobStatus::Pending { position, estimated_secs }) = queue.status(urgent) {
            assert_eq!(position, 1);
            assert_eq!(estimated_secs, 2);
        } else {
            panic!("urgent job should be pending");
        }

        gate.add_permits(16);
        let result = wait_for_completion(&queue, urgent).await;
        assert!(result.success);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            executor.entered(),
            vec![
                "first".to_string(),
                "urgent".to_string(),
                "normal-a".to_string(),
                "normal-b".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn cancel_succeeds_only_while_pending() {
        let gate = Arc::new(Semaphore::new(0));
        let executor = Arc::new(GatedExecutor::new().with_gate(Arc::clone(&gate)));
        let config = QueueConfig {
            max_concurrent: 1,
            ..fast_config()
        };
        let queue = EphemeralQueue::new(executor, config);

        let running = queue.submit(job("running"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let waiting = queue.submit(job("waiting"));

        assert!(matches!(queue.status(running), Some(JobStatus::Processing)));
        assert!(!queue.cancel(running));

        assert!(queue.cancel(waiting));
        assert!(!queue.cancel(waiting));
        match queue.status(waiting) {
            Some(JobStatus::Completed(result)) => {
                assert!(!result.success);
                assert_eq!(result.error_code.as_deref(), Some("JOB_CANCELLED"));
            }
            other => panic!("cancelled job should be completed-with-error, got {:?}", other),
        }

        gate.add_permits(4);
        let result = wait_for_completion(&queue, running).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn retries_reach_exactly_one_terminal_failure() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .error_answer(EvalError::SandboxUnavailable("judge down".into())),
        );
        let queue = EphemeralQueue::new(executor.clone(), fast_config());

        let id = queue.submit(job("doomed"));
        let result = wait_for_completion(&queue, id).await;
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("SANDBOX_UNAVAILABLE"));

        // one attempt per retry round, no duplicate terminal results
        assert_eq!(executor.calls(), 3);
        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processing, 0);
    }

    #[tokio::test]
    async fn hung_evaluation_times_out_and_frees_the_slot() {
        // gate never opens, so every attempt hangs until eval_timeout fires
        let gate = Arc::new(Semaphore::new(0));
        let executor = Arc::new(GatedExecutor::new().with_gate(gate));
        let config = QueueConfig {
            eval_timeout: Duration::from_millis(20),
            ..fast_config()
        };
        let queue = EphemeralQueue::new(executor.clone(), config);

        let id = queue.submit(job("hang"));
        let result = wait_for_completion(&queue, id).await;
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("SANDBOX_UNAVAILABLE"));

        // the timeout takes the retry path, so each round re-enters the executor
        assert_eq!(executor.entered().len(), 3);
        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processing, 0);
    }

    #[tokio::test]
    async fn priority_decays_on_retry() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .answer_for_code("steady", ExecutionOutcome::ok("x".to_string(), 1))
                .error_answer(EvalError::SandboxUnavailable("judge down".into())),
        );
        let config = QueueConfig {
            max_concurrent: 1,
            max_retries: 2,
            // long enough for the test to enqueue a rival mid-retry
            retry_delay: Duration::from_millis(50),
            ..QueueConfig::default()
        };
        let queue = EphemeralQueue::new(executor.clone(), config);

        let mut doomed = job("doomed");
        doomed.priority = 2;
        let doomed_id = queue.submit(doomed);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut steady = job("steady");
        steady.priority = 2;
        let steady_id = queue.submit(steady);

        let result = wait_for_completion(&queue, doomed_id).await;
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("SANDBOX_UNAVAILABLE"));
        let result = wait_for_completion(&queue, steady_id).await;
        assert!(result.success);

        // the requeued job dropped below the equal-priority rival, which
        // would otherwise lose the earlier-submission tie-break
        assert_eq!(
            executor.entered(),
            vec![
                "doomed".to_string(),
                "steady".to_string(),
                "doomed".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .error_answer(EvalError::MalformedSubmission("no code".into())),
        );
        let queue = EphemeralQueue::new(executor.clone(), fast_config());

        let id = queue.submit(job("bad"));
        let result = wait_for_completion(&queue, id).await;
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("MALFORMED_SUBMISSION"));
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn sweep_expires_stale_jobs_and_results() {
        let executor = Arc::new(ScriptedExecutor::new());
        let config = QueueConfig {
            // zero slots keeps the job pending forever
            max_concurrent: 0,
            job_ttl: Duration::ZERO,
            result_ttl: Duration::from_millis(1),
            ..fast_config()
        };
        let queue = EphemeralQueue::new(executor, config);

        let id = queue.submit(job("stuck"));
        assert!(matches!(
            queue.status(id),
            Some(JobStatus::Pending { position: 1, .. })
        ));

        queue.sweep_once();
        match queue.status(id) {
            Some(JobStatus::Completed(result)) => {
                assert!(!result.success);
                assert_eq!(result.error_code.as_deref(), Some("TIME_LIMIT_EXCEEDED"));
            }
            other => panic!("expired job should be a timeout failure, got {:?}", other),
        }

        // second sweep purges the now-expired result
        tokio::time::sleep(Duration::from_millis(2)).await;
        queue.sweep_once();
        assert!(queue.status(id).is_none());
    }
}
