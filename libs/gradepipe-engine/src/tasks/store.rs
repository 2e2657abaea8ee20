//! Persistence seam for durable grading tasks.
//!
//! The persisted record is the single source of truth for task state.
//! `update_progress` doubles as the worker's cooperative stop
//! observation point: it refuses (returns `false`) once the task has
//! left the processing state, so an externally stopped task is
//! noticed at the next write instead of overwriting its terminal
//! state.

use async_trait::async_trait;
use gradepipe_common::error::EvalError;
use gradepipe_common::redis as keys;
use gradepipe_common::types::{DurableTask, QuestionOutcome, TaskProgress, TaskStatus};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new pending task and register it as the active task
    /// for its (exam, teacher) pair.
    async fn create(&self, task: &DurableTask) -> Result<(), EvalError>;

    async fn get(&self, task_id: &Uuid) -> Result<Option<DurableTask>, EvalError>;

    /// The pending/processing task for an (exam, teacher) pair, if
    /// one exists.
    async fn find_active(
        &self,
        exam_id: &str,
        teacher_id: &str,
    ) -> Result<Option<DurableTask>, EvalError>;

    /// Claim the oldest task that is still pending. Stale queue
    /// entries (stopped or superseded before the worker reached them)
    /// are skipped.
    async fn next_pending(&self) -> Result<Option<DurableTask>, EvalError>;

    /// Pending -> processing. Returns false if the task was no longer
    /// pending.
    async fn set_processing(&self, task_id: &Uuid) -> Result<bool, EvalError>;

    /// Write a progress snapshot. Returns false once the task is no
    /// longer processing.
    async fn update_progress(
        &self,
        task_id: &Uuid,
        progress: &TaskProgress,
    ) -> Result<bool, EvalError>;

    /// Processing -> completed with the full results payload. Returns
    /// false if the task was stopped in the meantime.
    async fn complete(
        &self,
        task_id: &Uuid,
        results: Vec<QuestionOutcome>,
        progress: &TaskProgress,
    ) -> Result<bool, EvalError>;

    /// Mark an active task failed with the given reason. Returns
    /// false if the task was already terminal.
    async fn fail(&self, task_id: &Uuid, reason: &EvalError) -> Result<bool, EvalError>;

    /// Fail every task a previous worker run left in the processing
    /// state. A restarted process cannot resume a half-graded run, so
    /// the record is failed and its (exam, teacher) pair freed for a
    /// fresh task. Returns the reclaimed ids.
    async fn reclaim_processing(&self, reason: &EvalError) -> Result<Vec<Uuid>, EvalError>;
}

fn apply_fail(task: &mut DurableTask, reason: &EvalError) -> bool {
    if !task.status.is_active() {
        return false;
    }
    task.status = TaskStatus::Failed;
    task.error = Some(reason.to_string());
    task.completed_at = Some(Utc::now());
    true
}

fn apply_complete(
    task: &mut DurableTask,
    results: Vec<QuestionOutcome>,
    progress: &TaskProgress,
) -> bool {
    if task.status != TaskStatus::Processing {
        return false;
    }
    task.status = TaskStatus::Completed;
    task.results = results;
    task.progress = progress.clone();
    task.completed_at = Some(Utc::now());
    true
}

// ---------------------------------------------------------------- memory

#[derive(Default)]
struct MemoryState {
    tasks: HashMap<Uuid, DurableTask>,
    pending: VecDeque<Uuid>,
    active: HashMap<(String, String), Uuid>,
}

/// In-memory store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryTaskStore {
    state: Mutex<MemoryState>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutate<F>(&self, task_id: &Uuid, f: F) -> Result<bool, EvalError>
    where
        F: FnOnce(&mut DurableTask) -> bool,
    {
        let mut state = self.state.lock().unwrap();
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| EvalError::TaskNotFound(task_id.to_string()))?;
        let changed = f(task);
        if changed {
            task.updated_at = Utc::now();
        }
        Ok(changed)
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, task: &DurableTask) -> Result<(), EvalError> {
        let mut state = self.state.lock().unwrap();
        state.tasks.insert(task.id, task.clone());
        state.pending.push_back(task.id);
        state.active.insert(
            (task.exam_id.clone(), task.teacher_id.clone()),
            task.id,
        );
        Ok(())
    }

    async fn get(&self, task_id: &Uuid) -> Result<Option<DurableTask>, EvalError> {
        Ok(self.state.lock().unwrap().tasks.get(task_id).cloned())
    }

    async fn find_active(
        &self,
        exam_id: &str,
        teacher_id: &str,
    ) -> Result<Option<DurableTask>, EvalError> {
        let state = self.state.lock().unwrap();
        let id = state
            .active
            .get(&(exam_id.to_string(), teacher_id.to_string()));
        Ok(id
            .and_then(|id| state.tasks.get(id))
            .filter(|task| task.status.is_active())
            .cloned())
    }

    async fn next_pending(&self) -> Result<Option<DurableTask>, EvalError> {
        let mut state = self.state.lock().unwrap();
        while let Some(id) = state.pending.pop_front() {
            match state.tasks.get(&id) {
                Some(task) if task.status == TaskStatus::Pending => {
                    return Ok(Some(task.clone()));
                }
                _ => {
                    debug!(task_id = %id, "skipping stale pending entry");
                }
            }
        }
        Ok(None)
    }

    async fn set_processing(&self, task_id: &Uuid) -> Result<bool, EvalError> {
        self.mutate(task_id, |task| {
            if task.status == TaskStatus::Pending {
                task.status = TaskStatus::Processing;
                true
            } else {
                false
            }
        })
    }

    async fn update_progress(
        &self,
        task_id: &Uuid,
        progress: &TaskProgress,
    ) -> Result<bool, EvalError> {
        self.mutate(task_id, |task| {
            if task.status == TaskStatus::Processing {
                task.progress = progress.clone();
                true
            } else {
                false
            }
        })
    }

    async fn complete(
        &self,
        task_id: &Uuid,
        results: Vec<QuestionOutcome>,
        progress: &TaskProgress,
    ) -> Result<bool, EvalError> {
        self.mutate(task_id, |task| apply_complete(task, results, progress))
    }

    async fn fail(&self, task_id: &Uuid, reason: &EvalError) -> Result<bool, EvalError> {
        self.mutate(task_id, |task| apply_fail(task, reason))
    }

    async fn reclaim_processing(&self, reason: &EvalError) -> Result<Vec<Uuid>, EvalError> {
        let mut state = self.state.lock().unwrap();
        let mut reclaimed = Vec::new();
        for task in state.tasks.values_mut() {
            if task.status == TaskStatus::Processing && apply_fail(task, reason) {
                task.updated_at = Utc::now();
                reclaimed.push(task.id);
            }
        }
        Ok(reclaimed)
    }
}

// ----------------------------------------------------------------- redis

/// Redis-backed store: full JSON records under per-task keys, a
/// pending-id list, and an active-task pointer per (exam, teacher)
/// pair. The singleton worker is the only writer of a processing
/// record, so plain read-modify-write is sufficient.
pub struct RedisTaskStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisTaskStore {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }

    async fn mutate<F>(&self, task_id: &Uuid, f: F) -> Result<bool, EvalError>
    where
        F: FnOnce(&mut DurableTask) -> bool + Send,
    {
        let mut conn = self.conn.clone();
        let mut task = keys::get_task(&mut conn, task_id)
            .await?
            .ok_or_else(|| EvalError::TaskNotFound(task_id.to_string()))?;
        let changed = f(&mut task);
        if changed {
            task.updated_at = Utc::now();
            keys::put_task(&mut conn, &task).await?;
        }
        Ok(changed)
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn create(&self, task: &DurableTask) -> Result<(), EvalError> {
        let mut conn = self.conn.clone();
        keys::put_task(&mut conn, task).await?;
        keys::push_pending(&mut conn, &task.id).await?;
        keys::set_active(&mut conn, &task.exam_id, &task.teacher_id, &task.id).await?;
        Ok(())
    }

    async fn get(&self, task_id: &Uuid) -> Result<Option<DurableTask>, EvalError> {
        let mut conn = self.conn.clone();
        Ok(keys::get_task(&mut conn, task_id).await?)
    }

    async fn find_active(
        &self,
        exam_id: &str,
        teacher_id: &str,
    ) -> Result<Option<DurableTask>, EvalError> {
        let mut conn = self.conn.clone();
        let Some(id) = keys::get_active(&mut conn, exam_id, teacher_id).await? else {
            return Ok(None);
        };
        let task = keys::get_task(&mut conn, &id).await?;
        Ok(task.filter(|t| t.status.is_active()))
    }

    async fn next_pending(&self) -> Result<Option<DurableTask>, EvalError> {
        let mut conn = self.conn.clone();
        while let Some(id) = keys::pop_pending(&mut conn).await? {
            match keys::get_task(&mut conn, &id).await? {
                Some(task) if task.status == TaskStatus::Pending => return Ok(Some(task)),
                _ => {
                    debug!(task_id = %id, "skipping stale pending entry");
                }
            }
        }
        Ok(None)
    }

    async fn set_processing(&self, task_id: &Uuid) -> Result<bool, EvalError> {
        self.mutate(task_id, |task| {
            if task.status == TaskStatus::Pending {
                task.status = TaskStatus::Processing;
                true
            } else {
                false
            }
        })
        .await
    }

    async fn update_progress(
        &self,
        task_id: &Uuid,
        progress: &TaskProgress,
    ) -> Result<bool, EvalError> {
        self.mutate(task_id, |task| {
            if task.status == TaskStatus::Processing {
                task.progress = progress.clone();
                true
            } else {
                false
            }
        })
        .await
    }

    async fn complete(
        &self,
        task_id: &Uuid,
        results: Vec<QuestionOutcome>,
        progress: &TaskProgress,
    ) -> Result<bool, EvalError> {
        self.mutate(task_id, |task| apply_complete(task, results, progress))
            .await
    }

    async fn fail(&self, task_id: &Uuid, reason: &EvalError) -> Result<bool, EvalError> {
        self.mutate(task_id, |task| apply_fail(task, reason)).await
    }

    async fn reclaim_processing(&self, reason: &EvalError) -> Result<Vec<Uuid>, EvalError> {
        let mut conn = self.conn.clone();
        let ids = keys::scan_task_ids(&mut conn).await?;
        let mut reclaimed = Vec::new();
        for id in ids {
            let Some(mut task) = keys::get_task(&mut conn, &id).await? else {
                continue;
            };
            if task.status == TaskStatus::Processing && apply_fail(&mut task, reason) {
                task.updated_at = Utc::now();
                keys::put_task(&mut conn, &task).await?;
                reclaimed.push(id);
            }
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> DurableTask {
        DurableTask::new("exam-1".to_string(), "teacher-1".to_string())
    }

    #[tokio::test]
    async fn claim_transitions_pending_to_processing_once() {
        let store = MemoryTaskStore::new();
        let t = task();
        store.create(&t).await.unwrap();

        let claimed = store.next_pending().await.unwrap().unwrap();
        assert_eq!(claimed.id, t.id);
        assert!(store.set_processing(&t.id).await.unwrap());
        assert!(!store.set_processing(&t.id).await.unwrap());
        assert!(store.next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn progress_updates_refused_after_stop() {
        let store = MemoryTaskStore::new();
        let t = task();
        store.create(&t).await.unwrap();
        store.set_processing(&t.id).await.unwrap();

        let progress = TaskProgress {
            total: 2,
            completed: 1,
            current: Some("Question 2".to_string()),
            submissions_total: 4,
            submissions_completed: 2,
        };
        assert!(store.update_progress(&t.id, &progress).await.unwrap());

        assert!(store.fail(&t.id, &EvalError::TaskStopped).await.unwrap());
        assert!(!store.update_progress(&t.id, &progress).await.unwrap());
        assert!(!store.complete(&t.id, vec![], &progress).await.unwrap());

        let stored = store.get(&t.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        // the snapshot written before the stop is preserved
        assert_eq!(stored.progress.completed, 1);
    }

    #[tokio::test]
    async fn terminal_tasks_cannot_fail_twice() {
        let store = MemoryTaskStore::new();
        let t = task();
        store.create(&t).await.unwrap();

        assert!(store.fail(&t.id, &EvalError::TaskSuperseded).await.unwrap());
        assert!(!store.fail(&t.id, &EvalError::TaskStopped).await.unwrap());

        let stored = store.get(&t.id).await.unwrap().unwrap();
        assert!(stored.error.as_deref().unwrap_or("").contains("superseded"));
    }

    #[tokio::test]
    async fn stale_pending_entries_are_skipped() {
        let store = MemoryTaskStore::new();
        let first = task();
        store.create(&first).await.unwrap();
        let second = DurableTask::new("exam-2".to_string(), "teacher-1".to_string());
        store.create(&second).await.unwrap();

        // first gets stopped before the worker reaches it
        store.fail(&first.id, &EvalError::TaskStopped).await.unwrap();

        let claimed = store.next_pending().await.unwrap().unwrap();
        assert_eq!(claimed.id, second.id);
    }

    #[tokio::test]
    async fn active_lookup_ignores_terminal_tasks() {
        let store = MemoryTaskStore::new();
        let t = task();
        store.create(&t).await.unwrap();

        let active = store.find_active("exam-1", "teacher-1").await.unwrap();
        assert_eq!(active.unwrap().id, t.id);

        store.fail(&t.id, &EvalError::TaskStopped).await.unwrap();
        assert!(store
            .find_active("exam-1", "teacher-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn interrupted_processing_tasks_are_reclaimed() {
        let store = MemoryTaskStore::new();
        let crashed = task();
        store.create(&crashed).await.unwrap();
        store.next_pending().await.unwrap();
        store.set_processing(&crashed.id).await.unwrap();
        // a task the old worker never reached stays queued
        let queued = DurableTask::new("exam-2".to_string(), "teacher-1".to_string());
        store.create(&queued).await.unwrap();

        let reason = EvalError::Storage("grading interrupted by a worker restart".to_string());
        let reclaimed = store.reclaim_processing(&reason).await.unwrap();
        assert_eq!(reclaimed, vec![crashed.id]);

        let stored = store.get(&crashed.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert!(stored.error.as_deref().unwrap_or("").contains("restart"));
        // the pair is free again and queued work survives the reclaim
        assert!(store
            .find_active("exam-1", "teacher-1")
            .await
            .unwrap()
            .is_none());
        let next = store.next_pending().await.unwrap().unwrap();
        assert_eq!(next.id, queued.id);
    }

    #[tokio::test]
    async fn unknown_task_is_task_not_found() {
        let store = MemoryTaskStore::new();
        let err = store
            .set_processing(&Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TASK_NOT_FOUND");
    }
}
