//! Poll-friendly status documents.
//!
//! Stateless translation from internal job/task state to the wire
//! shapes callers poll. Scheduler internals (retry counters, priority)
//! never leak; callers see only position, estimated time, progress
//! and errors.

use crate::queue::JobStatus;
use chrono::{DateTime, Utc};
use gradepipe_common::types::{DurableTask, EvaluationReport, QuestionOutcome, TaskStatus};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Pending,
    Processing,
    Completed,
    NotFound,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusDoc {
    pub status: JobPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    /// Rough seconds until the job starts, derived from queue position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<EvaluationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl JobStatusDoc {
    pub fn from_queue(status: Option<JobStatus>) -> Self {
        match status {
            None => Self {
                status: JobPhase::NotFound,
                position: None,
                estimated_time: None,
                result: None,
                error: None,
                error_code: None,
            },
            Some(JobStatus::Pending {
                position,
                estimated_secs,
            }) => Self {
                status: JobPhase::Pending,
                position: Some(position),
                estimated_time: Some(estimated_secs),
                result: None,
                error: None,
                error_code: None,
            },
            Some(JobStatus::Processing) => Self {
                status: JobPhase::Processing,
                position: None,
                estimated_time: None,
                result: None,
                error: None,
                error_code: None,
            },
            Some(JobStatus::Completed(result)) => Self {
                status: JobPhase::Completed,
                position: None,
                estimated_time: None,
                result: result.report,
                error: result.error,
                error_code: result.error_code,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDoc {
    pub total: u32,
    pub completed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    pub percentage: u32,
    pub submissions_total: u32,
    pub submissions_completed: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusDoc {
    pub task_id: Uuid,
    pub exam_id: String,
    pub status: TaskStatus,
    pub progress: ProgressDoc,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<QuestionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<DurableTask> for TaskStatusDoc {
    fn from(task: DurableTask) -> Self {
        let percentage = if task.progress.total == 0 {
            0
        } else {
            ((task.progress.completed as f64 / task.progress.total as f64) * 100.0).round()
                as u32
        };
        Self {
            task_id: task.id,
            exam_id: task.exam_id,
            status: task.status,
            progress: ProgressDoc {
                total: task.progress.total,
                completed: task.progress.completed,
                current: task.progress.current,
                percentage,
                submissions_total: task.progress.submissions_total,
                submissions_completed: task.progress.submissions_completed,
            },
            results: task.results,
            error: task.error,
            created_at: task.created_at,
            updated_at: task.updated_at,
            completed_at: task.completed_at,
        }
    }
}
