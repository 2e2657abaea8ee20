// HTTP route handlers for the gradepipe server

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use gradepipe_common::error::EvalError;
use gradepipe_common::types::{EvalJob, Language, TestCase, PRIORITY_NORMAL};
use gradepipe_engine::status::{JobStatusDoc, TaskStatusDoc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub exam_id: String,
    pub student_id: String,
    pub code: String,
    pub language: Language,
    pub test_cases: Vec<TestCaseInput>,
    #[serde(default)]
    pub high_priority: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseInput {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueTaskRequest {
    pub exam_id: String,
    pub teacher_id: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueTaskResponse {
    pub task_id: Uuid,
}

fn bad_request(message: &str) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": message,
            "code": EvalError::MalformedSubmission(String::new()).code(),
        })),
    )
        .into_response()
}

fn storage_error(err: &EvalError) -> axum::response::Response {
    error!(error = %err, "storage failure");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "error": err.to_string(),
            "code": err.code(),
        })),
    )
        .into_response()
}

/// POST /api/evaluate/submit - enqueue one submission for evaluation
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> impl IntoResponse {
    if payload.code.trim().is_empty() {
        return bad_request("code must not be empty");
    }
    if payload.test_cases.is_empty() {
        return bad_request("at least one test case is required");
    }

    let test_cases: Vec<TestCase> = payload
        .test_cases
        .into_iter()
        .map(|tc| TestCase {
            input: tc.input,
            expected_output: tc.expected_output,
            description: tc.description,
        })
        .collect();

    let job = EvalJob::new(
        payload.exam_id,
        payload.student_id,
        payload.code,
        payload.language,
        test_cases,
        PRIORITY_NORMAL,
    );
    let job_id = if payload.high_priority {
        state.queue.submit_high_priority(job)
    } else {
        state.queue.submit(job)
    };

    (StatusCode::ACCEPTED, Json(SubmitResponse { job_id })).into_response()
}

/// GET /api/evaluate/status/{job_id} - poll a job's status document
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = Uuid::parse_str(&job_id) else {
        return bad_request("invalid job id");
    };
    let status = state.queue.status(id);
    let code = if status.is_some() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (code, Json(JobStatusDoc::from_queue(status))).into_response()
}

/// POST /api/evaluate/cancel/{job_id} - cancel a still-pending job
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = Uuid::parse_str(&job_id) else {
        return bad_request("invalid job id");
    };
    let cancelled = state.queue.cancel(id);
    (
        StatusCode::OK,
        Json(serde_json::json!({ "cancelled": cancelled })),
    )
        .into_response()
}

/// GET /api/evaluate/stats - queue depth counters
pub async fn queue_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.queue.stats()))
}

/// POST /api/tasks - enqueue a bulk grading run
pub async fn enqueue_task(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EnqueueTaskRequest>,
) -> impl IntoResponse {
    if payload.exam_id.trim().is_empty() || payload.teacher_id.trim().is_empty() {
        return bad_request("examId and teacherId are required");
    }
    match state
        .tasks
        .enqueue(&payload.exam_id, &payload.teacher_id, payload.force)
        .await
    {
        Ok(task_id) => {
            info!(task_id = %task_id, exam_id = %payload.exam_id, "task enqueued via API");
            (StatusCode::ACCEPTED, Json(EnqueueTaskResponse { task_id })).into_response()
        }
        Err(err) => storage_error(&err),
    }
}

/// GET /api/tasks/{task_id} - poll a grading task
pub async fn task_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = Uuid::parse_str(&task_id) else {
        return bad_request("invalid task id");
    };
    match state.tasks.status(&id).await {
        Ok(Some(task)) => (StatusCode::OK, Json(TaskStatusDoc::from(task))).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": format!("task not found: {}", id),
                "code": EvalError::TaskNotFound(String::new()).code(),
            })),
        )
            .into_response(),
        Err(err) => storage_error(&err),
    }
}

/// POST /api/tasks/{task_id}/stop - request cooperative abort
pub async fn stop_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = Uuid::parse_str(&task_id) else {
        return bad_request("invalid task id");
    };
    match state.tasks.stop(&id).await {
        Ok(stopped) => (
            StatusCode::OK,
            Json(serde_json::json!({ "stopped": stopped })),
        )
            .into_response(),
        Err(EvalError::TaskNotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": format!("task not found: {}", id),
                "code": EvalError::TaskNotFound(String::new()).code(),
            })),
        )
            .into_response(),
        Err(err) => storage_error(&err),
    }
}

/// GET /health - liveness probe
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
