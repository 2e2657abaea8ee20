mod handlers;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use gradepipe_engine::queue::{EphemeralQueue, QueueConfig};
use gradepipe_engine::sandbox::{LocalRunner, RemoteJudge, SandboxExecutor};
use gradepipe_engine::storage::{ExamStore, MemoryExamStore};
use gradepipe_engine::tasks::{DurableQueue, MemoryTaskStore, RedisTaskStore, TaskQueueConfig, TaskStore};
use redis::aio::ConnectionManager;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<EphemeralQueue>,
    pub tasks: Arc<DurableQueue>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("gradepipe server booting...");

    let executor = build_executor().await?;
    let task_store = build_task_store().await?;
    let exam_store = build_exam_store()?;

    let queue = Arc::new(EphemeralQueue::new(
        Arc::clone(&executor),
        QueueConfig::default(),
    ));
    queue.start();

    let tasks = Arc::new(DurableQueue::new(
        task_store,
        exam_store,
        executor,
        TaskQueueConfig::default(),
    ));
    tasks.start();

    let state = Arc::new(AppState {
        queue: Arc::clone(&queue),
        tasks: Arc::clone(&tasks),
    });

    let app = Router::new()
        .route("/api/evaluate/submit", post(handlers::submit_job))
        .route("/api/evaluate/status/:job_id", get(handlers::job_status))
        .route("/api/evaluate/cancel/:job_id", post(handlers::cancel_job))
        .route("/api/evaluate/stats", get(handlers::queue_stats))
        .route("/api/tasks", post(handlers::enqueue_task))
        .route("/api/tasks/:task_id", get(handlers::task_status))
        .route("/api/tasks/:task_id/stop", post(handlers::stop_task))
        .route("/health", get(handlers::health_check))
        .with_state(state);

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    tasks.shutdown();
    queue.shutdown();
    Ok(())
}

/// JUDGE_URL selects the remote judge strategy; otherwise submissions
/// run through the local compile-and-run sandbox.
async fn build_executor() -> anyhow::Result<Arc<dyn SandboxExecutor>> {
    match std::env::var("JUDGE_URL") {
        Ok(url) => {
            let api_key = std::env::var("JUDGE_API_KEY").ok();
            let judge = RemoteJudge::new(&url, api_key);
            if !judge.health().await {
                anyhow::bail!("judge at {} failed health check", url);
            }
            info!("using remote judge at {}", url);
            Ok(Arc::new(judge))
        }
        Err(_) => {
            info!("JUDGE_URL not set, using local sandbox runner");
            Ok(Arc::new(LocalRunner::new()))
        }
    }
}

/// REDIS_URL selects the restart-safe Redis task store; without it,
/// tasks live in process memory only.
async fn build_task_store() -> anyhow::Result<Arc<dyn TaskStore>> {
    match std::env::var("REDIS_URL") {
        Ok(url) => {
            let client =
                redis::Client::open(url.as_str()).context("failed to create Redis client")?;
            let conn = ConnectionManager::new(client)
                .await
                .context("failed to connect to Redis")?;
            info!("connected to Redis: {}", url);
            Ok(Arc::new(RedisTaskStore::new(conn)))
        }
        Err(_) => {
            info!("REDIS_URL not set, durable tasks held in memory");
            Ok(Arc::new(MemoryTaskStore::new()))
        }
    }
}

fn build_exam_store() -> anyhow::Result<Arc<dyn ExamStore>> {
    match std::env::var("EXAM_DATA") {
        Ok(path) => {
            let store = MemoryExamStore::from_json_file(Path::new(&path))
                .with_context(|| format!("failed to load exam data from {}", path))?;
            info!("loaded exam data from {}", path);
            Ok(Arc::new(store))
        }
        Err(_) => {
            info!("EXAM_DATA not set, starting with an empty exam store");
            Ok(Arc::new(MemoryExamStore::new()))
        }
    }
}
