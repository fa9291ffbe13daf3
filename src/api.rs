//! Thin REST surface over the core: enqueue/inspect tasks, user-triggered
//! skip/requeue, worker management, and usage reporting. The dashboard
//! consuming these routes lives elsewhere.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::error::StorageError;
use crate::hub::Hub;
use crate::queue::TaskQueue;
use crate::store::model::{NewTask, Schedule, TaskStatus, Worker, WorkerStatus};
use crate::store::Database;
use crate::worker::WorkerPool;

/// Shared state for all API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<dyn Database>,
    pub queue: TaskQueue,
    pub pool: Arc<WorkerPool>,
    pub hub: Hub,
}

/// Build the REST router (the WebSocket route is merged in by the caller).
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/tasks", post(create_task).get(list_tasks))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/requeue", post(requeue_task))
        .route("/api/tasks/{id}/skip", post(skip_task))
        .route("/api/workers", post(create_worker).get(list_workers))
        .route("/api/workers/{id}/restart", post(restart_worker))
        .route("/api/workers/{id}/pause", post(pause_worker))
        .route("/api/workers/{id}/resume", post(resume_worker))
        .route("/api/schedules", post(create_schedule))
        .route("/api/usage", get(usage))
        .with_state(state)
}

/// API error with an HTTP status.
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { .. } => Self(StatusCode::NOT_FOUND, e.to_string()),
            _ => Self(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }
}

impl From<crate::error::Error> for ApiError {
    fn from(e: crate::error::Error) -> Self {
        match e {
            crate::error::Error::Storage(e) => e.into(),
            other => Self(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn create_task(
    State(state): State<ApiState>,
    Json(task): Json<NewTask>,
) -> Result<impl IntoResponse, ApiError> {
    if task.prompt.is_empty() {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            "prompt must not be empty".into(),
        ));
    }
    let id = state.queue.enqueue(&task).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn list_tasks(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let status = params.get("status").map(|s| TaskStatus::parse(s));
    let tasks = state.db.list_tasks(status).await?;
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.queue.get(id).await?;
    Ok(Json(task))
}

/// Reset a `limit` or `failed` task back to `pending` for a retry. The
/// checkpoint survives, so the next attempt resumes where it stopped.
async fn requeue_task(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.queue.requeue(id).await?;
    Ok(Json(json!({ "id": id, "status": "pending" })))
}

/// Skip a pending task: it is marked failed with a "skipped" note rather
/// than deleted, so it stays inspectable.
async fn skip_task(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.queue.get(id).await?;
    if task.status != TaskStatus::Pending {
        return Err(ApiError(
            StatusCode::CONFLICT,
            format!("task is {}, only pending tasks can be skipped", task.status),
        ));
    }
    state.queue.mark_failed(id, "skipped by user").await?;
    Ok(Json(json!({ "id": id, "status": "failed" })))
}

#[derive(Deserialize)]
struct NewWorker {
    name: String,
    #[serde(default = "default_cli_type")]
    cli_type: String,
    #[serde(default)]
    command: String,
    #[serde(default)]
    work_dir: String,
    #[serde(default = "default_parallel")]
    max_parallel: i64,
    #[serde(default)]
    project_id: Option<i64>,
}

fn default_cli_type() -> String {
    "claude".to_string()
}

fn default_parallel() -> i64 {
    1
}

async fn create_worker(
    State(state): State<ApiState>,
    Json(body): Json<NewWorker>,
) -> Result<impl IntoResponse, ApiError> {
    let command = if body.command.is_empty() {
        body.cli_type.clone()
    } else {
        body.command
    };
    let worker = Worker {
        id: 0,
        name: body.name,
        cli_type: body.cli_type,
        command,
        work_dir: body.work_dir,
        max_parallel: body.max_parallel.max(1),
        status: WorkerStatus::Idle,
        project_id: body.project_id,
        created_at: Utc::now(),
    };
    let id = state.db.create_worker(&worker).await?;
    state.pool.restart_worker(id).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn list_workers(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let workers = state.db.list_workers().await?;
    Ok(Json(workers))
}

async fn restart_worker(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.pool.restart_worker(id).await?;
    Ok(Json(json!({ "id": id, "restarted": true })))
}

/// Pause a worker: its units stay alive but stop claiming tasks. Any task
/// already in flight runs to completion.
async fn pause_worker(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.get_worker(id).await?;
    state.db.update_worker_status(id, WorkerStatus::Paused).await?;
    Ok(Json(json!({ "id": id, "status": "paused" })))
}

async fn resume_worker(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.get_worker(id).await?;
    state.db.update_worker_status(id, WorkerStatus::Idle).await?;
    Ok(Json(json!({ "id": id, "status": "idle" })))
}

#[derive(Deserialize)]
struct NewSchedule {
    name: String,
    cron_expr: String,
    #[serde(default)]
    task_title: String,
    task_prompt: String,
    #[serde(default)]
    project_id: Option<i64>,
    #[serde(default)]
    worker_id: Option<i64>,
}

async fn create_schedule(
    State(state): State<ApiState>,
    Json(body): Json<NewSchedule>,
) -> Result<impl IntoResponse, ApiError> {
    if body.cron_expr.parse::<cron::Schedule>().is_err() {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            format!("invalid cron expression: {}", body.cron_expr),
        ));
    }
    let schedule = Schedule {
        id: 0,
        name: body.name,
        cron_expr: body.cron_expr,
        task_title: body.task_title,
        task_prompt: body.task_prompt,
        project_id: body.project_id,
        worker_id: body.worker_id,
        enabled: true,
        last_run: None,
        next_run: None,
    };
    let id = state.db.create_schedule(&schedule).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn usage(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let date = params
        .get("date")
        .cloned()
        .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());
    let summary = state.db.usage_summary(&date).await?;
    Ok(Json(summary))
}
