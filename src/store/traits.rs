//! Unified `Database` trait — single async interface for all persistence.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::store::model::{
    NewTask, Project, Schedule, Task, TaskStatus, TokenBudget, UsageSummary, Webhook, Worker,
    WorkerStatus,
};

/// Backend-agnostic persistence trait covering the task queue, workers,
/// projects, schedules, the usage ledger, settings, and log lines.
#[async_trait]
pub trait Database: Send + Sync {
    // ── Task queue ──────────────────────────────────────────────────

    /// Insert a task with status `pending`. Returns the new task ID.
    async fn enqueue_task(&self, task: &NewTask) -> Result<i64, StorageError>;

    /// Atomically claim the next pending task for a worker: the single
    /// pending row with the lowest `(priority, created_at)` is flipped to
    /// `running` with the claiming worker recorded. Returns `None` when
    /// the queue is empty. Concurrent callers never receive the same task.
    async fn claim_task(&self, worker_id: i64) -> Result<Option<Task>, StorageError>;

    /// Overwrite a running task's checkpoint and progress.
    async fn save_checkpoint(
        &self,
        task_id: i64,
        output: &str,
        progress: i64,
    ) -> Result<(), StorageError>;

    /// Terminal success transition; sets progress to 100.
    async fn mark_task_done(
        &self,
        task_id: i64,
        output: &str,
        diff: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Result<(), StorageError>;

    /// Terminal failure transition with the captured error text.
    async fn mark_task_failed(&self, task_id: i64, error: &str) -> Result<(), StorageError>;

    /// Set only the status field (used for `limit` and for externally
    /// triggered transitions such as skip/requeue).
    async fn update_task_status(
        &self,
        task_id: i64,
        status: TaskStatus,
    ) -> Result<(), StorageError>;

    /// Reset a `limit` or `failed` task back to `pending`, clearing the
    /// assigned worker so any unit may claim it again.
    async fn requeue_task(&self, task_id: i64) -> Result<(), StorageError>;

    async fn get_task(&self, task_id: i64) -> Result<Task, StorageError>;

    /// All tasks, newest first, optionally filtered by status.
    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, StorageError>;

    /// Pending tasks in claim order (priority, then creation time).
    async fn list_pending_tasks(&self) -> Result<Vec<Task>, StorageError>;

    /// Reset tasks stuck in `running` whose last update is older than
    /// `grace` back to `pending`, preserving their checkpoints. Returns
    /// the number of tasks reset.
    async fn reset_stale_running(&self, grace: Duration) -> Result<usize, StorageError>;

    // ── Workers & projects ──────────────────────────────────────────

    async fn create_worker(&self, worker: &Worker) -> Result<i64, StorageError>;

    async fn get_worker(&self, worker_id: i64) -> Result<Worker, StorageError>;

    async fn list_workers(&self) -> Result<Vec<Worker>, StorageError>;

    async fn update_worker_status(
        &self,
        worker_id: i64,
        status: WorkerStatus,
    ) -> Result<(), StorageError>;

    async fn get_project(&self, project_id: i64) -> Result<Project, StorageError>;

    // ── Token usage ledger ──────────────────────────────────────────

    /// Append one immutable usage row. Rows are never updated in place.
    async fn record_usage(
        &self,
        worker_id: Option<i64>,
        project_id: Option<i64>,
        task_id: Option<i64>,
        input_tokens: i64,
        output_tokens: i64,
        date: &str,
    ) -> Result<(), StorageError>;

    /// Sum of input+output tokens recorded for a worker on a date.
    async fn usage_for_day(&self, worker_id: i64, date: &str) -> Result<i64, StorageError>;

    /// Budget configuration for a worker, if one exists.
    async fn get_budget(&self, worker_id: i64) -> Result<Option<TokenBudget>, StorageError>;

    async fn set_budget(&self, budget: &TokenBudget) -> Result<(), StorageError>;

    /// Per-worker usage aggregates for one date, for reporting.
    async fn usage_summary(&self, date: &str) -> Result<Vec<UsageSummary>, StorageError>;

    // ── Schedules ───────────────────────────────────────────────────

    /// Insert a schedule definition. Returns the new schedule ID.
    async fn create_schedule(&self, schedule: &Schedule) -> Result<i64, StorageError>;

    async fn list_enabled_schedules(&self) -> Result<Vec<Schedule>, StorageError>;

    /// Record a schedule firing: sets `last_run` and the computed `next_run`.
    async fn touch_schedule(
        &self,
        schedule_id: i64,
        last_run: chrono::DateTime<chrono::Utc>,
        next_run: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), StorageError>;

    // ── Webhooks ────────────────────────────────────────────────────

    async fn list_enabled_webhooks(&self) -> Result<Vec<Webhook>, StorageError>;

    // ── Settings ────────────────────────────────────────────────────

    async fn get_setting(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), StorageError>;

    // ── Logs ────────────────────────────────────────────────────────

    /// Append a structured log line. Callers treat this as best-effort.
    async fn append_log(
        &self,
        worker_id: Option<i64>,
        task_id: Option<i64>,
        level: &str,
        message: &str,
    ) -> Result<(), StorageError>;
}
