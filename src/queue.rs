//! Task queue — priority-ordered, persistent, atomic claim semantics.
//!
//! Thin typed facade over the store. Ordering contract: strict priority
//! ascending, ties broken by earliest creation time (FIFO within a
//! priority class). The claim itself is atomic at the store layer, so two
//! concurrent execution units can never take the same task.

use std::sync::Arc;

use tracing::debug;

use crate::error::StorageError;
use crate::store::model::{NewTask, Task, TaskStatus};
use crate::store::Database;

/// Persistent priority task queue.
#[derive(Clone)]
pub struct TaskQueue {
    db: Arc<dyn Database>,
}

impl TaskQueue {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Insert a task with status `pending`. Returns the new task ID.
    pub async fn enqueue(&self, task: &NewTask) -> Result<i64, StorageError> {
        let id = self.db.enqueue_task(task).await?;
        debug!(task_id = id, priority = task.priority, "Task enqueued");
        Ok(id)
    }

    /// Atomically claim the next pending task for a worker, transitioning
    /// it to `running`. Returns `None` when the queue is empty.
    pub async fn dequeue(&self, worker_id: i64) -> Result<Option<Task>, StorageError> {
        self.db.claim_task(worker_id).await
    }

    /// Save intermediate output and progress for a running task.
    pub async fn save_checkpoint(
        &self,
        task_id: i64,
        output: &str,
        progress: i64,
    ) -> Result<(), StorageError> {
        self.db.save_checkpoint(task_id, output, progress).await
    }

    /// Terminal success transition; sets progress to 100.
    pub async fn mark_done(
        &self,
        task_id: i64,
        output: &str,
        diff: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Result<(), StorageError> {
        self.db
            .mark_task_done(task_id, output, diff, input_tokens, output_tokens)
            .await
    }

    /// Terminal failure transition with the captured error text.
    pub async fn mark_failed(&self, task_id: i64, error: &str) -> Result<(), StorageError> {
        self.db.mark_task_failed(task_id, error).await
    }

    /// Set only the status field (the `limit` transition, skip, requeue).
    pub async fn update_status(
        &self,
        task_id: i64,
        status: TaskStatus,
    ) -> Result<(), StorageError> {
        self.db.update_task_status(task_id, status).await
    }

    /// Reset a `limit` or `failed` task to `pending` for a retry; the
    /// checkpoint survives, so the next run resumes rather than replays.
    pub async fn requeue(&self, task_id: i64) -> Result<(), StorageError> {
        self.db.requeue_task(task_id).await
    }

    pub async fn get(&self, task_id: i64) -> Result<Task, StorageError> {
        self.db.get_task(task_id).await
    }

    /// Pending tasks in claim order.
    pub async fn list_pending(&self) -> Result<Vec<Task>, StorageError> {
        self.db.list_pending_tasks().await
    }
}
