//! libSQL backend — async `Database` trait implementation.
//!
//! A single connection is reused for all operations; `libsql::Connection`
//! is `Send + Sync` and safe for concurrent async use. The queue claim is
//! a single `UPDATE ... RETURNING` statement so that concurrent claimers
//! serialize on SQLite's write lock and can never take the same row.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::StorageError;
use crate::store::migrations;
use crate::store::model::{
    NewTask, Project, Schedule, Task, TaskStatus, TokenBudget, UsageSummary, Webhook, Worker,
    WorkerStatus,
};
use crate::store::traits::Database;

/// Column list shared by every task SELECT/RETURNING clause.
const TASK_COLUMNS: &str = "id, title, prompt, project_id, worker_id, priority, status, \
     output, diff, checkpoint, progress, input_tokens, output_tokens, \
     template_id, error_message, created_at, updated_at";

const WORKER_COLUMNS: &str =
    "id, name, cli_type, command, work_dir, max_parallel, status, project_id, created_at";

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StorageError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StorageError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        configure_connection(&backend.conn).await?;
        migrations::run_migrations(&backend.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StorageError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StorageError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StorageError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        configure_connection(&backend.conn).await?;
        migrations::run_migrations(&backend.conn).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Per-connection PRAGMAs. libSQL enables `foreign_keys` by default
/// (unlike stock SQLite); the store addresses workers/tasks by id at the
/// claim boundary without requiring a pre-existing parent row, so match
/// the standard SQLite default and leave enforcement off.
async fn configure_connection(conn: &Connection) -> Result<(), StorageError> {
    conn.execute("PRAGMA foreign_keys = OFF", ())
        .await
        .map_err(query_err)?;
    Ok(())
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<i64>` to a libsql Value (NULL when absent).
fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

fn query_err(e: libsql::Error) -> StorageError {
    StorageError::Query(e.to_string())
}

/// Map a row in `TASK_COLUMNS` order to a Task.
fn row_to_task(row: &libsql::Row) -> Result<Task, libsql::Error> {
    let status_str: String = row.get(6)?;
    let created_str: String = row.get(15)?;
    let updated_str: String = row.get(16)?;

    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        prompt: row.get(2)?,
        project_id: row.get::<i64>(3).ok(),
        worker_id: row.get::<i64>(4).ok(),
        priority: row.get(5)?,
        status: TaskStatus::parse(&status_str),
        output: row.get(7)?,
        diff: row.get(8)?,
        checkpoint: row.get(9)?,
        progress: row.get(10)?,
        input_tokens: row.get(11)?,
        output_tokens: row.get(12)?,
        template_id: row.get::<i64>(13).ok(),
        error_message: row.get(14)?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a row in `WORKER_COLUMNS` order to a Worker.
fn row_to_worker(row: &libsql::Row) -> Result<Worker, libsql::Error> {
    let status_str: String = row.get(6)?;
    let created_str: String = row.get(8)?;

    Ok(Worker {
        id: row.get(0)?,
        name: row.get(1)?,
        cli_type: row.get(2)?,
        command: row.get(3)?,
        work_dir: row.get(4)?,
        max_parallel: row.get(5)?,
        status: WorkerStatus::parse(&status_str),
        project_id: row.get::<i64>(7).ok(),
        created_at: parse_datetime(&created_str),
    })
}

async fn collect_tasks(mut rows: libsql::Rows) -> Result<Vec<Task>, StorageError> {
    let mut tasks = Vec::new();
    while let Some(row) = rows.next().await.map_err(query_err)? {
        tasks.push(row_to_task(&row).map_err(query_err)?);
    }
    Ok(tasks)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    // ── Task queue ──────────────────────────────────────────────────

    async fn enqueue_task(&self, task: &NewTask) -> Result<i64, StorageError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO tasks (title, prompt, project_id, worker_id, priority, status,
                                    template_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?8)",
                params![
                    task.title.as_str(),
                    task.prompt.as_str(),
                    opt_int(task.project_id),
                    opt_int(task.worker_id),
                    task.priority,
                    opt_int(task.template_id),
                    now.clone(),
                    now
                ],
            )
            .await
            .map_err(query_err)?;

        Ok(self.conn().last_insert_rowid())
    }

    async fn claim_task(&self, worker_id: i64) -> Result<Option<Task>, StorageError> {
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "UPDATE tasks SET status = 'running', worker_id = ?1, updated_at = ?2
             WHERE id = (
                 SELECT id FROM tasks WHERE status = 'pending'
                 ORDER BY priority ASC, created_at ASC, id ASC
                 LIMIT 1
             )
             RETURNING {TASK_COLUMNS}"
        );

        let mut rows = self
            .conn()
            .query(&sql, params![worker_id, now])
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_task(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn save_checkpoint(
        &self,
        task_id: i64,
        output: &str,
        progress: i64,
    ) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE tasks SET checkpoint = ?1, progress = ?2, updated_at = ?3 WHERE id = ?4",
                params![output, progress, now, task_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn mark_task_done(
        &self,
        task_id: i64,
        output: &str,
        diff: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE tasks
                 SET status = 'done', output = ?1, diff = ?2, input_tokens = ?3,
                     output_tokens = ?4, progress = 100, updated_at = ?5
                 WHERE id = ?6",
                params![output, diff, input_tokens, output_tokens, now, task_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn mark_task_failed(&self, task_id: i64, error: &str) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE tasks SET status = 'failed', error_message = ?1, updated_at = ?2
                 WHERE id = ?3",
                params![error, now, task_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn update_task_status(
        &self,
        task_id: i64,
        status: TaskStatus,
    ) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, task_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn requeue_task(&self, task_id: i64) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn()
            .execute(
                "UPDATE tasks SET status = 'pending', worker_id = NULL, error_message = '',
                                  updated_at = ?1
                 WHERE id = ?2 AND status IN ('limit', 'failed')",
                params![now, task_id],
            )
            .await
            .map_err(query_err)?;

        if changed == 0 {
            return Err(StorageError::NotFound {
                entity: "requeueable task".into(),
                id: task_id,
            });
        }
        Ok(())
    }

    async fn get_task(&self, task_id: i64) -> Result<Task, StorageError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        let mut rows = self
            .conn()
            .query(&sql, params![task_id])
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => row_to_task(&row).map_err(query_err),
            None => Err(StorageError::NotFound {
                entity: "task".into(),
                id: task_id,
            }),
        }
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, StorageError> {
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1 ORDER BY id DESC"
                );
                self.conn()
                    .query(&sql, params![status.as_str()])
                    .await
                    .map_err(query_err)?
            }
            None => {
                let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY id DESC");
                self.conn().query(&sql, ()).await.map_err(query_err)?
            }
        };
        collect_tasks(rows).await
    }

    async fn list_pending_tasks(&self) -> Result<Vec<Task>, StorageError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = 'pending'
             ORDER BY priority ASC, created_at ASC, id ASC"
        );
        let rows = self.conn().query(&sql, ()).await.map_err(query_err)?;
        collect_tasks(rows).await
    }

    async fn reset_stale_running(&self, grace: Duration) -> Result<usize, StorageError> {
        let cutoff = (Utc::now() - chrono::Duration::from_std(grace).unwrap_or_default())
            .to_rfc3339();
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn()
            .execute(
                "UPDATE tasks SET status = 'pending', worker_id = NULL, updated_at = ?1
                 WHERE status = 'running' AND updated_at < ?2",
                params![now, cutoff],
            )
            .await
            .map_err(query_err)?;
        Ok(changed as usize)
    }

    // ── Workers & projects ──────────────────────────────────────────

    async fn create_worker(&self, worker: &Worker) -> Result<i64, StorageError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO workers (name, cli_type, command, work_dir, max_parallel,
                                      status, project_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    worker.name.as_str(),
                    worker.cli_type.as_str(),
                    worker.command.as_str(),
                    worker.work_dir.as_str(),
                    worker.max_parallel,
                    worker.status.as_str(),
                    opt_int(worker.project_id),
                    now
                ],
            )
            .await
            .map_err(query_err)?;

        Ok(self.conn().last_insert_rowid())
    }

    async fn get_worker(&self, worker_id: i64) -> Result<Worker, StorageError> {
        let sql = format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = ?1");
        let mut rows = self
            .conn()
            .query(&sql, params![worker_id])
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => row_to_worker(&row).map_err(query_err),
            None => Err(StorageError::NotFound {
                entity: "worker".into(),
                id: worker_id,
            }),
        }
    }

    async fn list_workers(&self) -> Result<Vec<Worker>, StorageError> {
        let sql = format!("SELECT {WORKER_COLUMNS} FROM workers ORDER BY id ASC");
        let mut rows = self.conn().query(&sql, ()).await.map_err(query_err)?;

        let mut workers = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            workers.push(row_to_worker(&row).map_err(query_err)?);
        }
        Ok(workers)
    }

    async fn update_worker_status(
        &self,
        worker_id: i64,
        status: WorkerStatus,
    ) -> Result<(), StorageError> {
        self.conn()
            .execute(
                "UPDATE workers SET status = ?1 WHERE id = ?2",
                params![status.as_str(), worker_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_project(&self, project_id: i64) -> Result<Project, StorageError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, path, instructions_path, memory_path, created_at
                 FROM projects WHERE id = ?1",
                params![project_id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => {
                let created_str: String = row.get(5).map_err(query_err)?;
                Ok(Project {
                    id: row.get(0).map_err(query_err)?,
                    name: row.get(1).map_err(query_err)?,
                    path: row.get(2).map_err(query_err)?,
                    instructions_path: row.get(3).map_err(query_err)?,
                    memory_path: row.get(4).map_err(query_err)?,
                    created_at: parse_datetime(&created_str),
                })
            }
            None => Err(StorageError::NotFound {
                entity: "project".into(),
                id: project_id,
            }),
        }
    }

    // ── Token usage ledger ──────────────────────────────────────────

    async fn record_usage(
        &self,
        worker_id: Option<i64>,
        project_id: Option<i64>,
        task_id: Option<i64>,
        input_tokens: i64,
        output_tokens: i64,
        date: &str,
    ) -> Result<(), StorageError> {
        self.conn()
            .execute(
                "INSERT INTO token_usage (worker_id, project_id, task_id,
                                          input_tokens, output_tokens, date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    opt_int(worker_id),
                    opt_int(project_id),
                    opt_int(task_id),
                    input_tokens,
                    output_tokens,
                    date
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn usage_for_day(&self, worker_id: i64, date: &str) -> Result<i64, StorageError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COALESCE(SUM(input_tokens + output_tokens), 0)
                 FROM token_usage WHERE worker_id = ?1 AND date = ?2",
                params![worker_id, date],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => row.get(0).map_err(query_err),
            None => Ok(0),
        }
    }

    async fn get_budget(&self, worker_id: i64) -> Result<Option<TokenBudget>, StorageError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT worker_id, daily_limit, yellow_pct, orange_pct, red_pct
                 FROM token_budgets WHERE worker_id = ?1",
                params![worker_id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(TokenBudget {
                worker_id: row.get(0).map_err(query_err)?,
                daily_limit: row.get(1).map_err(query_err)?,
                yellow_pct: row.get(2).map_err(query_err)?,
                orange_pct: row.get(3).map_err(query_err)?,
                red_pct: row.get(4).map_err(query_err)?,
            })),
            None => Ok(None),
        }
    }

    async fn set_budget(&self, budget: &TokenBudget) -> Result<(), StorageError> {
        self.conn()
            .execute(
                "INSERT INTO token_budgets (worker_id, daily_limit, yellow_pct, orange_pct, red_pct)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(worker_id) DO UPDATE SET
                     daily_limit = excluded.daily_limit,
                     yellow_pct = excluded.yellow_pct,
                     orange_pct = excluded.orange_pct,
                     red_pct = excluded.red_pct",
                params![
                    budget.worker_id,
                    budget.daily_limit,
                    budget.yellow_pct,
                    budget.orange_pct,
                    budget.red_pct
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn usage_summary(&self, date: &str) -> Result<Vec<UsageSummary>, StorageError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT worker_id, COALESCE(SUM(input_tokens), 0),
                        COALESCE(SUM(output_tokens), 0)
                 FROM token_usage WHERE date = ?1 GROUP BY worker_id",
                params![date],
            )
            .await
            .map_err(query_err)?;

        let mut summaries = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            summaries.push(UsageSummary {
                worker_id: row.get::<i64>(0).ok(),
                input_tokens: row.get(1).map_err(query_err)?,
                output_tokens: row.get(2).map_err(query_err)?,
                date: date.to_string(),
            });
        }
        Ok(summaries)
    }

    // ── Schedules ───────────────────────────────────────────────────

    async fn create_schedule(&self, schedule: &Schedule) -> Result<i64, StorageError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO schedules (name, cron_expr, task_title, task_prompt,
                                        project_id, worker_id, enabled, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    schedule.name.as_str(),
                    schedule.cron_expr.as_str(),
                    schedule.task_title.as_str(),
                    schedule.task_prompt.as_str(),
                    opt_int(schedule.project_id),
                    opt_int(schedule.worker_id),
                    schedule.enabled as i64,
                    now
                ],
            )
            .await
            .map_err(query_err)?;

        Ok(self.conn().last_insert_rowid())
    }

    async fn list_enabled_schedules(&self) -> Result<Vec<Schedule>, StorageError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, cron_expr, task_title, task_prompt, project_id,
                        worker_id, enabled, last_run, next_run
                 FROM schedules WHERE enabled = 1",
                (),
            )
            .await
            .map_err(query_err)?;

        let mut schedules = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let enabled: i64 = row.get(7).map_err(query_err)?;
            schedules.push(Schedule {
                id: row.get(0).map_err(query_err)?,
                name: row.get(1).map_err(query_err)?,
                cron_expr: row.get(2).map_err(query_err)?,
                task_title: row.get(3).map_err(query_err)?,
                task_prompt: row.get(4).map_err(query_err)?,
                project_id: row.get::<i64>(5).ok(),
                worker_id: row.get::<i64>(6).ok(),
                enabled: enabled != 0,
                last_run: row.get::<String>(8).ok().map(|s| parse_datetime(&s)),
                next_run: row.get::<String>(9).ok().map(|s| parse_datetime(&s)),
            });
        }
        Ok(schedules)
    }

    async fn touch_schedule(
        &self,
        schedule_id: i64,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let next = match next_run {
            Some(t) => libsql::Value::Text(t.to_rfc3339()),
            None => libsql::Value::Null,
        };
        self.conn()
            .execute(
                "UPDATE schedules SET last_run = ?1, next_run = ?2 WHERE id = ?3",
                params![last_run.to_rfc3339(), next, schedule_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Webhooks ────────────────────────────────────────────────────

    async fn list_enabled_webhooks(&self) -> Result<Vec<Webhook>, StorageError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, url, events, enabled FROM webhooks WHERE enabled = 1",
                (),
            )
            .await
            .map_err(query_err)?;

        let mut hooks = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let enabled: i64 = row.get(4).map_err(query_err)?;
            hooks.push(Webhook {
                id: row.get(0).map_err(query_err)?,
                name: row.get(1).map_err(query_err)?,
                url: row.get(2).map_err(query_err)?,
                events: row.get(3).map_err(query_err)?,
                enabled: enabled != 0,
            });
        }
        Ok(hooks)
    }

    // ── Settings ────────────────────────────────────────────────────

    async fn get_setting(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut rows = self
            .conn()
            .query("SELECT value FROM settings WHERE key = ?1", params![key])
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row.get(0).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn()
            .execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Logs ────────────────────────────────────────────────────────

    async fn append_log(
        &self,
        worker_id: Option<i64>,
        task_id: Option<i64>,
        level: &str,
        message: &str,
    ) -> Result<(), StorageError> {
        self.conn()
            .execute(
                "INSERT INTO logs (worker_id, task_id, level, message) VALUES (?1, ?2, ?3, ?4)",
                params![opt_int(worker_id), opt_int(task_id), level, message],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task(title: &str, priority: i64) -> NewTask {
        NewTask {
            title: title.into(),
            prompt: format!("prompt for {title}"),
            priority,
            ..NewTask::default()
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        // Running again against the same connection must be a no-op.
        migrations::run_migrations(&db.conn).await.unwrap();
    }

    #[tokio::test]
    async fn claim_respects_priority_then_fifo() {
        let db = LibSqlBackend::new_memory().await.unwrap();

        let low = db.enqueue_task(&new_task("low", 9)).await.unwrap();
        let urgent = db.enqueue_task(&new_task("urgent", 1)).await.unwrap();
        let urgent_later = db.enqueue_task(&new_task("urgent-later", 1)).await.unwrap();

        let first = db.claim_task(1).await.unwrap().unwrap();
        assert_eq!(first.id, urgent);
        assert_eq!(first.status, TaskStatus::Running);
        assert_eq!(first.worker_id, Some(1));

        let second = db.claim_task(1).await.unwrap().unwrap();
        assert_eq!(second.id, urgent_later);

        let third = db.claim_task(2).await.unwrap().unwrap();
        assert_eq!(third.id, low);

        assert!(db.claim_task(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_claims_never_share_a_task() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        for i in 0..10 {
            db.enqueue_task(&new_task(&format!("t{i}"), 5)).await.unwrap();
        }

        let mut handles = Vec::new();
        for worker in 0..10 {
            let db = Arc::clone(&db);
            handles.push(tokio::spawn(async move { db.claim_task(worker).await }));
        }

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            if let Some(task) = handle.await.unwrap().unwrap() {
                assert!(seen.insert(task.id), "task {} claimed twice", task.id);
            }
        }
        assert_eq!(seen.len(), 10);
    }

    #[tokio::test]
    async fn mark_done_sets_progress_and_tokens() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let id = db.enqueue_task(&new_task("t", 5)).await.unwrap();
        db.claim_task(1).await.unwrap().unwrap();

        db.mark_task_done(id, "hello world", "", 10, 6).await.unwrap();

        let task = db.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(task.progress, 100);
        assert_eq!(task.input_tokens, 10);
        assert_eq!(task.output_tokens, 6);
        assert_eq!(task.output, "hello world");
    }

    #[tokio::test]
    async fn checkpoint_round_trip() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let id = db.enqueue_task(&new_task("t", 5)).await.unwrap();

        db.save_checkpoint(id, "partial output so far", 12).await.unwrap();

        let task = db.get_task(id).await.unwrap();
        assert_eq!(task.checkpoint, "partial output so far");
        assert_eq!(task.progress, 12);
    }

    #[tokio::test]
    async fn requeue_resets_limit_task() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let id = db.enqueue_task(&new_task("t", 5)).await.unwrap();
        db.claim_task(7).await.unwrap().unwrap();
        db.update_task_status(id, TaskStatus::Limit).await.unwrap();

        db.requeue_task(id).await.unwrap();

        let task = db.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.worker_id, None);

        // A pending task cannot be requeued again.
        assert!(db.requeue_task(id).await.is_err());
    }

    #[tokio::test]
    async fn stale_running_sweep_preserves_checkpoint() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let id = db.enqueue_task(&new_task("t", 5)).await.unwrap();
        db.claim_task(1).await.unwrap();
        db.save_checkpoint(id, "progress so far", 40).await.unwrap();

        // Backdate the task so it looks orphaned.
        let old = (Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
        db.conn
            .execute(
                "UPDATE tasks SET updated_at = ?1 WHERE id = ?2",
                params![old, id],
            )
            .await
            .unwrap();

        let reset = db.reset_stale_running(Duration::from_secs(300)).await.unwrap();
        assert_eq!(reset, 1);

        let task = db.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.checkpoint, "progress so far");

        // A freshly claimed task is not swept.
        db.claim_task(1).await.unwrap().unwrap();
        let reset = db.reset_stale_running(Duration::from_secs(300)).await.unwrap();
        assert_eq!(reset, 0);
    }

    #[tokio::test]
    async fn usage_ledger_is_append_only_per_day() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.record_usage(Some(1), None, None, 100, 60, "2026-08-06").await.unwrap();
        db.record_usage(Some(1), None, None, 50, 30, "2026-08-06").await.unwrap();
        db.record_usage(Some(1), None, None, 999, 999, "2026-08-05").await.unwrap();
        db.record_usage(Some(2), None, None, 10, 5, "2026-08-06").await.unwrap();

        assert_eq!(db.usage_for_day(1, "2026-08-06").await.unwrap(), 240);
        assert_eq!(db.usage_for_day(2, "2026-08-06").await.unwrap(), 15);
        assert_eq!(db.usage_for_day(3, "2026-08-06").await.unwrap(), 0);

        let summary = db.usage_summary("2026-08-06").await.unwrap();
        assert_eq!(summary.len(), 2);
    }

    #[tokio::test]
    async fn settings_upsert() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        assert!(db.get_setting("missing").await.unwrap().is_none());

        db.set_setting("poll", "5").await.unwrap();
        db.set_setting("poll", "10").await.unwrap();
        assert_eq!(db.get_setting("poll").await.unwrap().as_deref(), Some("10"));
    }
}
