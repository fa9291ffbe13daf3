//! Execution unit — the per-slot state machine that processes one task at
//! a time: claim → health check → context build → subprocess streaming →
//! throttle detection → checkpoint → terminal transition.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{Adapter, AdapterRegistry};
use crate::budget::{estimate_tokens, BudgetZone, Governor};
use crate::config::DaemonConfig;
use crate::context::{read_text, BuildOpts, Injector};
use crate::error::{AdapterError, Error, ExecError, Result};
use crate::hub::{Hub, HubMessage, TYPE_RATE_LIMIT, TYPE_TASK_COMPLETE, TYPE_WORKER_STATUS};
use crate::limiter::LimitDetector;
use crate::notify::Dispatcher;
use crate::queue::TaskQueue;
use crate::store::model::{Task, TaskStatus, Worker, WorkerStatus};
use crate::store::Database;

/// Shared dependencies for execution units.
#[derive(Clone)]
pub struct UnitDeps {
    pub db: Arc<dyn Database>,
    pub queue: TaskQueue,
    pub registry: Arc<AdapterRegistry>,
    pub injector: Arc<Injector>,
    pub governor: Arc<Governor>,
    pub hub: Hub,
    pub notify: Arc<Dispatcher>,
    pub config: DaemonConfig,
}

/// How one task execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Clean exit, task marked `done`.
    Completed,
    /// Rate-limit keyword seen; task checkpointed and parked in `limit`.
    Throttled,
    /// Abnormal exit, task marked `failed`.
    Failed,
}

/// One concurrently running instance of the execution state machine,
/// serving a single parallelism slot of a worker.
pub struct ExecutionUnit {
    worker: Worker,
    slot: usize,
    deps: UnitDeps,
}

impl ExecutionUnit {
    pub fn new(worker: Worker, slot: usize, deps: UnitDeps) -> Self {
        Self { worker, slot, deps }
    }

    /// Main loop: claim tasks until cancelled. The loop never stops itself
    /// on task failures — every error path returns to idle polling.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            worker_id = self.worker.id,
            slot = self.slot,
            name = %self.worker.name,
            "Execution unit started"
        );
        if !self.is_paused().await {
            self.set_status(WorkerStatus::Idle).await;
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }

            // A paused worker keeps its units alive but claims nothing.
            if self.is_paused().await {
                sleep_or_cancel(self.deps.config.poll_interval, &cancel).await;
                continue;
            }

            let task = match self.deps.queue.dequeue(self.worker.id).await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    sleep_or_cancel(self.deps.config.poll_interval, &cancel).await;
                    continue;
                }
                Err(e) => {
                    warn!(worker_id = self.worker.id, error = %e, "Dequeue failed");
                    sleep_or_cancel(self.deps.config.error_backoff, &cancel).await;
                    continue;
                }
            };

            self.set_status(WorkerStatus::Running).await;
            let line = format!("Starting task: {}", task.title);
            self.deps
                .hub
                .broadcast_to_worker(self.worker.id, task.id, &line, "info");
            self.log_line(task.id, "info", &line).await;

            match self.execute_task(&task, &cancel).await {
                Ok(outcome) => {
                    debug!(task_id = task.id, ?outcome, "Task finished");
                }
                Err(Error::Exec(ExecError::Cancelled)) => {
                    // Task stays `running`; the startup sweep reconciles it.
                    debug!(task_id = task.id, "Execution cancelled mid-stream");
                }
                Err(e) => {
                    warn!(worker_id = self.worker.id, task_id = task.id, error = %e, "Task error");
                }
            }
            // A pause issued mid-task sticks; otherwise back to idle.
            if !self.is_paused().await {
                self.set_status(WorkerStatus::Idle).await;
            }
        }

        if !self.is_paused().await {
            self.set_status(WorkerStatus::Idle).await;
        }
        info!(worker_id = self.worker.id, slot = self.slot, "Execution unit stopped");
    }

    /// Run one claimed task through health check, context assembly, and
    /// subprocess execution.
    async fn execute_task(&self, task: &Task, cancel: &CancellationToken) -> Result<Outcome> {
        let Some(adapter) = self.deps.registry.get(&self.worker.cli_type) else {
            let msg = format!("unknown CLI type: {}", self.worker.cli_type);
            self.deps.queue.mark_failed(task.id, &msg).await?;
            return Err(AdapterError::UnknownType {
                cli_type: self.worker.cli_type.clone(),
            }
            .into());
        };

        // A down tool fails the task immediately rather than burning a
        // subprocess attempt against it.
        if let Err(e) = adapter.health_check().await {
            let msg = format!("CLI health check failed: {e}");
            self.deps.queue.mark_failed(task.id, &msg).await?;
            self.deps
                .notify
                .send_direct(&format!("❌ Worker {}: {msg}", self.worker.name));
            return Err(e.into());
        }

        let zone = match self.deps.governor.budget_zone(self.worker.id).await {
            Ok(zone) => zone,
            Err(e) => {
                warn!(worker_id = self.worker.id, error = %e, "Budget zone lookup failed");
                BudgetZone::Green
            }
        };
        self.deps.governor.check_budget(self.worker.id).await;

        let (project_instructions, project_memory) = self.load_project_context(task).await;

        let context = self.deps.injector.build_context(&BuildOpts {
            zone,
            skill_name: String::new(),
            project_instructions,
            project_memory,
            checkpoint: task.checkpoint.clone(),
            prompt: task.prompt.clone(),
        });

        // Prompt is handed off via a file path argument, never through
        // shell interpolation.
        let prompt_file = tempfile::Builder::new()
            .prefix("dispatchd-")
            .suffix(".txt")
            .tempfile()
            .map_err(ExecError::PromptFile)?;
        std::fs::write(prompt_file.path(), &context).map_err(ExecError::PromptFile)?;

        self.run_cli(task, adapter.as_ref(), prompt_file.path(), cancel)
            .await
    }

    /// Launch the adapter's command and stream its combined output.
    async fn run_cli(
        &self,
        task: &Task,
        adapter: &dyn Adapter,
        prompt_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let work_dir = if self.worker.work_dir.is_empty() {
            self.deps.config.work_dir.clone()
        } else {
            PathBuf::from(&self.worker.work_dir)
        };

        let mut cmd = Command::new(adapter.command());
        cmd.args(adapter.default_args())
            .arg(prompt_path)
            .current_dir(&work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let msg = format!("failed to start {}: {e}", adapter.command());
                self.deps.queue.mark_failed(task.id, &msg).await?;
                return Err(ExecError::Spawn {
                    command: adapter.command().to_string(),
                    source: e,
                }
                .into());
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::Io(std::io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::Io(std::io::Error::other("stderr not captured")))?;
        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();

        let detector = LimitDetector::from_keywords(adapter.limit_keywords());
        let mut output_lines: Vec<String> = Vec::new();
        let mut hit_limit = false;
        let mut limit_line = String::new();

        let mut flush = tokio::time::interval(self.deps.config.checkpoint_interval);
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        flush.tick().await; // the first tick is immediate; skip it

        let mut out_done = false;
        let mut err_done = false;
        while !(out_done && err_done) {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    // No terminal transition: the task remains `running`
                    // and is reconciled by the startup sweep.
                    return Err(ExecError::Cancelled.into());
                }

                _ = flush.tick() => {
                    let partial = output_lines.join("\n");
                    if let Err(e) = self
                        .deps
                        .queue
                        .save_checkpoint(task.id, &partial, output_lines.len() as i64)
                        .await
                    {
                        warn!(task_id = task.id, error = %e, "Checkpoint save failed");
                    }
                }

                line = out_lines.next_line(), if !out_done => match line {
                    Ok(Some(line)) => {
                        self.handle_line(task, &detector, &mut output_lines,
                                         &mut hit_limit, &mut limit_line, line).await;
                    }
                    Ok(None) => out_done = true,
                    Err(e) => {
                        warn!(task_id = task.id, error = %e, "stdout read error");
                        out_done = true;
                    }
                },

                line = err_lines.next_line(), if !err_done => match line {
                    Ok(Some(line)) => {
                        self.handle_line(task, &detector, &mut output_lines,
                                         &mut hit_limit, &mut limit_line, line).await;
                    }
                    Ok(None) => err_done = true,
                    Err(e) => {
                        warn!(task_id = task.id, error = %e, "stderr read error");
                        err_done = true;
                    }
                },
            }
        }

        let status = child.wait().await.map_err(ExecError::Io)?;
        let full_output = output_lines.join("\n");

        if hit_limit {
            // Everything collected so far survives into the checkpoint, so
            // the retry resumes instead of replaying.
            self.deps
                .queue
                .save_checkpoint(task.id, &full_output, output_lines.len() as i64)
                .await?;
            self.deps
                .queue
                .update_status(task.id, TaskStatus::Limit)
                .await?;

            self.deps.hub.broadcast(
                HubMessage::new(TYPE_RATE_LIMIT, &limit_line)
                    .with_worker(self.worker.id)
                    .with_task(task.id),
            );
            self.deps.notify.send(
                "task.limit",
                serde_json::json!({
                    "worker": self.worker.name,
                    "task": task.title,
                    "line": limit_line,
                }),
            );
            return Ok(Outcome::Throttled);
        }

        if !status.success() {
            let tail = tail_lines(&output_lines, 20);
            let msg = format!("process exited with {status}: {tail}");
            self.deps.queue.mark_failed(task.id, &msg).await?;
            self.deps.notify.send(
                "task.failed",
                serde_json::json!({
                    "worker": self.worker.name,
                    "task": task.title,
                    "error": msg,
                }),
            );
            return Ok(Outcome::Failed);
        }

        let input_est = estimate_tokens(&full_output);
        let output_est = (input_est as f64 * 0.6) as i64;

        self.deps
            .queue
            .mark_done(task.id, &full_output, "", input_est, output_est)
            .await?;

        if let Err(e) = self
            .deps
            .governor
            .record_usage(
                Some(self.worker.id),
                task.project_id,
                Some(task.id),
                input_est,
                output_est,
            )
            .await
        {
            warn!(task_id = task.id, error = %e, "Usage recording failed");
        }

        self.deps.hub.broadcast(
            HubMessage::new(
                TYPE_TASK_COMPLETE,
                format!("Task '{}' completed", task.title),
            )
            .with_worker(self.worker.id)
            .with_task(task.id),
        );
        self.deps.notify.send(
            "task.complete",
            serde_json::json!({
                "worker": self.worker.name,
                "task": task.title,
            }),
        );

        Ok(Outcome::Completed)
    }

    /// Process one streamed output line: broadcast, persist, detect.
    async fn handle_line(
        &self,
        task: &Task,
        detector: &LimitDetector,
        output_lines: &mut Vec<String>,
        hit_limit: &mut bool,
        limit_line: &mut String,
        line: String,
    ) {
        let level = if line.to_lowercase().contains("error") {
            "error"
        } else {
            "info"
        };
        self.deps
            .hub
            .broadcast_to_worker(self.worker.id, task.id, &line, level);
        self.log_line(task.id, level, &line).await;

        if detector.detect(&line) {
            *hit_limit = true;
            *limit_line = line.clone();
        }
        output_lines.push(line);
    }

    /// Load the project's instruction and memory files, if the task is
    /// bound to a project.
    async fn load_project_context(&self, task: &Task) -> (String, String) {
        let Some(project_id) = task.project_id else {
            return (String::new(), String::new());
        };
        match self.deps.db.get_project(project_id).await {
            Ok(project) => (
                read_text(Path::new(&project.instructions_path)),
                read_text(Path::new(&project.memory_path)),
            ),
            Err(e) => {
                debug!(project_id, error = %e, "Project lookup failed");
                (String::new(), String::new())
            }
        }
    }

    async fn is_paused(&self) -> bool {
        matches!(
            self.deps.db.get_worker(self.worker.id).await,
            Ok(w) if w.status == WorkerStatus::Paused
        )
    }

    async fn set_status(&self, status: WorkerStatus) {
        if let Err(e) = self.deps.db.update_worker_status(self.worker.id, status).await {
            warn!(worker_id = self.worker.id, error = %e, "Worker status update failed");
        }
        self.deps.hub.broadcast(
            HubMessage::new(TYPE_WORKER_STATUS, status.as_str()).with_worker(self.worker.id),
        );
    }

    async fn log_line(&self, task_id: i64, level: &str, message: &str) {
        if let Err(e) = self
            .deps
            .db
            .append_log(Some(self.worker.id), Some(task_id), level, message)
            .await
        {
            debug!(task_id, error = %e, "Log write failed");
        }
    }
}

/// Cancellation-aware sleep: returns early when the token fires.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

fn tail_lines(lines: &[String], n: usize) -> String {
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_last_lines() {
        let lines: Vec<String> = (0..30).map(|i| format!("line {i}")).collect();
        let tail = tail_lines(&lines, 20);
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
        assert_eq!(tail_lines(&lines[..3], 20), "line 0\nline 1\nline 2");
    }

    #[tokio::test]
    async fn sleep_or_cancel_returns_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let start = std::time::Instant::now();
        sleep_or_cancel(Duration::from_secs(60), &cancel).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
