//! Persistent model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue.
    Pending,
    /// Claimed by an execution unit.
    Running,
    /// Completed successfully.
    Done,
    /// Terminated abnormally.
    Failed,
    /// Deferred after a rate-limit signal; resumable.
    Limit,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Limit => "limit",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "done" => Self::Done,
            "failed" => Self::Failed,
            "limit" => Self::Limit,
            _ => Self::Pending,
        }
    }

    /// Terminal states have no further transitions driven by the daemon.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Limit)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Running,
    Paused,
    Error,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "paused" => Self::Paused,
            "error" => Self::Error,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub prompt: String,
    pub project_id: Option<i64>,
    pub worker_id: Option<i64>,
    /// Lower value = more urgent.
    pub priority: i64,
    pub status: TaskStatus,
    pub output: String,
    pub diff: String,
    /// Partial output captured mid-execution, used to resume.
    #[serde(skip_serializing)]
    pub checkpoint: String,
    pub progress: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub template_id: Option<i64>,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to enqueue a new task.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    #[serde(default)]
    pub title: String,
    pub prompt: String,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub worker_id: Option<i64>,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub template_id: Option<i64>,
}

fn default_priority() -> i64 {
    5
}

/// A configured worker slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: i64,
    pub name: String,
    /// Adapter type tag: "claude", "gemini", or a custom tag.
    pub cli_type: String,
    /// Executable launched for custom adapters (builtins know their own).
    pub command: String,
    pub work_dir: String,
    /// Number of concurrent execution units serving this worker.
    pub max_parallel: i64,
    pub status: WorkerStatus,
    pub project_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A managed project directory with optional context files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub instructions_path: String,
    pub memory_path: String,
    pub created_at: DateTime<Utc>,
}

/// A cron-triggered task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub name: String,
    /// Cron expression with a seconds field (`sec min hour dom mon dow`).
    pub cron_expr: String,
    pub task_title: String,
    pub task_prompt: String,
    pub project_id: Option<i64>,
    pub worker_id: Option<i64>,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

/// One immutable token-usage ledger row.
#[derive(Debug, Clone, Serialize)]
pub struct TokenUsage {
    pub id: i64,
    pub worker_id: Option<i64>,
    pub project_id: Option<i64>,
    pub task_id: Option<i64>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    /// Calendar date (`YYYY-MM-DD`) the usage is aggregated under.
    pub date: String,
}

/// Per-worker daily token budget and alert thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudget {
    pub worker_id: i64,
    pub daily_limit: i64,
    pub yellow_pct: i64,
    pub orange_pct: i64,
    pub red_pct: i64,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            worker_id: 0,
            daily_limit: 1_000_000,
            yellow_pct: 60,
            orange_pct: 80,
            red_pct: 90,
        }
    }
}

/// Per-worker usage aggregate for one day, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub worker_id: Option<i64>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub date: String,
}

/// An outbound webhook subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// Comma-separated event names, or `*` for all.
    pub events: String,
    pub enabled: bool,
}

impl Webhook {
    /// Check whether this webhook subscribes to the given event.
    pub fn matches(&self, event: &str) -> bool {
        self.events
            .split(',')
            .map(str::trim)
            .any(|e| e == "*" || e == event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_round_trip() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Done,
            TaskStatus::Failed,
            TaskStatus::Limit,
        ] {
            assert_eq!(TaskStatus::parse(s.as_str()), s);
        }
        assert_eq!(TaskStatus::parse("garbage"), TaskStatus::Pending);
    }

    #[test]
    fn limit_is_terminal_but_resumable_by_reset() {
        assert!(TaskStatus::Limit.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn webhook_event_matching() {
        let hook = Webhook {
            id: 1,
            name: "ops".into(),
            url: "http://example.com/hook".into(),
            events: "task.complete, task.limit".into(),
            enabled: true,
        };
        assert!(hook.matches("task.complete"));
        assert!(hook.matches("task.limit"));
        assert!(!hook.matches("task.failed"));

        let all = Webhook { events: "*".into(), ..hook };
        assert!(all.matches("anything"));
    }
}
