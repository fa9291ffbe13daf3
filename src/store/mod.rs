//! Persistence layer — SQLite-backed storage for tasks, workers, and usage.

pub mod libsql_backend;
pub mod migrations;
pub mod model;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use model::{
    NewTask, Project, Schedule, Task, TaskStatus, TokenBudget, TokenUsage, UsageSummary, Webhook,
    Worker, WorkerStatus,
};
pub use traits::Database;
