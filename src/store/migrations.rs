//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::StorageError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS settings (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS projects (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            name              TEXT NOT NULL,
            path              TEXT NOT NULL,
            instructions_path TEXT NOT NULL DEFAULT '',
            memory_path       TEXT NOT NULL DEFAULT '',
            created_at        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS workers (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            name         TEXT NOT NULL,
            cli_type     TEXT NOT NULL DEFAULT 'claude',
            command      TEXT NOT NULL DEFAULT 'claude',
            work_dir     TEXT NOT NULL DEFAULT '',
            max_parallel INTEGER NOT NULL DEFAULT 1,
            status       TEXT NOT NULL DEFAULT 'idle',
            project_id   INTEGER REFERENCES projects(id) ON DELETE SET NULL,
            created_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            title         TEXT NOT NULL DEFAULT '',
            prompt        TEXT NOT NULL,
            project_id    INTEGER REFERENCES projects(id) ON DELETE SET NULL,
            worker_id     INTEGER REFERENCES workers(id) ON DELETE SET NULL,
            priority      INTEGER NOT NULL DEFAULT 5,
            status        TEXT NOT NULL DEFAULT 'pending',
            output        TEXT NOT NULL DEFAULT '',
            diff          TEXT NOT NULL DEFAULT '',
            checkpoint    TEXT NOT NULL DEFAULT '',
            progress      INTEGER NOT NULL DEFAULT 0,
            input_tokens  INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            template_id   INTEGER,
            error_message TEXT NOT NULL DEFAULT '',
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_claim
            ON tasks(status, priority, created_at);

        CREATE TABLE IF NOT EXISTS schedules (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            cron_expr   TEXT NOT NULL,
            task_title  TEXT NOT NULL DEFAULT '',
            task_prompt TEXT NOT NULL,
            project_id  INTEGER REFERENCES projects(id) ON DELETE SET NULL,
            worker_id   INTEGER REFERENCES workers(id) ON DELETE SET NULL,
            enabled     INTEGER NOT NULL DEFAULT 1,
            last_run    TEXT,
            next_run    TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS logs (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            worker_id  INTEGER REFERENCES workers(id) ON DELETE SET NULL,
            task_id    INTEGER REFERENCES tasks(id) ON DELETE SET NULL,
            level      TEXT NOT NULL DEFAULT 'info',
            message    TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_logs_task ON logs(task_id);

        CREATE TABLE IF NOT EXISTS token_usage (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            worker_id     INTEGER REFERENCES workers(id) ON DELETE SET NULL,
            project_id    INTEGER REFERENCES projects(id) ON DELETE SET NULL,
            task_id       INTEGER REFERENCES tasks(id) ON DELETE SET NULL,
            input_tokens  INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            date          TEXT NOT NULL,
            created_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_token_usage_day ON token_usage(worker_id, date);

        CREATE TABLE IF NOT EXISTS token_budgets (
            worker_id   INTEGER PRIMARY KEY REFERENCES workers(id) ON DELETE CASCADE,
            daily_limit INTEGER NOT NULL DEFAULT 1000000,
            yellow_pct  INTEGER NOT NULL DEFAULT 60,
            orange_pct  INTEGER NOT NULL DEFAULT 80,
            red_pct     INTEGER NOT NULL DEFAULT 90
        );

        CREATE TABLE IF NOT EXISTS webhooks (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            name       TEXT NOT NULL,
            url        TEXT NOT NULL,
            events     TEXT NOT NULL DEFAULT '*',
            enabled    INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
    "#,
}];

/// Run all migrations newer than the recorded schema version.
pub async fn run_migrations(conn: &Connection) -> Result<(), StorageError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| StorageError::Migration(format!("create _migrations: {e}")))?;

    let current = current_version(conn).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );

        conn.execute_batch(migration.sql)
            .await
            .map_err(|e| {
                StorageError::Migration(format!(
                    "migration {} ({}): {e}",
                    migration.version, migration.name
                ))
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![migration.version, migration.name],
        )
        .await
        .map_err(|e| StorageError::Migration(format!("record migration: {e}")))?;
    }

    Ok(())
}

async fn current_version(conn: &Connection) -> Result<i64, StorageError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| StorageError::Migration(format!("read version: {e}")))?;

    match rows
        .next()
        .await
        .map_err(|e| StorageError::Migration(format!("read version row: {e}")))?
    {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| StorageError::Migration(format!("decode version: {e}"))),
        None => Ok(0),
    }
}
