//! Daemon configuration, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

/// Runtime configuration for dispatchd.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// HTTP/WebSocket listen port.
    pub port: u16,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory holding persona context files (IDENTITY.md, RULES.md, skills/...).
    pub persona_dir: PathBuf,
    /// Default working directory for workers without their own.
    pub work_dir: PathBuf,
    /// How often an idle execution unit polls the queue.
    pub poll_interval: Duration,
    /// Backoff after a dequeue error before the next poll.
    pub error_backoff: Duration,
    /// How often streamed output is flushed to a checkpoint.
    pub checkpoint_interval: Duration,
    /// Grace period for joining units on shutdown.
    pub shutdown_grace: Duration,
    /// Tasks still `running` but untouched for this long are reset to
    /// `pending` at startup (orphaned claims from a previous process).
    pub stale_task_grace: Duration,
    /// Telegram bot token for outbound notifications (optional).
    pub telegram_token: Option<SecretString>,
    /// Telegram chat ID notifications are sent to.
    pub telegram_chat_id: Option<String>,
}

impl DaemonConfig {
    /// Read configuration from the environment, with defaults for
    /// everything optional.
    pub fn from_env() -> Self {
        let work_dir = env_path("DISPATCHD_WORK_DIR", ".");
        Self {
            port: env_parse("DISPATCHD_PORT", 8080),
            db_path: env_path("DISPATCHD_DB_PATH", "./data/dispatchd.db"),
            persona_dir: std::env::var("DISPATCHD_PERSONA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| work_dir.join("persona")),
            work_dir,
            poll_interval: Duration::from_secs(env_parse("DISPATCHD_POLL_SECS", 5)),
            error_backoff: Duration::from_secs(env_parse("DISPATCHD_BACKOFF_SECS", 10)),
            checkpoint_interval: Duration::from_secs(env_parse("DISPATCHD_CHECKPOINT_SECS", 60)),
            shutdown_grace: Duration::from_secs(env_parse("DISPATCHD_SHUTDOWN_GRACE_SECS", 30)),
            stale_task_grace: Duration::from_secs(env_parse("DISPATCHD_STALE_TASK_SECS", 300)),
            telegram_token: std::env::var("TELEGRAM_BOT_TOKEN")
                .ok()
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
            telegram_chat_id: std::env::var("TELEGRAM_CHAT_ID")
                .ok()
                .filter(|c| !c.is_empty()),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./data/dispatchd.db"),
            persona_dir: PathBuf::from("./persona"),
            work_dir: PathBuf::from("."),
            poll_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(10),
            checkpoint_interval: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(30),
            stale_task_grace: Duration::from_secs(300),
            telegram_token: None,
            telegram_chat_id: None,
        }
    }
}

fn env_path(key: &str, fallback: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(fallback))
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = DaemonConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.checkpoint_interval, Duration::from_secs(60));
        assert!(cfg.telegram_token.is_none());
    }
}
