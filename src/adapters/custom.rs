//! Generic adapter driven by stored worker configuration.
//!
//! Lets a worker point at any prompt-file-accepting CLI without a code
//! change: the command, extra args, and limit keywords all come from
//! configuration.

use async_trait::async_trait;

use crate::adapters::{version_check, Adapter};
use crate::error::AdapterError;
use crate::store::model::Worker;

pub struct CustomAdapter {
    name: String,
    cli_type: String,
    command: String,
    args: Vec<String>,
    limit_keywords: Vec<String>,
}

impl CustomAdapter {
    pub fn new(
        name: impl Into<String>,
        cli_type: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        limit_keywords: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cli_type: cli_type.into(),
            command: command.into(),
            args,
            limit_keywords,
        }
    }

    /// Build an adapter from a worker row with an unrecognized type tag.
    /// Keywords stay empty here; the detector falls back to its defaults.
    pub fn from_worker(worker: &Worker) -> Self {
        Self::new(
            worker.name.clone(),
            worker.cli_type.clone(),
            worker.command.clone(),
            Vec::new(),
            Vec::new(),
        )
    }
}

#[async_trait]
impl Adapter for CustomAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn cli_type(&self) -> &str {
        &self.cli_type
    }

    fn command(&self) -> &str {
        &self.command
    }

    fn default_args(&self) -> Vec<String> {
        self.args.clone()
    }

    fn limit_keywords(&self) -> Vec<String> {
        self.limit_keywords.clone()
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        version_check(&self.name, &self.command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::WorkerStatus;

    #[test]
    fn from_worker_carries_command() {
        let worker = Worker {
            id: 1,
            name: "local-llm".into(),
            cli_type: "llamacli".into(),
            command: "llama".into(),
            work_dir: String::new(),
            max_parallel: 1,
            status: WorkerStatus::Idle,
            project_id: None,
            created_at: chrono::Utc::now(),
        };
        let adapter = CustomAdapter::from_worker(&worker);
        assert_eq!(adapter.cli_type(), "llamacli");
        assert_eq!(adapter.command(), "llama");
        assert!(adapter.limit_keywords().is_empty());
    }
}
