//! CLI adapters — pluggable descriptions of the external agent tools.
//!
//! Each adapter knows how to invoke and health-check one tool type. The
//! registry resolves a worker's type tag to its adapter; workers with an
//! unrecognized tag can register a `CustomAdapter` built from their stored
//! configuration.

pub mod claude;
pub mod custom;
pub mod gemini;

pub use claude::ClaudeAdapter;
pub use custom::CustomAdapter;
pub use gemini::GeminiAdapter;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::AdapterError;

/// Timeout for the `--version` health probe.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Capability set every CLI adapter implements.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Human-readable name of this CLI.
    fn name(&self) -> &str;

    /// Type tag used to select this adapter ("claude", "gemini", ...).
    fn cli_type(&self) -> &str;

    /// Executable name, without arguments.
    fn command(&self) -> &str;

    /// CLI flags prepended before the prompt-file argument.
    fn default_args(&self) -> Vec<String> {
        Vec::new()
    }

    /// Rate-limit detection keywords for this CLI's output.
    fn limit_keywords(&self) -> Vec<String>;

    /// Quick probe that the CLI is reachable before burning a task on it.
    async fn health_check(&self) -> Result<(), AdapterError>;
}

/// Run `command --version` to verify the CLI is installed and on PATH.
pub(crate) async fn version_check(name: &str, command: &str) -> Result<(), AdapterError> {
    let probe = tokio::process::Command::new(command)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    let status = tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe)
        .await
        .map_err(|_| AdapterError::HealthCheckTimeout {
            name: name.to_string(),
            timeout: HEALTH_CHECK_TIMEOUT,
        })?
        .map_err(|e| AdapterError::Unavailable {
            name: name.to_string(),
            reason: format!("{command} --version: {e}"),
        })?;

    if !status.success() {
        return Err(AdapterError::Unavailable {
            name: name.to_string(),
            reason: format!("{command} --version exited with {status}"),
        });
    }
    Ok(())
}

/// Registry of adapters keyed by CLI type tag.
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry with the built-in Claude and Gemini adapters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ClaudeAdapter::new()));
        registry.register(Arc::new(GeminiAdapter::new()));
        registry
    }

    /// Add an adapter, replacing any existing one with the same type tag.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.cli_type().to_string(), adapter);
    }

    /// Resolve an adapter by CLI type.
    pub fn get(&self, cli_type: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(cli_type).cloned()
    }

    /// All registered type tags.
    pub fn types(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
