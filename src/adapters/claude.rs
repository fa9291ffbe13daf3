//! Adapter for the Claude Code CLI.

use async_trait::async_trait;

use crate::adapters::{version_check, Adapter};
use crate::error::AdapterError;
use crate::limiter;

pub struct ClaudeAdapter;

impl ClaudeAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for ClaudeAdapter {
    fn name(&self) -> &str {
        "Claude Code"
    }

    fn cli_type(&self) -> &str {
        "claude"
    }

    fn command(&self) -> &str {
        "claude"
    }

    fn default_args(&self) -> Vec<String> {
        vec!["--dangerously-skip-permissions".to_string()]
    }

    fn limit_keywords(&self) -> Vec<String> {
        limiter::keywords_for("claude")
            .iter()
            .map(|k| k.to_string())
            .collect()
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        version_check(self.name(), self.command()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity() {
        let a = ClaudeAdapter::new();
        assert_eq!(a.cli_type(), "claude");
        assert_eq!(a.command(), "claude");
        assert!(a.limit_keywords().contains(&"429".to_string()));
    }
}
