//! Adapter for the Gemini CLI.

use async_trait::async_trait;

use crate::adapters::{version_check, Adapter};
use crate::error::AdapterError;
use crate::limiter;

pub struct GeminiAdapter;

impl GeminiAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for GeminiAdapter {
    fn name(&self) -> &str {
        "Gemini CLI"
    }

    fn cli_type(&self) -> &str {
        "gemini"
    }

    fn command(&self) -> &str {
        "gemini"
    }

    fn limit_keywords(&self) -> Vec<String> {
        limiter::keywords_for("gemini")
            .iter()
            .map(|k| k.to_string())
            .collect()
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        version_check(self.name(), self.command()).await
    }
}
