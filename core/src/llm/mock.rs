use futures::future::BoxFuture;

use super::{LlmOptions, LlmProvider, DEFAULT_OLLAMA_MODEL};
use crate::error::{CoreError, CoreResult};
use crate::models::Message;

/// Marker that makes the mock fail
pub const ERROR_TRIGGER: &str = "ERROR_TEST";

/// Deterministic provider for tests and `TEST_MODE`
#[derive(Debug, Clone, Copy, Default)]
pub struct MockProvider;

impl MockProvider {
    pub fn new() -> Self {
        Self
    }
}

fn mock_error() -> CoreError {
    CoreError::provider("mock", "mock error for testing")
}

impl LlmProvider for MockProvider {
    fn generate<'a>(&'a self, query: &'a str) -> BoxFuture<'a, CoreResult<String>> {
        Box::pin(async move {
            if query.contains(ERROR_TRIGGER) {
                return Err(mock_error());
            }
            Ok(format!(
                "This is a mock response from {} to your query about: {}",
                DEFAULT_OLLAMA_MODEL, query
            ))
        })
    }

    fn generate_with_options<'a>(
        &'a self,
        messages: &'a [Message],
        _options: &'a LlmOptions,
    ) -> BoxFuture<'a, CoreResult<String>> {
        Box::pin(async move {
            if messages.is_empty() {
                return Ok("No input provided".to_string());
            }
            if messages.iter().any(|m| m.content.contains(ERROR_TRIGGER)) {
                return Err(mock_error());
            }

            let query = messages
                .iter()
                .find(|m| m.role == "user")
                .map(|m| match m.content.char_indices().nth(30) {
                    Some((cut, _)) => format!("{}...", &m.content[..cut]),
                    None => m.content.clone(),
                })
                .unwrap_or_else(|| "your query".to_string());

            Ok(format!(
                "This is a mock response from {} to '{}'.",
                DEFAULT_OLLAMA_MODEL, query
            ))
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
