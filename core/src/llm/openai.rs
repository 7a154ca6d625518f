use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::{LlmOptions, LlmProvider, LlmSettings};
use crate::error::{CoreError, CoreResult};
use crate::models::Message;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f64,
    top_p: f64,
}

#[derive(Debug, Serialize, PartialEq)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: Message,
}

/// Roles OpenAI accepts; anything else is sent as `user`
fn wire_role(role: &str) -> &str {
    match role {
        "system" | "user" | "assistant" => role,
        _ => "user",
    }
}

/// OpenAI chat completions
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Fails with `NotConfigured` when no API key is set
    pub fn new(settings: &LlmSettings) -> CoreResult<Self> {
        let api_key = settings
            .openai_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CoreError::NotConfigured("OPENAI_API_KEY".to_string()))?;
        Ok(Self {
            api_key,
            model: settings.openai_model.clone(),
            base_url: settings.openai_base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl LlmProvider for OpenAiProvider {
    fn generate_with_options<'a>(
        &'a self,
        messages: &'a [Message],
        options: &'a LlmOptions,
    ) -> BoxFuture<'a, CoreResult<String>> {
        Box::pin(async move {
            let request = CompletionRequest {
                model: &self.model,
                messages: messages
                    .iter()
                    .map(|m| WireMessage {
                        role: wire_role(&m.role),
                        content: &m.content,
                    })
                    .collect(),
                max_tokens: (options.max_tokens > 0).then_some(options.max_tokens),
                temperature: options.temperature,
                top_p: options.top_p,
            };

            let response = self
                .client
                .post(format!("{}/v1/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(CoreError::provider(
                    "OpenAI",
                    format!("API error {}: {}", status, body),
                ));
            }

            let completion: CompletionResponse = response.json().await?;
            completion
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| CoreError::provider("OpenAI", "no response from OpenAI"))
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}
