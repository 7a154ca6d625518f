use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::{LlmOptions, LlmProvider, LlmSettings};
use crate::error::{CoreError, CoreResult};
use crate::models::Message;

const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

#[derive(Debug, Serialize, PartialEq)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

fn build_request<'a>(
    model: &'a str,
    messages: &'a [Message],
    options: &LlmOptions,
) -> MessagesRequest<'a> {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| m.content.as_str())
        .collect();
    let wire = messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| WireMessage {
            role: if m.role == "assistant" { "assistant" } else { "user" },
            content: &m.content,
        })
        .collect();

    MessagesRequest {
        model,
        messages: wire,
        system: (!system.is_empty()).then(|| system.join("\n\n")),
        max_tokens: if options.max_tokens > 0 {
            options.max_tokens
        } else {
            1024
        },
        temperature: options.temperature,
        top_p: options.top_p,
        top_k: (options.top_k > 0).then_some(options.top_k),
    }
}

/// Anthropic Messages API
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Fails with `NotConfigured` when no API key is set
    pub fn new(settings: &LlmSettings) -> CoreResult<Self> {
        let api_key = settings
            .anthropic_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CoreError::NotConfigured("ANTHROPIC_API_KEY".to_string()))?;
        Ok(Self {
            api_key,
            model: settings.anthropic_model.clone(),
            base_url: settings.anthropic_base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl LlmProvider for AnthropicProvider {
    fn generate_with_options<'a>(
        &'a self,
        messages: &'a [Message],
        options: &'a LlmOptions,
    ) -> BoxFuture<'a, CoreResult<String>> {
        Box::pin(async move {
            let request = build_request(&self.model, messages, options);
            let response = self
                .client
                .post(format!("{}/v1/messages", self.base_url))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(CoreError::provider(
                    "Anthropic",
                    format!("API error {}: {}", status, body),
                ));
            }

            let reply: MessagesResponse = response.json().await?;
            let text: String = reply
                .content
                .into_iter()
                .filter(|block| block.kind == "text")
                .map(|block| block.text)
                .collect();
            if text.is_empty() {
                return Err(CoreError::provider("Anthropic", "no content in response"));
            }
            Ok(text)
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        assert!(matches!(
            AnthropicProvider::new(&LlmSettings::default()),
            Err(CoreError::NotConfigured(_))
        ));
        let provider = AnthropicProvider::new(&LlmSettings {
            anthropic_api_key: Some("key".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(provider.model(), "claude-3-opus-20240229");
    }

    #[test]
    fn test_system_messages_move_to_system_field() {
        let messages = vec![
            Message::system("Be precise."),
            Message::user("What is Rust?"),
            Message::assistant("A language."),
            Message::system("Search results: ..."),
        ];
        let request = build_request("claude", &messages, &LlmOptions::default());
        assert_eq!(
            request.system.as_deref(),
            Some("Be precise.\n\nSearch results: ...")
        );
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "user");
        assert_eq!(request.messages[1].role, "assistant");
        assert_eq!(request.max_tokens, 1024);
        assert!(request.top_k.is_none());

        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("top_k").is_none());
    }

    #[test]
    fn test_no_system_field_without_system_messages() {
        let messages = vec![Message::user("hi")];
        let options = LlmOptions {
            max_tokens: 0,
            top_k: 40,
            ..Default::default()
        };
        let request = build_request("claude", &messages, &options);
        assert!(request.system.is_none());
        assert_eq!(request.max_tokens, 1024);
        assert_eq!(request.top_k, Some(40));
    }
}
