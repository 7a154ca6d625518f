//! Wire models for the chat endpoints
//!
//! `ChatCompletionRequest`/`ChatCompletionResponse` follow the Perplexity
//! Sonar flavour of the OpenAI chat-completions schema: the same shape plus
//! search filters on the way in and a `citations` array on the way out.

use serde::{Deserialize, Serialize};

/// An individual message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new<R: Into<String>, C: Into<String>>(role: R, content: C) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system<C: Into<String>>(content: C) -> Self {
        Self::new("system", content)
    }

    pub fn user<C: Into<String>>(content: C) -> Self {
        Self::new("user", content)
    }

    pub fn assistant<C: Into<String>>(content: C) -> Self {
        Self::new("assistant", content)
    }

    /// `role: content`, the flat form used for token counting and prompts
    pub fn as_line(&self) -> String {
        format!("{}: {}", self.role, self.content)
    }
}

/// Request body of `POST /chat/completions`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_domain_filter: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_recency_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
    /// Accepted for compatibility; images are never returned
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub return_images: bool,
    /// Accepted for compatibility; related questions are never returned
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub return_related_questions: bool,
}

impl ChatCompletionRequest {
    /// Content of the last message sent by the user, if any
    pub fn last_user_query(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user" && !m.content.is_empty())
            .map(|m| m.content.as_str())
    }
}

/// Response object for chat completions (and, with `object =
/// "chat.completion.chunk"`, for each streamed chunk)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub model: String,
    pub object: String,
    pub created: i64,
    #[serde(default)]
    pub citations: Option<Vec<String>>,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatCompletionResponse {
    /// True when at least one citation is attached
    pub fn verify_citations(&self) -> bool {
        self.citations.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Content of the first choice's message, if present
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.as_str())
    }
}

/// A generation choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
}

/// Incremental content when streaming
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Token statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Request body of the legacy `POST /chat` endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default, rename = "needSearch")]
    pub need_search: bool,
    #[serde(default)]
    pub pages: i64,
    #[serde(default)]
    pub retries: i64,
    #[serde(default)]
    pub provider: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_request_uses_camel_case_need_search() {
        let req: ChatRequest = serde_json::from_value(json!({
            "query": "What is the weather like today?",
            "needSearch": true,
            "pages": 3,
            "retries": 2,
            "provider": "openai"
        }))
        .unwrap();

        assert!(req.need_search);
        assert_eq!(req.pages, 3);
        assert_eq!(req.provider, "openai");

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["needSearch"], true);
        assert!(value.get("need_search").is_none());
    }

    #[test]
    fn test_completion_request_optional_fields() {
        let req: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "sonar",
            "messages": [
                {"role": "system", "content": "Be precise and concise."},
                {"role": "user", "content": "What is the weather like today?"}
            ],
            "max_tokens": 100,
            "temperature": 0.7,
            "search_domain_filter": ["weather.com", "-twitter.com"],
            "search_recency_filter": "day",
            "return_related_questions": true
        }))
        .unwrap();

        assert_eq!(req.temperature, Some(0.7));
        assert_eq!(req.top_p, None);
        assert_eq!(req.frequency_penalty, None);
        assert_eq!(req.search_domain_filter.len(), 2);
        assert_eq!(req.search_recency_filter.as_deref(), Some("day"));
        assert!(req.return_related_questions);
        assert!(!req.stream);
        assert_eq!(req.last_user_query(), Some("What is the weather like today?"));

        // unset optionals stay off the wire
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("top_p").is_none());
        assert!(value.get("stream").is_none());
    }

    #[test]
    fn test_last_user_query_picks_latest_user_message() {
        let req = ChatCompletionRequest {
            messages: vec![
                Message::user("first"),
                Message::assistant("answer"),
                Message::user("second"),
                Message::system("note"),
            ],
            ..Default::default()
        };
        assert_eq!(req.last_user_query(), Some("second"));

        let no_user = ChatCompletionRequest {
            messages: vec![Message::system("only system")],
            ..Default::default()
        };
        assert_eq!(no_user.last_user_query(), None);
    }

    #[test]
    fn test_response_citations_serialize_as_null_when_absent() {
        let resp = ChatCompletionResponse {
            id: "resp-123456".to_string(),
            model: "sonar".to_string(),
            object: "chat.completion".to_string(),
            created: 1646156262,
            citations: None,
            choices: vec![Choice {
                index: 0,
                finish_reason: Some("stop".to_string()),
                message: Some(Message::assistant("Sunny, 75°F.")),
                delta: None,
            }],
            usage: Some(Usage::new(15, 12)),
        };

        let value = serde_json::to_value(&resp).unwrap();
        assert!(value["citations"].is_null());
        assert_eq!(value["usage"]["total_tokens"], 27);
        assert!(value["choices"][0].get("delta").is_none());
        assert!(!resp.verify_citations());
        assert_eq!(resp.content(), Some("Sunny, 75°F."));

        let with_citations = ChatCompletionResponse {
            citations: Some(vec!["https://example.com/doc1".to_string()]),
            ..resp
        };
        assert!(with_citations.verify_citations());
    }
}
