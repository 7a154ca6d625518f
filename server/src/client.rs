//! HTTP client for a running Open Sonar server

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use sonar_core::{ChatCompletionRequest, ChatCompletionResponse};
use tracing::debug;

use crate::error::{SonarError, SonarResult};

/// Talks to the `/chat` and `/chat/completions` endpoints
#[derive(Debug, Clone)]
pub struct SonarClient {
    base_url: String,
    auth_token: String,
    http: reqwest::Client,
}

impl SonarClient {
    pub fn new<U: Into<String>, T: Into<String>>(base_url: U, auth_token: T) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: auth_token.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Single query through `POST /chat`
    pub async fn chat(&self, query: &str, need_search: bool) -> SonarResult<Value> {
        self.post(
            "/chat",
            &json!({
                "query": query,
                "needSearch": need_search,
            }),
        )
        .await
    }

    /// `POST /chat/completions`. Streaming requests are not supported here.
    pub async fn chat_completions(
        &self,
        request: &ChatCompletionRequest,
    ) -> SonarResult<ChatCompletionResponse> {
        if request.stream {
            return Err(SonarError::Http(
                "streaming requests are not supported by SonarClient".to_string(),
            ));
        }
        self.post("/chat/completions", request).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> SonarResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.auth_token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SonarError::Client {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}
