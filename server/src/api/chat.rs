//! `POST /chat`, the single-query endpoint
//!
//! The caller decides whether a web search happens. With `needSearch` the
//! top results are appended to the query as plain context; there is no
//! citation handling here.

use std::sync::Arc;

use hyper::StatusCode;
use serde_json::json;
use sonar_core::prompt::format_search_results;
use sonar_core::search::scrape;
use sonar_core::{ChatRequest, SearchOptions};
use tracing::{error, info};

use crate::error::SonarResult;
use crate::request::RequestData;
use crate::response::SonarResponse;
use crate::state::AppState;

const DEFAULT_PAGES: usize = 3;
const DEFAULT_RETRIES: usize = 2;

fn positive_or(value: i64, default: usize) -> usize {
    if value <= 0 {
        default
    } else {
        usize::try_from(value).unwrap_or(default)
    }
}

pub async fn chat(state: Arc<AppState>, req: RequestData) -> SonarResult<SonarResponse> {
    let chat_req: ChatRequest = match req.json() {
        Ok(chat_req) => chat_req,
        Err(e) => {
            error!("Failed to parse JSON: {}", e);
            return Ok(SonarResponse::error(StatusCode::BAD_REQUEST, "Invalid JSON"));
        }
    };

    if chat_req.query.is_empty() {
        error!("Missing 'query' in request");
        return Ok(SonarResponse::error(
            StatusCode::BAD_REQUEST,
            "Query field required",
        ));
    }

    let pages = positive_or(chat_req.pages, DEFAULT_PAGES);
    let retries = positive_or(chat_req.retries, DEFAULT_RETRIES);
    info!(
        "💬 Received query: {:?} (need_search={}, pages={}, retries={})",
        chat_req.query, chat_req.need_search, pages, retries
    );

    let provider = match state.providers.resolve(&chat_req.provider).await {
        Ok(provider) => provider,
        Err(e) => {
            error!("Invalid LLM provider: {}", e);
            return Ok(SonarResponse::error(StatusCode::BAD_REQUEST, e.to_string()));
        }
    };

    if chat_req.need_search {
        let options = SearchOptions::new(pages, retries);
        let results = scrape(state.search.as_ref(), &chat_req.query, &options).await;
        let context = format_search_results(&results);

        let prompt = format!("{}\n\n{}", chat_req.query, context);
        return Ok(match provider.generate(&prompt).await {
            Ok(response) => SonarResponse::json(json!({
                "decision": "search + LLM call",
                "pages_used": results.len(),
                "response": response,
            })),
            Err(e) => llm_failure(e),
        });
    }

    info!("No search needed, calling LLM directly");
    Ok(match provider.generate(&chat_req.query).await {
        Ok(response) => SonarResponse::json(json!({
            "decision": "direct LLM call",
            "response": response,
        })),
        Err(e) => llm_failure(e),
    })
}

pub(crate) fn llm_failure(e: sonar_core::CoreError) -> SonarResponse {
    error!("LLM call failed: {}", e);
    SonarResponse::error(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("LLM processing error: {}", e),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SonarConfig;
    use crate::state::ApiKeys;
    use bytes::Bytes;
    use http::{HeaderMap, Method, Uri};
    use serde_json::Value;

    fn request(body: &str) -> RequestData {
        RequestData::new(
            Method::POST,
            &Uri::from_static("/chat"),
            HeaderMap::new(),
            Bytes::from(body.to_string()),
            "127.0.0.1:9999".parse().unwrap(),
        )
    }

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(
            SonarConfig::new().test_mode(true),
            ApiKeys::new(),
        ))
    }

    fn body_json(resp: &SonarResponse) -> Value {
        serde_json::from_slice(resp.body_bytes().unwrap()).unwrap()
    }

    #[test]
    fn test_positive_or() {
        assert_eq!(positive_or(0, 3), 3);
        assert_eq!(positive_or(-4, 2), 2);
        assert_eq!(positive_or(5, 3), 5);
    }

    #[tokio::test]
    async fn test_direct_call() {
        let resp = chat(state(), request(r#"{"query": "rust ownership"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        let body = body_json(&resp);
        assert_eq!(body["decision"], "direct LLM call");
        assert!(body["response"].as_str().unwrap().contains("rust ownership"));
    }

    #[tokio::test]
    async fn test_search_call() {
        let resp = chat(
            state(),
            request(r#"{"query": "tokio", "needSearch": true, "pages": 0}"#),
        )
        .await
        .unwrap();
        let body = body_json(&resp);
        assert_eq!(body["decision"], "search + LLM call");
        assert_eq!(body["pages_used"], 3);
        assert!(body["response"].as_str().unwrap().contains("Example Result 1"));
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let resp = chat(state(), request("{nope")).await.unwrap();
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(body_json(&resp)["error"], "Invalid JSON");

        let resp = chat(state(), request(r#"{"query": ""}"#)).await.unwrap();
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(body_json(&resp)["error"], "Query field required");
    }

    #[tokio::test]
    async fn test_llm_error() {
        let resp = chat(state(), request(r#"{"query": "ERROR_TEST"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_json(&resp)["error"]
            .as_str()
            .unwrap()
            .starts_with("LLM processing error"));
    }
}
