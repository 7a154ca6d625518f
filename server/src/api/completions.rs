//! `POST /chat/completions`, the Sonar compatible endpoint
//!
//! Models whose name starts with `sonar` are answered from a web search:
//! results are ranked, the best eight become a numbered system prompt and
//! their URLs come back as `citations`. Any other model name is forwarded
//! to the matching backend as is.

use std::sync::Arc;

use hyper::StatusCode;
use sonar_core::citations::extract_citation_urls;
use sonar_core::prompt::{search_prompt, NO_RESULTS_NOTE};
use sonar_core::search::{rank_by_relevance, scrape};
use sonar_core::utils::{generate_id, simple_token_count};
use sonar_core::{
    ChatCompletionRequest, ChatCompletionResponse, Choice, LlmOptions, Message, SearchOptions,
    Usage,
};
use tracing::{error, info, warn};

use super::chat::llm_failure;
use super::streaming::{stream_completion, ChunkStreamer};
use crate::error::SonarResult;
use crate::logging::Timer;
use crate::request::RequestData;
use crate::response::{Json, SonarResponse};
use crate::state::AppState;

pub const DEFAULT_MODEL: &str = "sonar";

/// Results kept after ranking
pub const MAX_SEARCH_RESULTS: usize = 8;

/// True for model names that trigger a web search
pub fn is_search_model(model: &str) -> bool {
    model.starts_with("sonar")
}

/// Sampling options with the endpoint's defaults filled in
pub fn llm_options(req: &ChatCompletionRequest) -> LlmOptions {
    let defaults = LlmOptions::default();
    let max_tokens = req
        .max_tokens
        .filter(|n| *n > 0)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(defaults.max_tokens);
    let frequency_penalty = match (req.frequency_penalty, req.presence_penalty) {
        (Some(f), _) => f,
        (None, None) => defaults.frequency_penalty,
        (None, Some(_)) => 0.0,
    };

    LlmOptions {
        max_tokens,
        temperature: req.temperature.unwrap_or(defaults.temperature),
        top_p: req.top_p.unwrap_or(defaults.top_p),
        top_k: req.top_k.unwrap_or(0),
        presence_penalty: req.presence_penalty.unwrap_or(0.0),
        frequency_penalty,
    }
}

/// Search for `query` and extend `messages` with the search system prompt.
/// Returns the citation URLs, if any.
async fn add_search_context(
    state: &AppState,
    req: &ChatCompletionRequest,
    query: &str,
    messages: &mut Vec<Message>,
) -> Option<Vec<String>> {
    info!("🔎 Performing web search for query: {}", query);
    let timer = Timer::new("Web search");

    let mut options = SearchOptions::new(3, 2).domain_filter(req.search_domain_filter.clone());
    if let Some(recency) = &req.search_recency_filter {
        options = options.recency_filter(recency.clone());
    }

    let results = scrape(state.search.as_ref(), query, &options).await;
    let mut ranked = rank_by_relevance(results, query);
    ranked.truncate(MAX_SEARCH_RESULTS);
    drop(timer);

    if ranked.is_empty() {
        messages.push(Message::system(NO_RESULTS_NOTE));
        return None;
    }

    messages.push(Message::system(search_prompt(query, &ranked)));
    let citations = extract_citation_urls(&ranked);
    match &citations {
        Some(urls) => info!("📚 Extracted {} citations", urls.len()),
        None => warn!("No citations were extracted from search results"),
    }
    citations
}

pub async fn chat_completions(
    state: Arc<AppState>,
    req: RequestData,
) -> SonarResult<SonarResponse> {
    if req.bearer_token().is_none() {
        return Ok(SonarResponse::error(
            StatusCode::UNAUTHORIZED,
            "Unauthorized: Missing or invalid Bearer token",
        ));
    }

    let completion_req: ChatCompletionRequest = match req.json() {
        Ok(completion_req) => completion_req,
        Err(e) => {
            error!("Failed to parse JSON: {}", e);
            return Ok(SonarResponse::error(
                StatusCode::BAD_REQUEST,
                "Invalid JSON payload",
            ));
        }
    };

    if completion_req.messages.is_empty() {
        error!("Missing 'messages' in request");
        return Ok(SonarResponse::error(
            StatusCode::BAD_REQUEST,
            "'messages' field is required",
        ));
    }

    let model = if completion_req.model.is_empty() {
        DEFAULT_MODEL.to_string()
    } else {
        completion_req.model.clone()
    };

    let provider = match state.providers.resolve(&model).await {
        Ok(provider) => provider,
        Err(e) => {
            error!("Invalid LLM provider: {}", e);
            return Ok(SonarResponse::error(StatusCode::BAD_REQUEST, e.to_string()));
        }
    };

    let query = match completion_req.last_user_query() {
        Some(query) => query.to_string(),
        None => {
            error!("No user message found in request");
            return Ok(SonarResponse::error(
                StatusCode::BAD_REQUEST,
                "No user message found in request",
            ));
        }
    };

    let options = llm_options(&completion_req);
    let mut messages = completion_req.messages.clone();
    let citations = if is_search_model(&model) {
        add_search_context(&state, &completion_req, &query, &mut messages).await
    } else {
        None
    };

    let content = match provider.generate_with_options(&messages, &options).await {
        Ok(content) => content,
        Err(e) => return Ok(llm_failure(e)),
    };

    let id = generate_id();
    if completion_req.stream {
        info!("📡 Streaming {} characters for {}", content.len(), id);
        let streamer = ChunkStreamer::new(id, model, citations);
        let events = stream_completion(streamer, content, state.config.stream_chunk_size)?;
        return Ok(SonarResponse::event_stream(events));
    }

    let prompt_text = messages
        .iter()
        .map(Message::as_line)
        .collect::<Vec<_>>()
        .join(" ");
    let usage = Usage::new(
        simple_token_count(&prompt_text),
        simple_token_count(&content),
    );

    Ok(Json(ChatCompletionResponse {
        id,
        model,
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        citations,
        choices: vec![Choice {
            index: 0,
            finish_reason: Some("stop".to_string()),
            message: Some(Message::assistant(content)),
            delta: None,
        }],
        usage: Some(usage),
    })
    .into())
}
