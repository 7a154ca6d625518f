// End-to-end tests against a real server on an ephemeral port, in test mode
use serde_json::{json, Value};
use sonar::api::streaming::parse_events;
use sonar::{Server, SonarClient, SonarConfig, SonarError};
use sonar_core::{ChatCompletionRequest, Message};

fn test_config() -> SonarConfig {
    SonarConfig::new()
        .port(0)
        .hostname("127.0.0.1")
        .without_env_file()
        .test_mode(true)
}

async fn start(config: SonarConfig) -> (Server, String) {
    let mut server = Server::new(config);
    server.start().await.expect("server should start");
    let url = server.server_url();
    (server, url)
}

fn completion_request(model: &str, content: &str) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![
            Message::system("Be precise and concise."),
            Message::user(content),
        ],
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_liveness_endpoints() {
    let (mut server, url) = start(test_config()).await;
    let http = reqwest::Client::new();

    let body: Value = http
        .get(format!("{}/test", url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"message": "open-sonar server is running."}));

    let resp = http.get(format!("{}/health", url)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "OK");
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_chat_endpoint() {
    let (mut server, url) = start(test_config()).await;
    let client = SonarClient::new(&url, "anything");

    let direct = client.chat("What is Rust?", false).await.unwrap();
    assert_eq!(direct["decision"], "direct LLM call");
    assert!(direct["response"].as_str().unwrap().contains("What is Rust?"));

    let searched = client.chat("tokio runtime", true).await.unwrap();
    assert_eq!(searched["decision"], "search + LLM call");
    assert_eq!(searched["pages_used"], 3);

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_chat_completions_with_citations() {
    let (mut server, url) = start(test_config().auth_token("secret")).await;
    let client = SonarClient::new(&url, "secret");

    let completion = client
        .chat_completions(&completion_request("sonar", "rust"))
        .await
        .unwrap();
    assert_eq!(completion.object, "chat.completion");
    assert!(completion.verify_citations());
    assert!(completion
        .citations
        .as_ref()
        .unwrap()
        .contains(&"https://example.com/result1".to_string()));
    assert_eq!(
        completion.choices[0].message.as_ref().unwrap().role,
        "assistant"
    );

    let plain = client
        .chat_completions(&completion_request("openai", "hello"))
        .await
        .unwrap();
    assert!(plain.citations.is_none());
    assert!(plain.content().unwrap().contains("hello"));

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_domain_filter_limits_citations() {
    let (mut server, url) = start(test_config()).await;
    let client = SonarClient::new(&url, "token");

    let mut request = completion_request("sonar", "rust");
    request.search_domain_filter = vec!["-wikipedia.org".to_string()];
    let completion = client.chat_completions(&request).await.unwrap();

    let citations = completion.citations.unwrap();
    assert_eq!(citations.len(), 2);
    assert!(citations.iter().all(|c| !c.contains("wikipedia")));

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_streaming_completion() {
    let (mut server, url) = start(test_config()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat/completions", url))
        .bearer_auth("token")
        .json(&json!({
            "model": "sonar",
            "stream": true,
            "messages": [{"role": "user", "content": "streaming test"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let body = resp.text().await.unwrap();
    assert!(body.ends_with("data: [DONE]\n\n"));

    let chunks = parse_events(&body);
    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.object == "chat.completion.chunk"));

    let first = &chunks[0].choices[0];
    assert_eq!(first.delta.as_ref().unwrap().role.as_deref(), Some("assistant"));
    let last = chunks.last().unwrap();
    assert_eq!(last.choices[0].finish_reason.as_deref(), Some("stop"));
    assert!(last.verify_citations());
    assert!(chunks[..chunks.len() - 1].iter().all(|c| c.citations.is_none()));

    let text: String = chunks
        .iter()
        .filter_map(|c| c.choices[0].delta.as_ref()?.content.clone())
        .collect();
    assert!(text.contains("streaming test"));

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_auth_rejections() {
    let (mut server, url) = start(test_config().auth_token("secret")).await;
    let http = reqwest::Client::new();

    // public even with keys registered
    let resp = http.get(format!("{}/test", url)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let resp = http
        .post(format!("{}/chat", url))
        .bearer_auth("wrong")
        .json(&json!({"query": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);

    let client = SonarClient::new(&url, "wrong");
    match client.chat_completions(&completion_request("sonar", "hi")).await {
        Err(SonarError::Client { status, body }) => {
            assert_eq!(status, 401);
            assert!(body.contains("Invalid API key"));
        }
        other => panic!("expected 401, got {:?}", other),
    }

    // the query parameter works as well as the header
    let resp = http
        .post(format!("{}/chat?api_key=secret", url))
        .json(&json!({"query": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    server.add_auth_token("second").await;
    let resp = http
        .post(format!("{}/chat", url))
        .bearer_auth("second")
        .json(&json!({"query": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_completions_require_bearer() {
    let (mut server, url) = start(test_config()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat/completions", url))
        .json(&json!({"messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_routing_errors() {
    let (mut server, url) = start(test_config()).await;
    let http = reqwest::Client::new();

    let resp = http.get(format!("{}/missing", url)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    let resp = http.get(format!("{}/chat", url)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 405);
    assert_eq!(resp.headers().get("allow").unwrap(), "POST");

    let resp = http
        .post(format!("{}/chat", url))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_oversized_body_rejected() {
    let (mut server, url) = start(test_config().max_request_body_size(64)).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat", url))
        .json(&json!({"query": "x".repeat(500)}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 413);

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_response_cache_headers() {
    let (mut server, url) = start(test_config()).await;
    let http = reqwest::Client::new();

    let first = http.get(format!("{}/test", url)).send().await.unwrap();
    assert_eq!(first.headers().get("x-cache").unwrap(), "MISS");
    let second = http.get(format!("{}/test", url)).send().await.unwrap();
    assert_eq!(second.headers().get("x-cache").unwrap(), "HIT");
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["message"], "open-sonar server is running.");

    // never cached
    let health = http.get(format!("{}/health", url)).send().await.unwrap();
    assert!(health.headers().get("x-cache").is_none());

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unauthenticated_rate_limit() {
    let (mut server, url) = start(test_config().rate_limits(100, 100, 2)).await;
    let http = reqwest::Client::new();

    for _ in 0..2 {
        let resp = http.get(format!("{}/health", url)).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);
    }
    let resp = http.get(format!("{}/health", url)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 429);

    // a keyed client has its own bucket
    let resp = http
        .get(format!("{}/health", url))
        .bearer_auth("someone")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cache_peer_endpoints() {
    let (mut server, url) = start(test_config()).await;
    let http = reqwest::Client::new();

    let resp = http
        .post(format!("{}/cache/set", url))
        .json(&json!({"key": "shared", "value": {"n": 7}, "expiration": 0}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let body: Value = http
        .get(format!("{}/cache/get?key=shared", url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["found"], true);
    assert_eq!(body["value"]["n"], 7);

    let resp = http.get(format!("{}/cache/get", url)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    http.post(format!("{}/cache/delete", url))
        .json(&json!({"key": "shared"}))
        .send()
        .await
        .unwrap();
    let body: Value = http
        .get(format!("{}/cache/get?key=shared", url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["found"], false);

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_distributed_cache_between_nodes() {
    let (mut peer, peer_url) = start(test_config()).await;
    let (mut node, _) = start(test_config().cache_peers([peer_url.clone()])).await;

    let state = node.state().unwrap();
    state.cache.set("replicated", json!("value"), std::time::Duration::from_secs(60)).await;

    // replication is pushed in the background
    let peer_state = peer.state().unwrap();
    let mut found = None;
    for _ in 0..50 {
        found = peer_state.cache.lookup_local("replicated").await;
        if found.is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(found.unwrap().value, json!("value"));

    node.stop().await.unwrap();
    peer.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restart_after_stop() {
    let (mut server, _) = start(test_config()).await;
    assert!(matches!(
        server.start().await,
        Err(SonarError::InvalidState(_))
    ));

    server.stop().await.unwrap();
    server.stop().await.unwrap();

    server.start().await.unwrap();
    let url = server.server_url();
    let resp = reqwest::get(format!("{}/test", url)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    server.stop().await.unwrap();
}
