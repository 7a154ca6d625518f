//! Endpoints other cache nodes call to replicate entries
//!
//! Writes land in the local store only, so a replicated entry is never
//! pushed on again.

use std::sync::Arc;

use hyper::StatusCode;
use serde_json::json;
use sonar_core::cache::{PeerDeleteRequest, PeerGetResponse, PeerSetRequest};
use sonar_core::CacheEntry;
use tracing::{debug, warn};

use crate::error::SonarResult;
use crate::request::RequestData;
use crate::response::{Json, SonarResponse};
use crate::state::AppState;

/// `POST /cache/set`
pub async fn set(state: Arc<AppState>, req: RequestData) -> SonarResult<SonarResponse> {
    let set_req: PeerSetRequest = match req.json() {
        Ok(set_req) => set_req,
        Err(e) => {
            warn!("Rejected peer set: {}", e);
            return Ok(SonarResponse::error(StatusCode::BAD_REQUEST, "Invalid JSON"));
        }
    };

    debug!("Peer set for key {}", set_req.key);
    let entry = CacheEntry {
        value: set_req.value,
        expiration: set_req.expiration,
    };
    state.cache.store_local(&set_req.key, entry).await;
    Ok(SonarResponse::json(json!({ "status": "ok" })))
}

/// `POST /cache/delete`
pub async fn delete(state: Arc<AppState>, req: RequestData) -> SonarResult<SonarResponse> {
    let delete_req: PeerDeleteRequest = match req.json() {
        Ok(delete_req) => delete_req,
        Err(e) => {
            warn!("Rejected peer delete: {}", e);
            return Ok(SonarResponse::error(StatusCode::BAD_REQUEST, "Invalid JSON"));
        }
    };

    debug!("Peer delete for key {}", delete_req.key);
    state.cache.delete_local(&delete_req.key).await;
    Ok(SonarResponse::json(json!({ "status": "ok" })))
}

/// `GET /cache/get?key=`
pub async fn get(state: Arc<AppState>, req: RequestData) -> SonarResult<SonarResponse> {
    let key = match req.query("key").filter(|k| !k.is_empty()) {
        Some(key) => key,
        None => {
            return Ok(SonarResponse::error(
                StatusCode::BAD_REQUEST,
                "Missing 'key' query param",
            ))
        }
    };

    let entry = state.cache.lookup_local(key).await;
    Ok(Json(PeerGetResponse::from_lookup(key, entry)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SonarConfig;
    use crate::state::ApiKeys;
    use bytes::Bytes;
    use http::{HeaderMap, Method, Uri};
    use serde_json::Value;

    fn request(method: Method, uri: &'static str, body: &str) -> RequestData {
        RequestData::new(
            method,
            &Uri::from_static(uri),
            HeaderMap::new(),
            Bytes::from(body.to_string()),
            "127.0.0.1:9999".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let state = Arc::new(AppState::new(SonarConfig::new(), ApiKeys::new()));

        let resp = set(
            state.clone(),
            request(
                Method::POST,
                "/cache/set",
                r#"{"key": "k1", "value": {"answer": 42}, "expiration": 0}"#,
            ),
        )
        .await
        .unwrap();
        assert_eq!(resp.status, StatusCode::OK);

        let resp = get(state.clone(), request(Method::GET, "/cache/get?key=k1", ""))
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(resp.body_bytes().unwrap()).unwrap();
        assert_eq!(body["found"], true);
        assert_eq!(body["value"]["answer"], 42);

        delete(
            state.clone(),
            request(Method::POST, "/cache/delete", r#"{"key": "k1"}"#),
        )
        .await
        .unwrap();
        let resp = get(state.clone(), request(Method::GET, "/cache/get?key=k1", ""))
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(resp.body_bytes().unwrap()).unwrap();
        assert_eq!(body["found"], false);
    }

    #[tokio::test]
    async fn test_bad_peer_requests() {
        let state = Arc::new(AppState::new(SonarConfig::new(), ApiKeys::new()));

        let resp = get(state.clone(), request(Method::GET, "/cache/get", ""))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);

        let resp = set(state, request(Method::POST, "/cache/set", "{}"))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    }
}
