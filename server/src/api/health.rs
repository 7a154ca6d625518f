//! Liveness endpoints

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::json;

use crate::error::SonarResult;
use crate::request::RequestData;
use crate::response::SonarResponse;
use crate::state::AppState;

/// `GET /test`
pub async fn test(_state: Arc<AppState>, _req: RequestData) -> SonarResult<SonarResponse> {
    Ok(SonarResponse::json(json!({
        "message": "open-sonar server is running."
    })))
}

/// `GET /health`
pub async fn health(_state: Arc<AppState>, _req: RequestData) -> SonarResult<SonarResponse> {
    Ok(SonarResponse::json(json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    })))
}
