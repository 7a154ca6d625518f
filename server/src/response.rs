//! Response types and utilities for the Sonar server

use std::convert::Infallible;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use http::header::{HeaderName, HeaderValue, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use http::HeaderMap;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use hyper::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::error::SonarError;

/// Body type handed to hyper
pub type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

/// Payload of a [`SonarResponse`]
pub enum Body {
    Empty,
    Full(Bytes),
    /// Server-sent events, written as they are produced
    Stream(BoxStream<'static, Bytes>),
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Response produced by handlers and middleware
#[derive(Debug)]
pub struct SonarResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

/// JSON response wrapper for auto-serialization
#[derive(Debug)]
pub struct Json<T>(pub T);

impl<T: Serialize> From<Json<T>> for SonarResponse {
    fn from(json: Json<T>) -> Self {
        match serde_json::to_vec(&json.0) {
            Ok(body) => SonarResponse::json_bytes(StatusCode::OK, Bytes::from(body)),
            Err(e) => {
                error!("Failed to serialize JSON response: {}", e);
                SonarResponse::error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to serialize JSON",
                )
            }
        }
    }
}

impl SonarResponse {
    pub fn new(status: StatusCode, body: Body) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// 200 with a JSON body
    pub fn json(value: Value) -> Self {
        Json(value).into()
    }

    /// JSON body with an explicit status
    pub fn json_with_status(status: StatusCode, value: Value) -> Self {
        let mut response = Self::json(value);
        response.status = status;
        response
    }

    /// Already serialized JSON
    pub fn json_bytes(status: StatusCode, body: Bytes) -> Self {
        Self::new(status, Body::Full(body)).with_header(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )
    }

    /// `{"error": message}` with `status`
    pub fn error<S: AsRef<str>>(status: StatusCode, message: S) -> Self {
        let body = json!({ "error": message.as_ref() }).to_string();
        Self::json_bytes(status, Bytes::from(body))
    }

    /// Map an error to its status and JSON body
    pub fn from_error(err: &SonarError) -> Self {
        Self::error(err.status_code(), err.to_string())
    }

    pub fn text<S: Into<String>>(status: StatusCode, text: S) -> Self {
        Self::new(status, Body::Full(Bytes::from(text.into()))).with_header(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )
    }

    /// `text/event-stream` response fed by `events`
    pub fn event_stream(events: BoxStream<'static, Bytes>) -> Self {
        Self::new(StatusCode::OK, Body::Stream(events))
            .with_header(
                CONTENT_TYPE,
                HeaderValue::from_static("text/event-stream"),
            )
            .with_header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .with_header(CONNECTION, HeaderValue::from_static("keep-alive"))
    }

    /// Empty response with status code
    pub fn status(status: StatusCode) -> Self {
        Self::new(status, Body::Empty)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Complete body bytes, `None` for streams
    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            Body::Full(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Convert SonarResponse to hyper Response
    pub fn into_hyper(self) -> hyper::Response<ResponseBody> {
        let body = match self.body {
            Body::Empty => Empty::<Bytes>::new().boxed_unsync(),
            Body::Full(bytes) => Full::new(bytes).boxed_unsync(),
            Body::Stream(events) => {
                StreamBody::new(events.map(|chunk| Ok::<_, Infallible>(Frame::data(chunk))))
                    .boxed_unsync()
            }
        };

        let mut response = hyper::Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
