//! Request types and utilities for the Sonar server

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Method};
use memchr::memchr;
use serde::de::DeserializeOwned;

use crate::error::{SonarError, SonarResult};

/// Request data that can be owned and moved between threads
#[derive(Debug, Clone)]
pub struct RequestData {
    pub method: Method,
    /// Path without the query string
    pub path: String,
    /// Raw query string, without `?`
    pub query_string: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub query: HashMap<String, String>,
    pub remote_addr: SocketAddr,
}

impl RequestData {
    pub fn new(
        method: Method,
        uri: &http::Uri,
        headers: HeaderMap,
        body: Bytes,
        remote_addr: SocketAddr,
    ) -> Self {
        let query_string = uri.query().map(str::to_string);
        let query = query_string
            .as_deref()
            .map(parse_query_string)
            .unwrap_or_default();
        Self {
            method,
            path: uri.path().to_string(),
            query_string,
            headers,
            body,
            query,
            remote_addr,
        }
    }

    /// Path plus query string, as the client sent it
    pub fn uri(&self) -> String {
        match &self.query_string {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// Get query parameter by name
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(|s| s.as_str())
    }

    /// Get header by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Token of an `Authorization: Bearer <token>` header
    pub fn bearer_token(&self) -> Option<&str> {
        self.header("authorization")
            .and_then(|auth| auth.strip_prefix("Bearer "))
    }

    /// API key from the bearer header, else the `api_key` query parameter
    pub fn api_key(&self) -> Option<&str> {
        self.bearer_token()
            .or_else(|| self.query("api_key"))
            .filter(|k| !k.is_empty())
    }

    /// First `X-Forwarded-For` entry, else the peer address
    pub fn client_ip(&self) -> String {
        self.header("x-forwarded-for")
            .and_then(|xff| xff.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.remote_addr.ip().to_string())
    }

    /// Get body as UTF-8 text
    pub fn body_str(&self) -> SonarResult<&str> {
        simdutf8::basic::from_utf8(&self.body)
            .map_err(|_| SonarError::Http("request body is not valid UTF-8".to_string()))
    }

    /// Deserialize the JSON body
    pub fn json<T: DeserializeOwned>(&self) -> SonarResult<T> {
        Ok(serde_json::from_str(self.body_str()?)?)
    }
}

/// Parse query string into decoded key-value pairs
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut rest = query.as_bytes();

    while !rest.is_empty() {
        let end = memchr(b'&', rest).unwrap_or(rest.len());
        let pair = &rest[..end];
        if !pair.is_empty() {
            let (key, value) = match memchr(b'=', pair) {
                Some(eq) => (&pair[..eq], &pair[eq + 1..]),
                None => (pair, &b""[..]),
            };
            params
                .entry(percent_decode(key))
                .or_insert_with(|| percent_decode(value));
        }
        rest = rest.get(end + 1..).unwrap_or_default();
    }

    params
}

fn percent_decode(input: &[u8]) -> String {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < input.len() => {
                match (hex_value(input[i + 1]), hex_value(input[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 2;
                    }
                    _ => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
