//! Middleware applied to every routed request
//!
//! Each middleware gets a `before` hook, which may answer the request
//! itself, and an `after` hook that sees the final response. `before`
//! hooks run in registration order, `after` hooks in reverse order and only
//! for middleware whose `before` hook ran.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::Method;
use hyper::StatusCode;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::handler::BoxedHandler;
use crate::request::RequestData;
use crate::response::SonarResponse;
use crate::state::AppState;

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Request context passed through middleware chain
pub struct Context {
    pub request: RequestData,
    pub state: Arc<AppState>,
    pub started: Instant,
    /// Key under which the response should be cached, set on a cache miss
    pub cache_key: Option<String>,
}

impl Context {
    pub fn new(request: RequestData, state: Arc<AppState>) -> Self {
        Self {
            request,
            state,
            started: Instant::now(),
            cache_key: None,
        }
    }
}

/// Middleware result indicating flow control
#[derive(Debug)]
pub enum MiddlewareResult {
    /// Continue to next middleware
    Continue,
    /// Stop processing and return response
    Response(SonarResponse),
}

type HookFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Async middleware trait
pub trait Middleware: Send + Sync {
    fn before<'a>(&'a self, ctx: &'a mut Context) -> HookFuture<'a, MiddlewareResult>;

    fn after<'a>(
        &'a self,
        _ctx: &'a Context,
        _response: &'a mut SonarResponse,
    ) -> HookFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// Middleware chain for composing multiple middleware
pub struct MiddlewareChain {
    middleware: Vec<Box<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Create new empty middleware chain
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
        }
    }

    /// Logger, rate limit, auth, then cache
    pub fn standard() -> Self {
        Self::new()
            .use_middleware(LoggerMiddleware)
            .use_middleware(RateLimitMiddleware)
            .use_middleware(AuthMiddleware)
            .use_middleware(CacheMiddleware)
    }

    /// Add middleware to the chain
    pub fn use_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Box::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Run the hooks around `handler`
    pub async fn execute(&self, mut ctx: Context, handler: &BoxedHandler) -> SonarResponse {
        let mut ran = 0;
        let mut early = None;
        for middleware in &self.middleware {
            ran += 1;
            if let MiddlewareResult::Response(response) = middleware.before(&mut ctx).await {
                early = Some(response);
                break;
            }
        }

        let mut response = match early {
            Some(response) => response,
            None => match handler
                .handle(Arc::clone(&ctx.state), ctx.request.clone())
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    error!("Handler error on {} {}: {}", ctx.request.method, ctx.request.path, e);
                    SonarResponse::from_error(&e)
                }
            },
        };

        for middleware in self.middleware[..ran].iter().rev() {
            middleware.after(&ctx, &mut response).await;
        }
        response
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs method, path, status and duration
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn before<'a>(&'a self, ctx: &'a mut Context) -> HookFuture<'a, MiddlewareResult> {
        Box::pin(async move {
            debug!(
                "{} {} from {}",
                ctx.request.method,
                ctx.request.path,
                ctx.request.client_ip()
            );
            MiddlewareResult::Continue
        })
    }

    fn after<'a>(
        &'a self,
        ctx: &'a Context,
        response: &'a mut SonarResponse,
    ) -> HookFuture<'a, ()> {
        Box::pin(async move {
            info!(
                "{} {} {} {:?}",
                ctx.request.method,
                ctx.request.path,
                response.status.as_u16(),
                ctx.started.elapsed()
            );
        })
    }
}

/// Token bucket per API key, or per client IP for anonymous requests
pub struct RateLimitMiddleware;

impl RateLimitMiddleware {
    /// `key:<api key>` or `ip:<client ip>`
    pub fn limit_key(req: &RequestData) -> String {
        match req.api_key() {
            Some(key) => format!("key:{}", key),
            None => format!("ip:{}", req.client_ip()),
        }
    }
}

impl Middleware for RateLimitMiddleware {
    fn before<'a>(&'a self, ctx: &'a mut Context) -> HookFuture<'a, MiddlewareResult> {
        Box::pin(async move {
            let key = Self::limit_key(&ctx.request);
            let state = &ctx.state;
            let limiter = if ctx.request.path.starts_with("/chat/completions") {
                &state.llm_limiter
            } else if ctx.request.api_key().is_some() {
                &state.api_limiter
            } else {
                &state.ip_limiter
            };

            if limiter.allow(&key).await {
                return MiddlewareResult::Continue;
            }
            warn!("Rate limit exceeded for {}", key);
            MiddlewareResult::Response(SonarResponse::error(
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded. Try again later.",
            ))
        })
    }
}

/// Rejects requests whose API key is not registered
pub struct AuthMiddleware;

impl AuthMiddleware {
    fn is_public(req: &RequestData) -> bool {
        req.method == Method::OPTIONS || req.path == "/test" || req.path == "/health"
    }
}

impl Middleware for AuthMiddleware {
    fn before<'a>(&'a self, ctx: &'a mut Context) -> HookFuture<'a, MiddlewareResult> {
        Box::pin(async move {
            if Self::is_public(&ctx.request) {
                return MiddlewareResult::Continue;
            }
            let key = ctx.request.api_key().unwrap_or_default();
            if ctx.state.api_keys.is_valid(key).await {
                return MiddlewareResult::Continue;
            }
            warn!("Invalid API key from {}", ctx.request.client_ip());
            MiddlewareResult::Response(SonarResponse::error(
                StatusCode::UNAUTHORIZED,
                "Unauthorized: Invalid API key",
            ))
        })
    }
}

/// Serves repeated GETs from the response cache
pub struct CacheMiddleware;

impl CacheMiddleware {
    fn is_cacheable(req: &RequestData) -> bool {
        req.method == Method::GET && req.path != "/health" && !req.path.starts_with("/cache/")
    }
}

impl Middleware for CacheMiddleware {
    fn before<'a>(&'a self, ctx: &'a mut Context) -> HookFuture<'a, MiddlewareResult> {
        Box::pin(async move {
            if !Self::is_cacheable(&ctx.request) {
                return MiddlewareResult::Continue;
            }
            let key = format!("response:{}", ctx.request.uri());
            if let Some(Value::String(body)) = ctx.state.cache.get(&key).await {
                debug!("Cache hit for {}", key);
                return MiddlewareResult::Response(
                    SonarResponse::json_bytes(StatusCode::OK, Bytes::from(body))
                        .with_header(X_CACHE, HeaderValue::from_static("HIT")),
                );
            }
            ctx.cache_key = Some(key);
            MiddlewareResult::Continue
        })
    }

    fn after<'a>(
        &'a self,
        ctx: &'a Context,
        response: &'a mut SonarResponse,
    ) -> HookFuture<'a, ()> {
        Box::pin(async move {
            let Some(key) = ctx.cache_key.as_deref() else {
                return;
            };
            response
                .headers
                .insert(X_CACHE, HeaderValue::from_static("MISS"));
            if response.status != StatusCode::OK {
                return;
            }
            let Some(body) = response.body_bytes() else {
                return;
            };
            if let Ok(text) = simdutf8::basic::from_utf8(body) {
                ctx.state
                    .cache
                    .set(key, Value::String(text.to_string()), ctx.state.config.cache_ttl())
                    .await;
            }
        })
    }
}
