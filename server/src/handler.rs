//! Handler traits and implementations for the Sonar server

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::SonarError;
use crate::request::RequestData;
use crate::response::SonarResponse;
use crate::state::AppState;

/// Handler trait for request processing
pub trait Handler {
    /// Handle the request and return a response
    fn handle<'a>(
        &'a self,
        state: Arc<AppState>,
        req: RequestData,
    ) -> Pin<Box<dyn Future<Output = Result<SonarResponse, SonarError>> + Send + 'a>>;
}

/// Async handler wrapper
pub struct AsyncHandler<F> {
    func: F,
}

impl<F> AsyncHandler<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F, Fut> Handler for AsyncHandler<F>
where
    F: Fn(Arc<AppState>, RequestData) -> Fut + Send + Sync,
    Fut: Future<Output = Result<SonarResponse, SonarError>> + Send + 'static,
{
    fn handle<'a>(
        &'a self,
        state: Arc<AppState>,
        req: RequestData,
    ) -> Pin<Box<dyn Future<Output = Result<SonarResponse, SonarError>> + Send + 'a>> {
        Box::pin((self.func)(state, req))
    }
}

/// Type alias for boxed async handlers
pub type BoxedHandler = Box<dyn Handler + Send + Sync>;

/// Box an async fn as a route handler
pub fn boxed<F, Fut>(func: F) -> BoxedHandler
where
    F: Fn(Arc<AppState>, RequestData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<SonarResponse, SonarError>> + Send + 'static,
{
    Box::new(AsyncHandler::new(func))
}
