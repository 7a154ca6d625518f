//! HTTP endpoints of the answer server

pub mod cache_peer;
pub mod chat;
pub mod completions;
pub mod health;
pub mod streaming;

use sonar_core::{Method, Router};

use crate::error::SonarResult;
use crate::handler::{boxed, BoxedHandler};

/// Route table served by [`crate::Server`]
pub fn routes() -> SonarResult<Router<BoxedHandler>> {
    let mut router: Router<BoxedHandler> = Router::new();

    router.insert(Method::GET, "/test", boxed(health::test))?;
    router.insert(Method::GET, "/health", boxed(health::health))?;

    router.insert(Method::POST, "/chat", boxed(chat::chat))?;
    router.insert(
        Method::POST,
        "/chat/completions",
        boxed(completions::chat_completions),
    )?;

    router.insert(Method::POST, "/cache/set", boxed(cache_peer::set))?;
    router.insert(Method::POST, "/cache/delete", boxed(cache_peer::delete))?;
    router.insert(Method::GET, "/cache/get", boxed(cache_peer::get))?;

    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_registered() {
        let router = routes().unwrap();
        assert_eq!(router.total_routes(), 7);
        assert!(router.at(&Method::POST, "/chat/completions").is_some());
        assert!(router.at(&Method::GET, "/chat/completions").is_none());
        assert_eq!(router.allowed_methods("/cache/get"), vec![Method::GET]);
    }
}
