//! # SonarCore
//!
//! The engine behind Open Sonar: everything that turns a chat request into
//! a cited answer, independent of how requests arrive.
//!
//! ## Features
//! - Perplexity/OpenAI compatible request and response models
//! - Web search with domain and recency filtering
//! - Relevance ranking and citation extraction
//! - Pluggable LLM backends (Ollama, OpenAI, Anthropic, mock)
//! - TTL cache with optional peer replication
//! - Per-key token bucket rate limiting
//! - Method-aware exact-path router
//!
//! ## Example
//! ```rust
//! use sonar_core::{Router, Method};
//!
//! let mut router = Router::new();
//! router.insert(Method::GET, "/test", "test").unwrap();
//! router.insert(Method::POST, "/chat", "chat").unwrap();
//!
//! assert_eq!(router.at(&Method::GET, "/test"), Some(&"test"));
//! assert!(router.at(&Method::GET, "/chat").is_none());
//! assert_eq!(router.allowed_methods("/chat"), vec![Method::POST]);
//! ```

use ahash::AHashMap;

pub mod cache;
pub mod citations;
pub mod error;
pub mod limiter;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod search;
pub mod utils;

pub use http::Method;

pub use cache::{Cache, CacheEntry};
pub use citations::{Citation, CitationExtractor, CitationResponse, CitationStyle};
pub use error::{CoreError, CoreResult};
pub use limiter::RateLimiter;
pub use llm::{LlmOptions, LlmProvider, LlmSettings, ProviderRegistry};
pub use models::{
    ChatCompletionRequest, ChatCompletionResponse, ChatRequest, Choice, Delta, Message, Usage,
};
pub use search::{PageInfo, SearchOptions, SearchProvider};

/// Route table keyed by method, then by exact path
pub struct Router<T> {
    /// One table per HTTP method
    tables: AHashMap<Method, AHashMap<String, T>>,
}

impl<T> Router<T> {
    /// Create a new router instance
    #[inline]
    pub fn new() -> Self {
        Self {
            tables: AHashMap::new(),
        }
    }

    /// Insert a route with the given method, path, and handler
    pub fn insert(&mut self, method: Method, path: &str, handler: T) -> Result<(), RouterError> {
        if path.is_empty() || !path.starts_with('/') {
            return Err(RouterError::InvalidPath(path.to_string()));
        }

        let table = self.tables.entry(method.clone()).or_default();
        if table.contains_key(path) {
            return Err(RouterError::DuplicateRoute(format!("{} {}", method, path)));
        }
        table.insert(path.to_string(), handler);
        Ok(())
    }

    /// Find the handler registered for `method` and `path`
    #[inline]
    pub fn at(&self, method: &Method, path: &str) -> Option<&T> {
        self.tables.get(method)?.get(path)
    }

    /// Methods that have a handler for `path`, used to answer 405s
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let mut methods: Vec<Method> = self
            .tables
            .iter()
            .filter(|(_, table)| table.contains_key(path))
            .map(|(method, _)| method.clone())
            .collect();
        methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        methods
    }

    /// Get the number of routes for a specific method
    #[inline]
    pub fn len(&self, method: &Method) -> usize {
        self.tables.get(method).map_or(0, |table| table.len())
    }

    /// Check if router is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(|table| table.is_empty())
    }

    /// Get total number of routes across all methods
    pub fn total_routes(&self) -> usize {
        self.tables.values().map(|table| table.len()).sum()
    }

    /// Get all registered methods
    pub fn methods(&self) -> impl Iterator<Item = &Method> + '_ {
        self.tables.keys()
    }
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Router errors
#[derive(Debug, Clone, PartialEq)]
pub enum RouterError {
    /// Invalid path format
    InvalidPath(String),
    /// Duplicate route registration
    DuplicateRoute(String),
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterError::InvalidPath(path) => write!(f, "Invalid path: {}", path),
            RouterError::DuplicateRoute(route) => write!(f, "Duplicate route: {}", route),
        }
    }
}

impl std::error::Error for RouterError {}
