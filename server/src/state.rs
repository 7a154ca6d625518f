//! Shared state handed to every request

use std::collections::HashSet;
use std::sync::Arc;

use sonar_core::search::{provider_for, SearchProvider};
use sonar_core::{Cache, ProviderRegistry, RateLimiter};
use tokio::sync::RwLock;
use tracing::info;

use crate::config::SonarConfig;

/// Bearer tokens the API accepts. An empty set accepts every request.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    keys: Arc<RwLock<HashSet<String>>>,
}

impl ApiKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add<S: Into<String>>(&self, key: S) {
        let key = key.into();
        if !key.is_empty() {
            self.keys.write().await.insert(key);
        }
    }

    pub async fn is_valid(&self, key: &str) -> bool {
        let keys = self.keys.read().await;
        keys.is_empty() || keys.contains(key)
    }

    pub async fn len(&self) -> usize {
        self.keys.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.keys.read().await.is_empty()
    }
}

/// Everything a running server shares between requests
pub struct AppState {
    pub config: SonarConfig,
    pub api_keys: ApiKeys,
    /// Requests carrying an API key
    pub api_limiter: RateLimiter,
    /// `/chat/completions`
    pub llm_limiter: RateLimiter,
    /// Requests without an API key, keyed by client IP
    pub ip_limiter: RateLimiter,
    pub cache: Arc<Cache>,
    pub providers: ProviderRegistry,
    pub search: Box<dyn SearchProvider>,
}

impl AppState {
    pub fn new(config: SonarConfig, api_keys: ApiKeys) -> Self {
        let search_name = if config.test_mode {
            "mock"
        } else {
            config.search_provider.as_str()
        };
        let search = provider_for(search_name);
        let providers = ProviderRegistry::new(config.llm_settings());
        info!(
            "🔌 LLM provider: {}, search provider: {}{}",
            providers.settings().default_provider,
            search.name(),
            if config.test_mode { " (test mode)" } else { "" }
        );

        Self {
            api_limiter: RateLimiter::per_minute(config.max_requests_per_minute),
            llm_limiter: RateLimiter::per_minute(config.max_llm_requests_per_minute),
            ip_limiter: RateLimiter::per_minute(config.max_unauth_requests_per_minute),
            cache: Arc::new(Cache::new()),
            providers,
            search,
            api_keys,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_api_keys() {
        let keys = ApiKeys::new();
        assert!(keys.is_valid("anything").await);
        assert!(keys.is_valid("").await);

        keys.add("secret").await;
        keys.add("").await;
        assert_eq!(keys.len().await, 1);
        assert!(keys.is_valid("secret").await);
        assert!(!keys.is_valid("other").await);

        let shared = keys.clone();
        shared.add("second").await;
        assert!(keys.is_valid("second").await);
    }

    #[tokio::test]
    async fn test_test_mode_uses_mocks() {
        let state = AppState::new(SonarConfig::new().test_mode(true), ApiKeys::new());
        assert_eq!(state.search.name(), "mock");
        assert!(state.providers.is_test_mode());
        assert_eq!(state.llm_limiter.max_tokens(), 20);
        assert!(state.cache.is_empty().await);
    }
}
