//! LLM backends and the registry that picks one per request
//!
//! Providers speak in [`Message`]s and return plain text. Which provider
//! serves a request is decided by [`ProviderRegistry::resolve`] from the
//! model or provider name the client sent.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::models::Message;
use crate::utils::simple_token_count;

mod anthropic;
mod mock;
mod ollama;
mod openai;

pub use anthropic::AnthropicProvider;
pub use mock::MockProvider;
pub use ollama::{OllamaProvider, OllamaStatus};
pub use openai::OpenAiProvider;

pub const DEFAULT_PROVIDER: &str = "ollama";
pub const DEFAULT_OLLAMA_MODEL: &str = "deepseek-r1:1.5b";
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-opus-20240229";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Sampling parameters passed through to the backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LlmOptions {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.2,
            top_p: 0.9,
            top_k: 0,
            presence_penalty: 0.0,
            frequency_penalty: 1.0,
        }
    }
}

/// A text generation backend
pub trait LlmProvider: Send + Sync {
    /// Answer a single user query with default options
    fn generate<'a>(&'a self, query: &'a str) -> BoxFuture<'a, CoreResult<String>> {
        Box::pin(async move {
            let messages = [Message::user(query)];
            self.generate_with_options(&messages, &LlmOptions::default())
                .await
        })
    }

    /// Continue a conversation
    fn generate_with_options<'a>(
        &'a self,
        messages: &'a [Message],
        options: &'a LlmOptions,
    ) -> BoxFuture<'a, CoreResult<String>>;

    fn count_tokens(&self, text: &str) -> usize {
        simple_token_count(text)
    }

    fn name(&self) -> &str;
}

/// Connection details for every backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    pub default_provider: String,
    pub ollama_host: String,
    pub ollama_model: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub anthropic_base_url: String,
    /// Serve every request from [`MockProvider`]
    pub test_mode: bool,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            default_provider: DEFAULT_PROVIDER.to_string(),
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            ollama_model: DEFAULT_OLLAMA_MODEL.to_string(),
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            anthropic_api_key: None,
            anthropic_model: DEFAULT_ANTHROPIC_MODEL.to_string(),
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            test_mode: false,
        }
    }
}

/// Which backend a name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Ollama,
    OpenAi,
    Anthropic,
    Mock,
    /// `sonar*` model names: whatever the default provider is
    Default,
}

impl ProviderKind {
    /// Classify a provider or model name
    pub fn from_name(name: &str) -> CoreResult<Self> {
        let lower = name.trim().to_ascii_lowercase();
        let kind = match lower.as_str() {
            "openai" => Self::OpenAi,
            "anthropic" => Self::Anthropic,
            "ollama" => Self::Ollama,
            "mock" => Self::Mock,
            "" => Self::Default,
            n if n.starts_with("sonar") => Self::Default,
            n if n.starts_with("deepseek") || n.contains(':') || n.contains("llama") => {
                Self::Ollama
            }
            _ => return Err(CoreError::UnsupportedProvider(name.to_string())),
        };
        Ok(kind)
    }
}

/// Resolves provider names to live providers
///
/// The Ollama provider is connected once and reused; the hosted APIs are
/// stateless and built on demand.
pub struct ProviderRegistry {
    settings: LlmSettings,
    default_provider: RwLock<String>,
    ollama: OnceCell<Arc<OllamaProvider>>,
}

impl ProviderRegistry {
    pub fn new(settings: LlmSettings) -> Self {
        let default_provider = RwLock::new(settings.default_provider.clone());
        Self {
            settings,
            default_provider,
            ollama: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    pub fn is_test_mode(&self) -> bool {
        self.settings.test_mode
    }

    pub async fn default_provider(&self) -> String {
        self.default_provider.read().await.clone()
    }

    /// Change the provider used for `sonar*` models and empty names.
    /// The name must classify to a concrete backend.
    pub async fn set_default_provider(&self, name: &str) -> CoreResult<()> {
        match ProviderKind::from_name(name)? {
            ProviderKind::Default => Err(CoreError::UnsupportedProvider(name.to_string())),
            _ => {
                *self.default_provider.write().await = name.to_string();
                info!("🔀 Default LLM provider set to {}", name);
                Ok(())
            }
        }
    }

    /// Provider serving `name` (a provider name or model name)
    pub async fn resolve(&self, name: &str) -> CoreResult<Arc<dyn LlmProvider>> {
        if self.settings.test_mode {
            return Ok(Arc::new(MockProvider::new()));
        }

        let mut kind = ProviderKind::from_name(name)?;
        if kind == ProviderKind::Default {
            let default = self.default_provider().await;
            kind = match ProviderKind::from_name(&default)? {
                ProviderKind::Default => ProviderKind::Ollama,
                other => other,
            };
        }
        debug!("Resolved LLM provider '{}' to {:?}", name, kind);

        let provider: Arc<dyn LlmProvider> = match kind {
            ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(&self.settings)?),
            ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(&self.settings)?),
            ProviderKind::Mock => Arc::new(MockProvider::new()),
            ProviderKind::Ollama | ProviderKind::Default => {
                let ollama = self
                    .ollama
                    .get_or_try_init(|| async {
                        OllamaProvider::connect(&self.settings).await.map(Arc::new)
                    })
                    .await?;
                Arc::clone(ollama) as Arc<dyn LlmProvider>
            }
        };
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_classification() {
        assert_eq!(ProviderKind::from_name("openai").unwrap(), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::from_name("Anthropic").unwrap(), ProviderKind::Anthropic);
        assert_eq!(ProviderKind::from_name("sonar").unwrap(), ProviderKind::Default);
        assert_eq!(
            ProviderKind::from_name("sonar-medium-online").unwrap(),
            ProviderKind::Default
        );
        assert_eq!(ProviderKind::from_name("").unwrap(), ProviderKind::Default);
        assert_eq!(ProviderKind::from_name("deepseek-r1").unwrap(), ProviderKind::Ollama);
        assert_eq!(ProviderKind::from_name("mistral:7b").unwrap(), ProviderKind::Ollama);
        assert_eq!(ProviderKind::from_name("codellama").unwrap(), ProviderKind::Ollama);
        assert!(matches!(
            ProviderKind::from_name("gpt-unknown"),
            Err(CoreError::UnsupportedProvider(_))
        ));
    }

    #[tokio::test]
    async fn test_test_mode_resolves_everything_to_mock() {
        let registry = ProviderRegistry::new(LlmSettings {
            test_mode: true,
            ..Default::default()
        });
        for name in ["sonar", "openai", "anthropic", "ollama", "nonsense"] {
            assert_eq!(registry.resolve(name).await.unwrap().name(), "mock");
        }
    }

    #[tokio::test]
    async fn test_missing_api_keys_are_reported() {
        let registry = ProviderRegistry::new(LlmSettings::default());
        assert!(matches!(
            registry.resolve("openai").await.err(),
            Some(CoreError::NotConfigured(_))
        ));
        assert!(matches!(
            registry.resolve("anthropic").await.err(),
            Some(CoreError::NotConfigured(_))
        ));
        assert!(matches!(
            registry.resolve("gpt-unknown").await.err(),
            Some(CoreError::UnsupportedProvider(_))
        ));
    }

    #[tokio::test]
    async fn test_sonar_follows_default_provider() {
        let registry = ProviderRegistry::new(LlmSettings {
            openai_api_key: Some("sk-test".to_string()),
            ..Default::default()
        });
        assert_eq!(registry.default_provider().await, "ollama");

        registry.set_default_provider("openai").await.unwrap();
        assert_eq!(registry.resolve("sonar").await.unwrap().name(), "openai");
        assert_eq!(registry.resolve("").await.unwrap().name(), "openai");

        registry.set_default_provider("mock").await.unwrap();
        assert_eq!(registry.resolve("sonar-pro").await.unwrap().name(), "mock");

        assert!(registry.set_default_provider("sonar").await.is_err());
        assert!(registry.set_default_provider("bogus").await.is_err());
        assert_eq!(registry.default_provider().await, "mock");
    }

    #[test]
    fn test_default_options() {
        let opts = LlmOptions::default();
        assert_eq!(opts.max_tokens, 1024);
        assert_eq!(opts.temperature, 0.2);
        assert_eq!(opts.frequency_penalty, 1.0);
    }
}
