//! Server configuration
//!
//! Configuration comes from, in increasing precedence:
//! - built-in defaults
//! - a JSON config file
//! - environment variables (and an optional `.env` file beneath them)
//! - CLI argument overrides
//!
//! The process environment is only ever read. Values from a `.env` file
//! are layered under it in an [`EnvSource`] snapshot.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sonar_core::llm::{
    LlmSettings, DEFAULT_ANTHROPIC_BASE_URL, DEFAULT_ANTHROPIC_MODEL, DEFAULT_OLLAMA_HOST,
    DEFAULT_OLLAMA_MODEL, DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL, DEFAULT_PROVIDER,
};
use tracing::{debug, warn};

use crate::error::{SonarError, SonarResult};
use crate::logging::{LogFormat, LogLevel};

/// Snapshot of environment variables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvSource {
    vars: HashMap<String, String>,
}

impl EnvSource {
    /// The current process environment
    pub fn process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// A fixed set of variables
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Add the entries of a `.env` file that are not already set. A missing
    /// or unreadable file is logged and ignored.
    pub fn with_env_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let mut added = 0;
                for (key, value) in parse_env_file(&content) {
                    if !self.vars.contains_key(&key) {
                        self.vars.insert(key, value);
                        added += 1;
                    }
                }
                debug!("Loaded {} variables from {}", added, path.display());
            }
            Err(e) => warn!("Failed to load env file {}: {}", path.display(), e),
        }
        self
    }

    /// Non-empty value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }

    fn get_parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring unparsable {}={}", key, raw);
                None
            }
        }
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
    }

    fn get_list(&self, key: &str) -> Option<Vec<String>> {
        self.get(key).map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

/// Parse `KEY=VALUE` lines: `#` comments, an optional `export ` prefix and
/// single or double quoted values
pub fn parse_env_file(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(value.trim())))
        })
        .collect()
}

fn unquote(value: &str) -> String {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].to_string();
        }
    }
    // unquoted values may carry a trailing comment
    match value.find(" #") {
        Some(pos) => value[..pos].trim_end().to_string(),
        None => value.to_string(),
    }
}

/// Complete Sonar server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SonarConfig {
    /// HTTP server port; 0 picks a free port
    pub port: u16,

    /// HTTP server hostname
    pub hostname: String,

    pub log_level: LogLevel,
    pub log_format: LogFormat,

    /// Read `env_file_path` when the server starts
    pub load_env_file: bool,
    pub env_file_path: String,

    /// Bearer token accepted by the API in addition to runtime tokens
    pub auth_token: Option<String>,

    // LLM backends
    pub default_provider: Option<String>,
    pub ollama_model: Option<String>,
    pub ollama_host: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: Option<String>,

    /// `duckduckgo` or `mock`
    pub search_provider: String,

    /// Serve every request from the mock LLM and mock search
    pub test_mode: bool,

    // Rate limiting, per key per minute
    pub max_requests_per_minute: u32,
    pub max_llm_requests_per_minute: u32,
    pub max_unauth_requests_per_minute: u32,

    /// Lifetime of cached GET responses
    pub cache_ttl_secs: u64,
    /// Peer base URLs for the distributed response cache
    pub cache_peers: Vec<String>,

    /// Maximum request body size in bytes (default: 16MB)
    pub max_request_body_size: usize,
    pub request_timeout_secs: u64,
    /// How long `stop` waits for in-flight connections
    pub shutdown_timeout_secs: u64,
    /// Characters per streamed completion chunk
    pub stream_chunk_size: usize,
}

impl Default for SonarConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            hostname: "0.0.0.0".to_string(),
            log_level: LogLevel::Info,
            log_format: LogFormat::Text,
            load_env_file: true,
            env_file_path: ".env".to_string(),
            auth_token: None,
            default_provider: None,
            ollama_model: None,
            ollama_host: None,
            openai_api_key: None,
            openai_model: None,
            anthropic_api_key: None,
            anthropic_model: None,
            search_provider: "duckduckgo".to_string(),
            test_mode: false,
            max_requests_per_minute: 60,
            max_llm_requests_per_minute: 20,
            max_unauth_requests_per_minute: 30,
            cache_ttl_secs: 300,
            cache_peers: Vec::new(),
            max_request_body_size: 16 * 1024 * 1024, // 16MB
            request_timeout_secs: 300,
            shutdown_timeout_secs: 30,
            stream_chunk_size: 16,
        }
    }
}

impl SonarConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(&EnvSource::process());
        config
    }

    /// Load configuration from a JSON file; missing fields keep defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> SonarResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SonarError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| SonarError::Config(format!("Failed to parse config JSON: {}", e)))
    }

    /// Override every field `env` sets
    pub fn apply_env(&mut self, env: &EnvSource) {
        if let Some(port) = env.get_parsed("PORT") {
            self.port = port;
        }
        if let Some(host) = env.get_string("HOST") {
            self.hostname = host;
        }
        if let Some(level) = env.get("LOG_LEVEL") {
            self.log_level = LogLevel::from_name(level);
        }
        if let Some(format) = env.get_parsed("LOG_FORMAT") {
            self.log_format = format;
        }
        if let Some(search) = env.get_string("SEARCH_PROVIDER") {
            self.search_provider = search;
        }
        if let Some(rpm) = env.get_parsed("MAX_REQUESTS_PER_MINUTE") {
            self.max_requests_per_minute = rpm;
        }
        if let Some(rpm) = env.get_parsed("MAX_LLM_REQUESTS_PER_MINUTE") {
            self.max_llm_requests_per_minute = rpm;
        }
        if let Some(rpm) = env.get_parsed("MAX_UNAUTH_REQUESTS_PER_MINUTE") {
            self.max_unauth_requests_per_minute = rpm;
        }
        if let Some(peers) = env.get_list("CACHE_PEERS") {
            self.cache_peers = peers;
        }
        if let Some(test_mode) = env.get_bool("TEST_MODE") {
            self.test_mode = test_mode;
        }

        let optional = [
            ("AUTH_TOKEN", &mut self.auth_token),
            ("DEFAULT_LLM_PROVIDER", &mut self.default_provider),
            ("OLLAMA_MODEL", &mut self.ollama_model),
            ("OLLAMA_HOST", &mut self.ollama_host),
            ("OPENAI_API_KEY", &mut self.openai_api_key),
            ("OPENAI_MODEL", &mut self.openai_model),
            ("ANTHROPIC_API_KEY", &mut self.anthropic_api_key),
            ("ANTHROPIC_MODEL", &mut self.anthropic_model),
        ];
        for (key, field) in optional {
            if let Some(value) = env.get_string(key) {
                *field = Some(value);
            }
        }
    }

    /// Fill only the optional fields that are still unset, and turn on test
    /// mode when `TEST_MODE` asks for it
    pub fn merge_env(&mut self, env: &EnvSource) {
        let optional = [
            ("AUTH_TOKEN", &mut self.auth_token),
            ("DEFAULT_LLM_PROVIDER", &mut self.default_provider),
            ("OLLAMA_MODEL", &mut self.ollama_model),
            ("OLLAMA_HOST", &mut self.ollama_host),
            ("OPENAI_API_KEY", &mut self.openai_api_key),
            ("OPENAI_MODEL", &mut self.openai_model),
            ("ANTHROPIC_API_KEY", &mut self.anthropic_api_key),
            ("ANTHROPIC_MODEL", &mut self.anthropic_model),
        ];
        for (key, field) in optional {
            if field.is_none() {
                *field = env.get_string(key);
            }
        }
        if self.cache_peers.is_empty() {
            self.cache_peers = env.get_list("CACHE_PEERS").unwrap_or_default();
        }
        if env.get_bool("TEST_MODE") == Some(true) {
            self.test_mode = true;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> SonarResult<()> {
        if self.hostname.is_empty() {
            return Err(SonarError::Config("Hostname cannot be empty".to_string()));
        }
        if self.max_request_body_size == 0 {
            return Err(SonarError::Config(
                "Maximum request body size must be > 0".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(SonarError::Config("Request timeout must be > 0".to_string()));
        }
        if self.stream_chunk_size == 0 {
            return Err(SonarError::Config("Stream chunk size must be > 0".to_string()));
        }
        if self.max_requests_per_minute == 0
            || self.max_llm_requests_per_minute == 0
            || self.max_unauth_requests_per_minute == 0
        {
            return Err(SonarError::Config("Rate limits must be > 0".to_string()));
        }
        if let Some(peer) = self
            .cache_peers
            .iter()
            .find(|p| !p.starts_with("http://") && !p.starts_with("https://"))
        {
            return Err(SonarError::Config(format!(
                "Cache peer '{}' must be an http(s) URL",
                peer
            )));
        }
        Ok(())
    }

    /// Get socket address as string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    /// URL clients on this machine reach the server at
    pub fn server_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Backend settings with defaults for everything left unset
    pub fn llm_settings(&self) -> LlmSettings {
        LlmSettings {
            default_provider: self
                .default_provider
                .clone()
                .unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
            ollama_host: self
                .ollama_host
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string()),
            ollama_model: self
                .ollama_model
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
            openai_api_key: self.openai_api_key.clone(),
            openai_model: self
                .openai_model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            anthropic_api_key: self.anthropic_api_key.clone(),
            anthropic_model: self
                .anthropic_model
                .clone()
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            test_mode: self.test_mode,
        }
    }

    // Builder-style setters

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn hostname<S: Into<String>>(mut self, hostname: S) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    pub fn with_env_file<S: Into<String>>(mut self, path: S) -> Self {
        self.load_env_file = true;
        self.env_file_path = path.into();
        self
    }

    pub fn without_env_file(mut self) -> Self {
        self.load_env_file = false;
        self
    }

    pub fn auth_token<S: Into<String>>(mut self, token: S) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Use Ollama as the default provider
    pub fn with_ollama<M: Into<String>, H: Into<String>>(mut self, model: M, host: H) -> Self {
        self.default_provider = Some("ollama".to_string());
        self.ollama_model = Some(model.into());
        self.ollama_host = Some(host.into());
        self
    }

    /// Use OpenAI as the default provider
    pub fn with_openai<K: Into<String>, M: Into<String>>(mut self, api_key: K, model: M) -> Self {
        self.default_provider = Some("openai".to_string());
        self.openai_api_key = Some(api_key.into());
        self.openai_model = Some(model.into());
        self
    }

    /// Use Anthropic as the default provider
    pub fn with_anthropic<K: Into<String>, M: Into<String>>(
        mut self,
        api_key: K,
        model: M,
    ) -> Self {
        self.default_provider = Some("anthropic".to_string());
        self.anthropic_api_key = Some(api_key.into());
        self.anthropic_model = Some(model.into());
        self
    }

    pub fn rate_limits(mut self, api: u32, llm: u32, unauthenticated: u32) -> Self {
        self.max_requests_per_minute = api;
        self.max_llm_requests_per_minute = llm;
        self.max_unauth_requests_per_minute = unauthenticated;
        self
    }

    pub fn cache_peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache_peers = peers.into_iter().map(Into::into).collect();
        self
    }

    pub fn test_mode(mut self, enabled: bool) -> Self {
        self.test_mode = enabled;
        self
    }

    pub fn max_request_body_size(mut self, size: usize) -> Self {
        self.max_request_body_size = size;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_secs = timeout.as_secs();
        self
    }

    pub fn stream_chunk_size(mut self, size: usize) -> Self {
        self.stream_chunk_size = size;
        self
    }
}
