use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{LlmOptions, LlmProvider, LlmSettings};
use crate::error::{CoreError, CoreResult};
use crate::models::Message;

const GENERATE_TIMEOUT: Duration = Duration::from_secs(300);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const PULL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "is_zero_f64")]
    temperature: f64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    top_p: f64,
    #[serde(skip_serializing_if = "is_zero_u32")]
    top_k: u32,
    #[serde(skip_serializing_if = "is_zero_u32")]
    num_predict: u32,
    #[serde(skip_serializing_if = "is_zero_f64")]
    presence_penalty: f64,
    #[serde(skip_serializing_if = "is_zero_f64")]
    frequency_penalty: f64,
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

impl From<&LlmOptions> for GenerateOptions {
    fn from(opts: &LlmOptions) -> Self {
        Self {
            temperature: opts.temperature,
            top_p: opts.top_p,
            top_k: opts.top_k,
            num_predict: opts.max_tokens,
            presence_penalty: opts.presence_penalty,
            frequency_penalty: opts.frequency_penalty,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(default)]
    version: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PullStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<String>,
}

/// Reachability and model inventory of an Ollama server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaStatus {
    pub available: bool,
    pub version: String,
    pub models: Vec<String>,
    pub server_time: String,
    /// The configured model is installed
    pub initialized: bool,
}

/// Split a conversation into Ollama's `(system, prompt)` pair: the last
/// system and last user message, or every line joined when there is no
/// user message
pub(crate) fn split_prompt(messages: &[Message]) -> (Option<String>, String) {
    let system = messages
        .iter()
        .rev()
        .find(|m| m.role == "system")
        .map(|m| m.content.clone());
    let prompt = messages
        .iter()
        .rev()
        .find(|m| m.role == "user" && !m.content.is_empty())
        .map(|m| m.content.clone())
        .unwrap_or_else(|| {
            messages
                .iter()
                .map(Message::as_line)
                .collect::<Vec<_>>()
                .join("\n")
        });
    (system, prompt)
}

/// Local models through the Ollama HTTP API
#[derive(Debug)]
pub struct OllamaProvider {
    host: String,
    model: RwLock<String>,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Provider for `settings`, without contacting the server
    pub fn new(settings: &LlmSettings) -> Self {
        Self {
            host: settings.ollama_host.trim_end_matches('/').to_string(),
            model: RwLock::new(settings.ollama_model.clone()),
            client: reqwest::Client::new(),
        }
    }

    /// Provider whose server is reachable and has the model, pulling the
    /// model first when it is missing
    pub async fn connect(settings: &LlmSettings) -> CoreResult<Self> {
        let provider = Self::new(settings);
        provider.verify_model(true).await?;
        info!(
            "🦙 Ollama provider initialized with model: {}",
            settings.ollama_model
        );
        Ok(provider)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub async fn model(&self) -> String {
        self.model.read().await.clone()
    }

    /// Switch to `model`, pulling it when needed
    pub async fn set_model(&self, model: &str) -> CoreResult<()> {
        *self.model.write().await = model.to_string();
        self.verify_model(true).await
    }

    /// Probe the server without failing when it is down
    pub async fn status(&self) -> OllamaStatus {
        let mut status = OllamaStatus {
            available: false,
            version: String::new(),
            models: Vec::new(),
            server_time: chrono::Utc::now().to_rfc3339(),
            initialized: false,
        };

        match self.version().await {
            Ok(version) => {
                status.available = true;
                status.version = version;
            }
            Err(e) => {
                warn!("Ollama server at {} unavailable: {}", self.host, e);
                return status;
            }
        }

        if let Ok(models) = self.list_models().await {
            let model = self.model().await;
            status.initialized = models.iter().any(|m| *m == model);
            status.models = models;
        }

        info!(
            "Ollama server check: available={}, version={}, models={}",
            status.available,
            status.version,
            status.models.len()
        );
        status
    }

    async fn version(&self) -> CoreResult<String> {
        let response = self
            .client
            .get(format!("{}/api/version", self.host))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let version: VersionResponse = response.json().await?;
        Ok(version.version)
    }

    async fn list_models(&self) -> CoreResult<Vec<String>> {
        let tags: TagsResponse = self
            .client
            .get(format!("{}/api/tags", self.host))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn verify_model(&self, auto_pull: bool) -> CoreResult<()> {
        self.version().await.map_err(|e| {
            CoreError::provider(
                "ollama",
                format!("cannot connect to Ollama server at {}: {}", self.host, e),
            )
        })?;

        let model = self.model().await;
        let models = self.list_models().await?;
        if models.iter().any(|m| *m == model) {
            return Ok(());
        }
        if !auto_pull {
            return Err(CoreError::provider(
                "ollama",
                format!("model {} is not available on this Ollama server", model),
            ));
        }

        warn!("Model {} not found, attempting to pull it...", model);
        self.pull_model(&model).await?;
        info!("Successfully pulled model: {}", model);
        Ok(())
    }

    async fn pull_model(&self, model: &str) -> CoreResult<()> {
        info!("Pulling model {} (this may take several minutes)...", model);
        let response = self
            .client
            .post(format!("{}/api/pull", self.host))
            .json(&serde_json::json!({ "name": model }))
            .timeout(PULL_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CoreError::provider(
                "ollama",
                format!("pull request failed with status: {}", response.status()),
            ));
        }

        // newline-delimited JSON progress lines
        let body = response.text().await?;
        check_pull_stream(&body)
    }
}

pub(crate) fn check_pull_stream(body: &str) -> CoreResult<()> {
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let Ok(status) = serde_json::from_str::<PullStatus>(line) else {
            break;
        };
        if let Some(error) = status.error.filter(|e| !e.is_empty()) {
            return Err(CoreError::provider("ollama", format!("pull error: {}", error)));
        }
        debug!("pull: {}", status.status);
        if status.status.contains("success") {
            break;
        }
    }
    Ok(())
}

impl LlmProvider for OllamaProvider {
    fn generate_with_options<'a>(
        &'a self,
        messages: &'a [Message],
        options: &'a LlmOptions,
    ) -> BoxFuture<'a, CoreResult<String>> {
        Box::pin(async move {
            let started = std::time::Instant::now();
            let (system, prompt) = split_prompt(messages);
            let model = self.model().await;
            let request = GenerateRequest {
                model: &model,
                prompt: &prompt,
                stream: false,
                system: system.as_deref(),
                options: Some(options.into()),
            };

            let response: GenerateResponse = self
                .client
                .post(format!("{}/api/generate", self.host))
                .json(&request)
                .timeout(GENERATE_TIMEOUT)
                .send()
                .await?
                .json()
                .await?;
            debug!("Ollama generate took {:?}", started.elapsed());

            match response.error.filter(|e| !e.is_empty()) {
                Some(error) => Err(CoreError::provider(
                    "ollama",
                    format!("ollama returned error: {}", error),
                )),
                None => Ok(response.response),
            }
        })
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
