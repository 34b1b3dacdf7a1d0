#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::chat::{ChatModel, PromptMessage};
use crate::config::Config;
use crate::retrieval::{CollaboratorError, EmbeddingGateway};

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;

const DEFAULT_TIMEOUT_SECONDS: u64 = 120;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// Blocking HTTP client for an Ollama server, used both for embeddings and
/// for chat completions. The async trait impls run each call on the
/// blocking thread pool.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    chat_model: String,
    temperature: f32,
    max_tokens: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
    retry_delay: Duration,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
    pub details: Option<ModelDetails>,
}

#[derive(Debug, Deserialize)]
pub struct ModelDetails {
    pub format: Option<String>,
    pub family: Option<String>,
    pub families: Option<Vec<String>>,
    pub parameter_size: Option<String>,
    pub quantization_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.ollama.model.clone(),
            chat_model: config.chat.model.clone(),
            temperature: config.chat.temperature,
            max_tokens: config.chat.max_tokens,
            agent: build_agent(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base delay before the first retry; doubles on each later attempt
    #[inline]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Test connection to the Ollama server and verify both models are
    /// available
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models().context("Server ping failed")?;

        for wanted in [&self.model, &self.chat_model] {
            if !models.iter().any(|m| &m.name == wanted) {
                let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
                warn!(
                    "Model {} not found. Available models: {:?}",
                    wanted, available
                );
                return Err(anyhow::anyhow!(
                    "Model '{}' is not available. Available models: {:?}",
                    wanted,
                    available
                ));
            }
        }

        info!(
            "Health check passed for Ollama server at {} with models {} and {}",
            self.base_url, self.model, self.chat_model
        );
        Ok(())
    }

    /// Ping the Ollama server to check if it's responsive
    #[inline]
    pub fn ping(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/api/version")
            .context("Failed to build ping URL")?;

        debug!("Pinging Ollama server at {}", url);

        self.make_request_with_retry(|| {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to ping Ollama server")?;

        debug!("Server ping successful");
        Ok(())
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Embed a single text with the configured embedding model
    #[inline]
    pub fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());

        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        let request_json = serde_json::to_string(&EmbedRequest {
            model: &self.model,
            input: text,
        })
        .context("Failed to serialize embedding request")?;

        let response_text = self
            .post_json(&url, &request_json)
            .context("Failed to generate embedding")?;

        let embed_response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        let embedding = embed_response
            .embeddings
            .into_iter()
            .next()
            .filter(|embedding| !embedding.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Ollama returned no embedding"))?;

        debug!("Generated embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }

    /// Non-streaming chat completion with the configured chat model
    #[inline]
    pub fn generate_chat(&self, messages: &[PromptMessage]) -> Result<String> {
        debug!("Requesting chat completion over {} messages", messages.len());

        let url = self
            .base_url
            .join("/api/chat")
            .context("Failed to build chat URL")?;

        let request_json = serde_json::to_string(&ChatRequest {
            model: &self.chat_model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        })
        .context("Failed to serialize chat request")?;

        let response_text = self
            .post_json(&url, &request_json)
            .context("Failed to generate chat completion")?;

        let chat_response: ChatResponse =
            serde_json::from_str(&response_text).context("Failed to parse chat response")?;

        debug!(
            "Chat completion returned {} characters",
            chat_response.message.content.len()
        );
        Ok(chat_response.message.content)
    }

    fn post_json(&self, url: &Url, body: &str) -> Result<String> {
        self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => false,
                    };

                    if !should_retry {
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay = self.retry_delay * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

#[async_trait]
impl EmbeddingGateway for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        let client = self.clone();
        let text = text.to_owned();

        tokio::task::spawn_blocking(move || client.generate_embedding(&text))
            .await
            .map_err(|e| CollaboratorError::Embedding(format!("Embedding task failed: {}", e)))?
            .map_err(|e| CollaboratorError::Embedding(format!("{:#}", e)))
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, CollaboratorError> {
        let client = self.clone();
        let messages = messages.to_vec();

        tokio::task::spawn_blocking(move || client.generate_chat(&messages))
            .await
            .map_err(|e| CollaboratorError::Model(format!("Chat task failed: {}", e)))?
            .map_err(|e| CollaboratorError::Model(format!("{:#}", e)))
    }
}
