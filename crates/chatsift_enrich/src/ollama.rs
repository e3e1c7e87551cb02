//! Ollama chat client: `/api/chat` with deterministic sampling options,
//! JSON-schema constrained output, a concurrency semaphore and retry with
//! exponential backoff.

use crate::retry::{with_retry, RetryConfig};
use crate::ModelError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chatsift_core::{ConcurrencyConfig, ModelConfig};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Per-request overrides on top of the configured model defaults.
#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub num_predict: u32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            num_predict: 800,
        }
    }
}

/// The model seam: the enrichment pipeline and the RAG engine only depend
/// on this trait, so tests swap in a mock.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One chat turn. `schema` constrains the response to a JSON schema
    /// (Ollama structured output); the returned string is the raw message
    /// content.
    async fn generate(
        &self,
        prompt: &str,
        schema: Option<Value>,
        opts: GenerateOptions,
    ) -> Result<String, ModelError>;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, Default)]
pub struct ClientMetrics {
    pub requests_processed: u64,
    pub error_count: u64,
    pub total_latency_ms: u64,
}

pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: ModelConfig,
    semaphore: Arc<Semaphore>,
    retry: RetryConfig,
    metrics: std::sync::Mutex<ClientMetrics>,
}

impl OllamaClient {
    pub fn new(model: ModelConfig, concurrency: &ConcurrencyConfig) -> Result<Self> {
        let base_url = std::env::var("OLLAMA_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:11434".to_string())
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(concurrency.request_timeout_s))
            .build()
            .context("Failed to build HTTP client")?;

        tracing::info!(
            base_url,
            model = %model.name,
            max_concurrent = concurrency.max_concurrent_requests,
            "Initialized Ollama client"
        );

        Ok(Self {
            client,
            base_url,
            semaphore: Arc::new(Semaphore::new(concurrency.max_concurrent_requests.max(1))),
            retry: RetryConfig {
                max_attempts: concurrency.retry_attempts.max(1),
                initial_delay: Duration::from_secs(concurrency.backoff_initial_s),
                backoff_factor: 2.0,
            },
            model,
            metrics: std::sync::Mutex::new(ClientMetrics::default()),
        })
    }

    pub fn metrics(&self) -> ClientMetrics {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// GET /api/tags: server availability and model presence.
    pub async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .context("Ollama server unreachable")?;
        if !response.status().is_success() {
            return Ok(false);
        }
        let body: Value = response.json().await.context("Invalid /api/tags body")?;
        let available = body["models"]
            .as_array()
            .map(|models| {
                models.iter().any(|m| {
                    m["name"]
                        .as_str()
                        .map(|n| n.contains(&self.model.name) || self.model.name.contains(n))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false);
        Ok(available)
    }

    fn build_payload(&self, prompt: &str, schema: Option<&Value>, opts: GenerateOptions) -> Value {
        let mut payload = json!({
            "model": self.model.name,
            "messages": [{"role": "user", "content": prompt}],
            "options": {
                "temperature": opts.temperature,
                "seed": self.model.seed,
                "num_predict": opts.num_predict,
                "top_k": self.model.top_k,
                "top_p": self.model.top_p,
                "repeat_penalty": self.model.repeat_penalty,
            },
            "stream": false,
        });
        if let Some(schema) = schema {
            payload["format"] = schema.clone();
        }
        payload
    }

    async fn chat_once(&self, payload: &Value) -> Result<String, ModelError> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ModelError::Retryable(format!("network: {e}"))
                } else {
                    ModelError::Terminal(format!("request: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {}", body.chars().take(200).collect::<String>());
            return if is_retryable_status(status) {
                Err(ModelError::Retryable(message))
            } else {
                Err(ModelError::Terminal(message))
            };
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ModelError::Terminal(format!("invalid response JSON: {e}")))?;
        let content = body["message"]["content"]
            .as_str()
            .ok_or_else(|| ModelError::Terminal("missing message.content".to_string()))?;
        if content.is_empty() {
            return Err(ModelError::Terminal("empty model response".to_string()));
        }
        Ok(content.to_string())
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::REQUEST_TIMEOUT
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

#[async_trait]
impl ChatModel for OllamaClient {
    async fn generate(
        &self,
        prompt: &str,
        schema: Option<Value>,
        opts: GenerateOptions,
    ) -> Result<String, ModelError> {
        // Requests beyond the concurrency limit suspend here.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ModelError::Terminal("client shut down".to_string()))?;

        let payload = self.build_payload(prompt, schema.as_ref(), opts);
        let started = std::time::Instant::now();
        let result = with_retry(&self.retry, "ollama", || self.chat_once(&payload)).await;

        let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        metrics.requests_processed += 1;
        metrics.total_latency_ms += started.elapsed().as_millis() as u64;
        if result.is_err() {
            metrics.error_count += 1;
        }
        result
    }

    fn model_name(&self) -> &str {
        &self.model.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OllamaClient {
        OllamaClient::new(ModelConfig::default(), &ConcurrencyConfig::default()).unwrap()
    }

    #[test]
    fn payload_matches_chat_contract() {
        let c = client();
        let schema = json!({"type": "object"});
        let payload = c.build_payload(
            "analyze this",
            Some(&schema),
            GenerateOptions {
                temperature: 0.15,
                num_predict: 500,
            },
        );

        assert_eq!(payload["model"], "gemma2:9b-instruct-q4_K_M");
        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(payload["messages"][0]["content"], "analyze this");
        assert_eq!(payload["options"]["seed"], 42);
        assert_eq!(payload["options"]["top_k"], 1);
        assert_eq!(payload["options"]["num_predict"], 500);
        assert_eq!(payload["stream"], false);
        assert_eq!(payload["format"], schema);
    }

    #[test]
    fn payload_omits_format_without_schema() {
        let c = client();
        let payload = c.build_payload("hi", None, GenerateOptions::default());
        assert!(payload.get("format").is_none());
    }

    #[test]
    fn retryable_statuses_are_classified() {
        for code in [429u16, 408, 500, 502, 503, 504] {
            assert!(is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
        for code in [400u16, 401, 403, 404] {
            assert!(!is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
    }
}
