//! Multi-pass enrichment: a four-stage analyzer (entities → structure →
//! psychology → relationships) over redacted chunks, backed by a local
//! Ollama model with bounded concurrency.

pub mod gate;
pub mod mock;
pub mod ollama;
pub mod passes;
pub mod pipeline;
pub mod retry;

pub use gate::{ConfidenceDistribution, ConfidenceGate, GateDecision};
pub use mock::MockModel;
pub use ollama::{ChatModel, GenerateOptions, OllamaClient};
pub use passes::{PassResult, PassType};
pub use pipeline::{EnrichmentContext, EnrichmentOutcome, MultiPassPipeline};

use thiserror::Error;

/// Model-call failures, split by whether a retry with backoff may help.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// Rate limits, 5xx, timeouts, connection resets.
    #[error("retryable model error: {0}")]
    Retryable(String),
    /// Malformed responses, schema-noncompliant JSON, 4xx.
    #[error("terminal model error: {0}")]
    Terminal(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Retryable(_))
    }
}
