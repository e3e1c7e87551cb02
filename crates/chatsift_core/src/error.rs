use thiserror::Error;

/// Failure taxonomy for the pipeline. Errors resolve at the finest
/// reasonable boundary: a per-chunk error never fails the conversation and
/// a per-conversation error never fails the run. The fatal-only kinds are
/// `SourceUnreadable` at extraction entry, `BudgetExhausted` when the
/// ledger is hard-capped, and `HardFailContent` at confirmed level.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source unreadable: {0}")]
    SourceUnreadable(String),

    #[error("schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("hard-fail content ({level}): {classes:?}")]
    HardFailContent { classes: Vec<String>, level: String },

    #[error("coverage {coverage:.4} below threshold {threshold:.4}")]
    CoverageBelowThreshold { coverage: f64, threshold: f64 },

    #[error("model error (retryable): {0}")]
    ModelRetryable(String),

    #[error("model error: {0}")]
    ModelTerminal(String),

    #[error("privacy budget exhausted for query {0}")]
    BudgetExhausted(String),

    #[error("visibility leak: {0}")]
    VisibilityLeak(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl PipelineError {
    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::ModelRetryable(_))
    }
}
