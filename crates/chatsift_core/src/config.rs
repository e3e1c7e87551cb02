use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChatsiftConfig {
    pub policy: PolicyConfig,
    pub model: ModelConfig,
    pub concurrency: ConcurrencyConfig,
    pub storage: StorageConfig,
}

impl ChatsiftConfig {
    /// Load config from a TOML file, falling back to defaults for missing
    /// fields. Env var overrides are applied after loading.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: ChatsiftConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if the file doesn't exist, return defaults
    /// with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CHATSIFT_MODEL") {
            self.model.name = v;
        }
        if let Ok(v) = std::env::var("CHATSIFT_TEMPERATURE") {
            if let Ok(n) = v.parse() {
                self.model.temperature = n;
            }
        }
        if let Ok(v) = std::env::var("CHATSIFT_DP_EPSILON") {
            if let Ok(n) = v.parse() {
                self.policy.dp_epsilon = n;
            }
        }
        if let Ok(v) = std::env::var("CHATSIFT_STRICT") {
            self.policy.strict_mode = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("CHATSIFT_MAX_CONCURRENT") {
            if let Ok(n) = v.parse() {
                self.concurrency.max_concurrent_requests = n;
            }
        }
        if let Ok(v) = std::env::var("CHATSIFT_DATA_DIR") {
            self.storage.rebase(PathBuf::from(v));
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

/// Privacy policy knobs for the Policy Shield.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Coverage threshold (fraction of tokens that must survive redaction).
    pub threshold: f64,
    /// Use the 0.999 threshold instead of `threshold`.
    pub strict_mode: bool,
    pub block_hard_fail: bool,
    pub pseudonymize: bool,
    pub detect_names: bool,
    pub opaque_tokens: bool,
    pub enable_differential_privacy: bool,
    pub dp_epsilon: f64,
    pub dp_delta: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            threshold: 0.995,
            strict_mode: false,
            block_hard_fail: true,
            pseudonymize: true,
            detect_names: true,
            opaque_tokens: true,
            enable_differential_privacy: true,
            dp_epsilon: 1.0,
            dp_delta: 1e-6,
        }
    }
}

impl PolicyConfig {
    /// Effective coverage threshold under the current mode.
    pub fn effective_threshold(&self) -> f64 {
        if self.strict_mode {
            0.999
        } else {
            self.threshold
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub temperature: f32,
    pub seed: i64,
    pub num_predict: u32,
    pub context_window: u32,
    pub top_k: u32,
    pub top_p: f32,
    pub repeat_penalty: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gemma2:9b-instruct-q4_K_M".to_string(),
            temperature: 0.0,
            seed: 42,
            num_predict: 800,
            context_window: 8192,
            top_k: 1,
            top_p: 0.1,
            repeat_penalty: 1.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_requests: usize,
    pub request_timeout_s: u64,
    pub retry_attempts: u32,
    pub backoff_initial_s: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 4,
            request_timeout_s: 30,
            retry_attempts: 3,
            backoff_initial_s: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub graph_uri: String,
    pub graph_auth: Option<String>,
    pub pool_size: u32,
    pub pool_lifetime_s: u64,
    pub pool_acquisition_timeout_s: u64,
    pub vector_dir: PathBuf,
    pub salt_file: PathBuf,
    pub ledger_file: PathBuf,
    pub sidecar_dir: PathBuf,
    pub report_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = PathBuf::from("./.chatsift");
        Self {
            graph_uri: "sqlite://.chatsift/graph.db".to_string(),
            graph_auth: None,
            pool_size: 100,
            pool_lifetime_s: 300,
            pool_acquisition_timeout_s: 60,
            vector_dir: base.join("vectors"),
            salt_file: base.join("salt"),
            ledger_file: base.join("dp_ledger.json"),
            sidecar_dir: base.join("sidecar"),
            report_dir: base.join("reports"),
        }
    }
}

impl StorageConfig {
    /// Move every on-disk location under a new base directory.
    pub fn rebase(&mut self, base: PathBuf) {
        self.graph_uri = format!("sqlite://{}", base.join("graph.db").display());
        self.vector_dir = base.join("vectors");
        self.salt_file = base.join("salt");
        self.ledger_file = base.join("dp_ledger.json");
        self.sidecar_dir = base.join("sidecar");
        self.report_dir = base.join("reports");
    }
}
