//! Policy Shield: PII detection, pseudonymization, coverage accounting and
//! differentially-private aggregation. Every cross-boundary data movement
//! goes through this crate.

pub mod dp;
pub mod hardfail;
pub mod patterns;
pub mod policy;
pub mod tokenizer;

pub use dp::{
    DifferentialPrivacyEngine, DpResult, DpValue, NoiseDistribution, PrivacyBudget, QueryType,
    StatisticalQuery,
};
pub use hardfail::{DetectionResult, HardFailClass, HardFailDetector, ThreatLevel};
pub use patterns::{PiiDetector, PiiKind, PiiMatch};
pub use policy::{ChunkRedaction, PolicyShield, PrivacySafeSummary, RedactionReport};
pub use tokenizer::{load_or_create_salt, ConsistentTokenizer};
