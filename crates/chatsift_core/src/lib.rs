pub mod chunk;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod hash;
pub mod message;
pub mod taxonomy;

pub use chunk::{
    Chunk, ChunkMeta, ChunkMethod, EnrichmentProvenance, Provenance, RedactionProvenance,
    WindowInfo,
};
pub use config::{ChatsiftConfig, ConcurrencyConfig, ModelConfig, PolicyConfig, StorageConfig};
pub use enrichment::{
    BoundarySignal, EnrichmentRecord, Gradations, PrimaryEmotion, SpeechAct, Stance,
};
pub use error::PipelineError;
pub use message::{
    Attachment, AttachmentKind, CanonicalMessage, Reaction, ReactionKind, SourceRef,
};
pub use taxonomy::{CoOccurrenceRule, LabelTaxonomy};

use serde::{Deserialize, Serialize};

/// Visibility tier attached to chunks, enrichments and vector-store entries.
///
/// Ordering is most-restrictive-first: a batch inherits the most restrictive
/// tier of its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyTier {
    LocalOnly,
    CloudSafe,
    PatternOnly,
}

impl PrivacyTier {
    /// Most restrictive of two tiers. `LocalOnly` dominates everything;
    /// `PatternOnly` carries the least information and dominates nothing.
    pub fn most_restrictive(self, other: PrivacyTier) -> PrivacyTier {
        self.min(other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyTier::LocalOnly => "local_only",
            PrivacyTier::CloudSafe => "cloud_safe",
            PrivacyTier::PatternOnly => "pattern_only",
        }
    }
}

impl std::str::FromStr for PrivacyTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_only" => Ok(PrivacyTier::LocalOnly),
            "cloud_safe" => Ok(PrivacyTier::CloudSafe),
            "pattern_only" => Ok(PrivacyTier::PatternOnly),
            other => Err(format!("unknown privacy tier: {other}")),
        }
    }
}
