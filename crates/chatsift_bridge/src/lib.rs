//! Hierarchical context bridge: the four-level abstraction ladder that
//! makes cloud augmentation safe. Full detail never leaves the trust
//! domain; what does leave is either a pattern-level summary or an
//! authenticated-encrypted vector.

pub mod abstraction;
pub mod encryption;
pub mod tokenizer;
pub mod validator;
pub mod vectors;

pub use abstraction::{AbstractionEngine, ContextSummary, WindowItem};
pub use encryption::EncryptionManager;
pub use tokenizer::PrivacyTokenizer;
pub use validator::{MultiLayerPrivacyValidator, ValidationReport};

use anyhow::Result;
use chatsift_core::{EnrichmentRecord, PrivacyTier};
use serde::{Deserialize, Serialize};

/// Strictly decreasing information ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstractionLevel {
    /// Local only: complete fine-grained analysis.
    FullDetail,
    /// On-device secondary analyzers.
    MediumAbstract,
    /// Cloud-safe pattern abstractions.
    HighAbstract,
    /// Encrypted vectors and phase metadata only.
    PatternOnly,
}

/// Encrypted representation of fine-grained context for cloud processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedContextVector {
    pub encrypted_semantic_vector: Vec<u8>,
    pub encrypted_emotional_vector: Vec<u8>,
    pub encrypted_relationship_vector: Vec<u8>,
    /// opening | development | climax | resolution
    pub conversation_phase: String,
    /// Hour-of-day bucket (0-23), from the window's last message.
    pub temporal_position: u32,
    /// 1-5 | 6-20 | 21-50 | 50+
    pub message_count_range: String,
    pub encryption_key_id: String,
    pub vector_dimension: usize,
    pub privacy_tier: PrivacyTier,
}

/// Multi-level enrichment bundle produced by the bridge.
#[derive(Debug, Clone, Serialize)]
pub struct HierarchicalEnrichment {
    /// Level 1: stays local.
    pub local_analysis: EnrichmentRecord,
    /// Level 3: cloud-safe summary.
    pub context_summary: ContextSummary,
    /// Level 4: encrypted vectors, present only when cloud processing was
    /// requested.
    pub encrypted_context: Option<EncryptedContextVector>,
    pub privacy_validation: ValidationReport,
    pub abstraction_chain: Vec<AbstractionLevel>,
}

/// Main entry point for hierarchical context processing.
pub struct HierarchicalContextBridge {
    abstraction: AbstractionEngine,
    encryption: Option<EncryptionManager>,
    validator: MultiLayerPrivacyValidator,
}

impl HierarchicalContextBridge {
    pub fn new(dp_epsilon: f64, enable_encryption: bool) -> Self {
        tracing::info!(dp_epsilon, enable_encryption, "Initialized context bridge");
        Self {
            abstraction: AbstractionEngine::new(dp_epsilon),
            encryption: enable_encryption.then(EncryptionManager::new),
            validator: MultiLayerPrivacyValidator,
        }
    }

    /// Deterministic variant for tests: fixes the noise seed and the
    /// tokenizer salt.
    pub fn with_seed(dp_epsilon: f64, enable_encryption: bool, seed: u64) -> Self {
        Self {
            abstraction: AbstractionEngine::with_seed(dp_epsilon, seed),
            encryption: enable_encryption.then(EncryptionManager::new),
            validator: MultiLayerPrivacyValidator,
        }
    }

    pub fn create_hierarchical_context(
        &self,
        local_enrichment: &EnrichmentRecord,
        window: &[WindowItem],
        enable_cloud_processing: bool,
    ) -> Result<HierarchicalEnrichment> {
        let context_summary = self.abstraction.create_context_summary(local_enrichment, window);

        let encrypted_context = match (&self.encryption, enable_cloud_processing) {
            (Some(manager), true) => Some(self.encrypt_context(manager, local_enrichment, window)?),
            _ => None,
        };

        let privacy_validation = self.validator.validate(
            local_enrichment,
            &context_summary,
            encrypted_context.as_ref(),
        );

        let mut abstraction_chain = vec![AbstractionLevel::FullDetail, AbstractionLevel::HighAbstract];
        if encrypted_context.is_some() {
            abstraction_chain.push(AbstractionLevel::PatternOnly);
        }

        Ok(HierarchicalEnrichment {
            local_analysis: local_enrichment.clone(),
            context_summary,
            encrypted_context,
            privacy_validation,
            abstraction_chain,
        })
    }

    fn encrypt_context(
        &self,
        manager: &EncryptionManager,
        local_enrichment: &EnrichmentRecord,
        window: &[WindowItem],
    ) -> Result<EncryptedContextVector> {
        let semantic = vectors::semantic_vector(local_enrichment);
        let emotional = vectors::emotional_vector(local_enrichment);
        let relationship = vectors::relationship_vector(local_enrichment);

        let message_count = window.len();
        let count_range = match message_count {
            0..=5 => "1-5",
            6..=20 => "6-20",
            21..=50 => "21-50",
            _ => "50+",
        };

        Ok(EncryptedContextVector {
            encrypted_semantic_vector: manager.encrypt_vector(&semantic)?,
            encrypted_emotional_vector: manager.encrypt_vector(&emotional)?,
            encrypted_relationship_vector: manager.encrypt_vector(&relationship)?,
            conversation_phase: abstraction::conversation_phase(window).to_string(),
            temporal_position: abstraction::hour_of_day(window),
            message_count_range: count_range.to_string(),
            encryption_key_id: manager.key_id().to_string(),
            vector_dimension: semantic.len(),
            privacy_tier: PrivacyTier::PatternOnly,
        })
    }
}
