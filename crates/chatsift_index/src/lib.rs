//! Multi-vector indexing: four parallel embedding spaces per contact with
//! privacy-tier tagging, weighted-fusion search and psychology insights.

pub mod embedding;
pub mod store;

pub use embedding::{cosine_similarity, Embedder, FastEmbedder, FeatureEmbedder};
pub use store::{IndexStats, PsychologyInsights, SearchResult, SpaceStats, SqliteVectorStore};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The four logical embedding spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorSpace {
    Semantic,
    Psychological,
    Temporal,
    Structural,
}

impl VectorSpace {
    pub const ALL: [VectorSpace; 4] = [
        VectorSpace::Semantic,
        VectorSpace::Psychological,
        VectorSpace::Temporal,
        VectorSpace::Structural,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VectorSpace::Semantic => "semantic",
            VectorSpace::Psychological => "psychological",
            VectorSpace::Temporal => "temporal",
            VectorSpace::Structural => "structural",
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            VectorSpace::Semantic => 384,
            VectorSpace::Psychological => 768,
            VectorSpace::Temporal => 256,
            VectorSpace::Structural => 128,
        }
    }

    /// Which batch tiers the space admits. The temporal space is strictly
    /// local: it is skipped for cloud-safe batches.
    pub fn admits_cloud_safe(&self) -> bool {
        !matches!(self, VectorSpace::Temporal)
    }
}

/// Store configuration, including the default fusion weights.
#[derive(Debug, Clone)]
pub struct MultiVectorConfig {
    pub batch_size: usize,
    pub weights: BTreeMap<VectorSpace, f64>,
}

impl Default for MultiVectorConfig {
    fn default() -> Self {
        let mut weights = BTreeMap::new();
        weights.insert(VectorSpace::Semantic, 0.4);
        weights.insert(VectorSpace::Psychological, 0.3);
        weights.insert(VectorSpace::Temporal, 0.2);
        weights.insert(VectorSpace::Structural, 0.1);
        Self {
            batch_size: 50,
            weights,
        }
    }
}
