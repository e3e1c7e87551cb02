//! Embedding providers. The two text spaces run on fastembed models; the
//! temporal and structural spaces are deterministic statistical feature
//! encoders over timing, frequency and punctuation patterns.

use crate::VectorSpace;
use anyhow::{Context, Result};
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use std::sync::Arc;

/// Seam for embedding providers, so stores and tests can swap
/// implementations.
pub trait Embedder: Send + Sync {
    /// Embed `texts` in the given space; one vector per text.
    fn embed(&self, space: VectorSpace, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Spaces this provider can serve.
    fn spaces(&self) -> Vec<VectorSpace>;
}

/// Cosine similarity between two vectors; 0.0 on mismatched or empty
/// inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

// ============================================================================
// Feature encoders (temporal / structural)
// ============================================================================

fn pad(mut features: Vec<f32>, dim: usize) -> Vec<f32> {
    features.resize(dim, 0.0);
    features
}

/// Timing/frequency/punctuation features, 256 dims.
pub fn temporal_features(text: &str) -> Vec<f32> {
    let lines: Vec<&str> = text.lines().collect();
    let words = text.split_whitespace().count() as f32;
    let header_lines = lines.iter().filter(|l| l.starts_with('[')).count() as f32;

    let features = vec![
        (text.len() as f32).ln_1p(),
        words.ln_1p(),
        lines.len() as f32,
        header_lines,
        text.matches('?').count() as f32,
        text.matches('!').count() as f32,
        text.matches('.').count() as f32,
        text.matches(',').count() as f32,
        text.matches("...").count() as f32,
        if lines.is_empty() {
            0.0
        } else {
            words / lines.len() as f32
        },
        text.chars().filter(|c| c.is_ascii_digit()).count() as f32,
    ];
    pad(features, VectorSpace::Temporal.dimension())
}

/// Speech-act style features, 128 dims.
pub fn structural_features(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let words = text.split_whitespace().count() as f32;
    let has = |needles: &[&str]| {
        if needles.iter().any(|n| lower.contains(n)) {
            1.0
        } else {
            0.0
        }
    };

    let features = vec![
        has(&["i ", "i'm", "i've"]),
        has(&["you ", "you're", "your "]),
        has(&["we ", "us ", "our "]),
        has(&["sorry", "apologize"]),
        has(&["thank", "thanks"]),
        has(&["please"]),
        has(&["no ", "not ", "never"]),
        has(&["yes", "sure", "okay", "ok "]),
        has(&["why", "how", "what", "when", "where"]),
        words.ln_1p(),
        text.matches('?').count() as f32 / words.max(1.0),
        if text
            .chars()
            .filter(|c| c.is_alphabetic())
            .take(200)
            .filter(|c| c.is_uppercase())
            .count()
            > 10
        {
            1.0
        } else {
            0.0
        },
    ];
    pad(features, VectorSpace::Structural.dimension())
}

// ============================================================================
// Providers
// ============================================================================

/// Production provider: fastembed text models for the semantic and
/// psychological spaces, feature encoders for the rest.
pub struct FastEmbedder {
    semantic: Arc<TextEmbedding>,
    psychological: Arc<TextEmbedding>,
}

impl FastEmbedder {
    pub fn new() -> Result<Self> {
        let mut semantic_options = InitOptions::default();
        semantic_options.model_name = FastEmbedModel::AllMiniLML6V2;
        semantic_options.show_download_progress = false;
        let semantic = TextEmbedding::try_new(semantic_options)
            .context("Failed to initialize semantic embedding model")?;

        let mut psych_options = InitOptions::default();
        psych_options.model_name = FastEmbedModel::BGEBaseENV15;
        psych_options.show_download_progress = false;
        let psychological = TextEmbedding::try_new(psych_options)
            .context("Failed to initialize psychological embedding model")?;

        Ok(Self {
            semantic: Arc::new(semantic),
            psychological: Arc::new(psychological),
        })
    }
}

impl Embedder for FastEmbedder {
    fn embed(&self, space: VectorSpace, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match space {
            VectorSpace::Semantic => self
                .semantic
                .embed(texts.to_vec(), None)
                .context("Semantic embedding failed"),
            VectorSpace::Psychological => self
                .psychological
                .embed(texts.to_vec(), None)
                .context("Psychological embedding failed"),
            VectorSpace::Temporal => {
                Ok(texts.iter().map(|t| temporal_features(t)).collect())
            }
            VectorSpace::Structural => {
                Ok(texts.iter().map(|t| structural_features(t)).collect())
            }
        }
    }

    fn spaces(&self) -> Vec<VectorSpace> {
        VectorSpace::ALL.to_vec()
    }
}

/// Dependency-free provider using only the feature encoders, handy for the
/// temporal/structural spaces alone or for environments without model
/// downloads.
pub struct FeatureEmbedder;

impl Embedder for FeatureEmbedder {
    fn embed(&self, space: VectorSpace, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(match space {
            VectorSpace::Temporal => texts.iter().map(|t| temporal_features(t)).collect(),
            _ => texts.iter().map(|t| structural_features(t)).collect(),
        })
    }

    fn spaces(&self) -> Vec<VectorSpace> {
        vec![VectorSpace::Temporal, VectorSpace::Structural]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn cosine_is_scale_invariant() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![2.0, 4.0, 6.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn temporal_features_have_contract_dimension() {
        let v = temporal_features("[2024-06-01 10:00] ME: are you there? yes!");
        assert_eq!(v.len(), 256);
        assert!(v[4] >= 1.0); // question marks
        assert!(v[5] >= 1.0); // exclamations
    }

    #[test]
    fn structural_features_detect_person_markers() {
        let v = structural_features("I think you should call. Thanks!");
        assert_eq!(v.len(), 128);
        assert_eq!(v[0], 1.0); // first person
        assert_eq!(v[1], 1.0); // second person
        assert_eq!(v[4], 1.0); // thanks
    }

    #[test]
    fn feature_encoders_are_deterministic() {
        let text = "same text every time";
        assert_eq!(temporal_features(text), temporal_features(text));
        assert_eq!(structural_features(text), structural_features(text));
    }
}
