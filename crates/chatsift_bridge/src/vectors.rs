//! Fixed-dimension feature vectors extracted from an enrichment record.
//! These are the pattern-only payloads: semantic 128, emotional 64,
//! relationship 32 dims.

use chatsift_core::{BoundarySignal, EnrichmentRecord, PrimaryEmotion, Stance};

pub const SEMANTIC_DIM: usize = 128;
pub const EMOTIONAL_DIM: usize = 64;
pub const RELATIONSHIP_DIM: usize = 32;

/// Coarse labels that anchor the first semantic feature positions.
const ANCHOR_LABELS: &[&str] = &[
    "stress",
    "intimacy",
    "conflict",
    "support",
    "planning",
    "social",
    "work",
    "family",
    "health",
    "emotion",
    "communication",
    "time",
    "attention",
    "boundaries",
    "trust",
    "respect",
    "care",
    "growth",
];

fn pad(mut features: Vec<f32>, dim: usize) -> Vec<f32> {
    features.resize(dim, 0.0);
    features
}

pub fn semantic_vector(record: &EnrichmentRecord) -> Vec<f32> {
    let mut features: Vec<f32> = ANCHOR_LABELS
        .iter()
        .map(|label| {
            if record.labels_coarse.iter().any(|l| l == label) {
                1.0
            } else {
                0.0
            }
        })
        .collect();
    features.push(record.confidence_llm as f32);
    pad(features, SEMANTIC_DIM)
}

pub fn emotional_vector(record: &EnrichmentRecord) -> Vec<f32> {
    let mut features = match record.emotion_primary {
        PrimaryEmotion::Joy => vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        PrimaryEmotion::Sadness => vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        PrimaryEmotion::Anger => vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
        PrimaryEmotion::Fear => vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
        PrimaryEmotion::Disgust => vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        PrimaryEmotion::Surprise => vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        PrimaryEmotion::Neutral => vec![0.0; 6],
    };
    features.push(record.gradations.directness as f32);
    features.push(record.gradations.certainty as f32);
    features.push(record.gradations.intensity as f32);
    pad(features, EMOTIONAL_DIM)
}

pub fn relationship_vector(record: &EnrichmentRecord) -> Vec<f32> {
    let mut features = match record.boundary_signal {
        BoundarySignal::Set => vec![1.0, 0.0, 0.0, 0.0],
        BoundarySignal::Test => vec![0.0, 1.0, 0.0, 0.0],
        BoundarySignal::Violate => vec![0.0, 0.0, 1.0, 0.0],
        BoundarySignal::Reinforce => vec![0.0, 0.0, 0.0, 1.0],
        BoundarySignal::None => vec![0.0; 4],
    };
    features.push(if record.repair_attempt { 1.0 } else { 0.0 });
    features.extend(match record.stance {
        Stance::Supportive => [1.0, 0.0, 0.0],
        Stance::Challenging => [0.0, 1.0, 0.0],
        Stance::Neutral => [0.0, 0.0, 1.0],
    });
    pad(features, RELATIONSHIP_DIM)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> EnrichmentRecord {
        let mut record = EnrichmentRecord::empty("ch_1", "m");
        record.labels_coarse = vec!["stress".to_string(), "trust".to_string()];
        record.emotion_primary = PrimaryEmotion::Anger;
        record.boundary_signal = BoundarySignal::Set;
        record.stance = Stance::Supportive;
        record.repair_attempt = true;
        record.confidence_llm = 0.75;
        record
    }

    #[test]
    fn vectors_have_contract_dimensions() {
        let r = record();
        assert_eq!(semantic_vector(&r).len(), SEMANTIC_DIM);
        assert_eq!(emotional_vector(&r).len(), EMOTIONAL_DIM);
        assert_eq!(relationship_vector(&r).len(), RELATIONSHIP_DIM);
    }

    #[test]
    fn semantic_anchors_reflect_labels() {
        let v = semantic_vector(&record());
        // stress is position 0, trust position 14.
        assert_eq!(v[0], 1.0);
        assert_eq!(v[14], 1.0);
        assert_eq!(v[2], 0.0);
    }

    #[test]
    fn emotional_one_hot_matches_emotion() {
        let v = emotional_vector(&record());
        assert_eq!(v[2], 1.0);
        assert_eq!(v[0], 0.0);
    }

    #[test]
    fn relationship_features_encode_signals() {
        let v = relationship_vector(&record());
        assert_eq!(v[0], 1.0); // boundary set
        assert_eq!(v[4], 1.0); // repair attempt
        assert_eq!(v[5], 1.0); // supportive stance
    }
}
