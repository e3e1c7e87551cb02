//! Per-chunk enrichment artifact shared between the pipeline, the context
//! bridge and the indexer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechAct {
    Ask,
    Inform,
    Promise,
    Refuse,
    Apologize,
    Propose,
    Meta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryEmotion {
    Joy,
    Anger,
    Fear,
    Sadness,
    Disgust,
    Surprise,
    Neutral,
}

impl Default for PrimaryEmotion {
    fn default() -> Self {
        PrimaryEmotion::Neutral
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Supportive,
    Neutral,
    Challenging,
}

impl Default for Stance {
    fn default() -> Self {
        Stance::Neutral
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundarySignal {
    None,
    Set,
    Test,
    Violate,
    Reinforce,
}

impl Default for BoundarySignal {
    fn default() -> Self {
        BoundarySignal::None
    }
}

/// Scalar gradations, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Gradations {
    pub certainty: f64,
    pub directness: f64,
    pub intensity: f64,
}

/// The full analysis artifact emitted by the four-pass pipeline for one
/// chunk. Coarse labels are cloud-safe; fine labels never leave the local
/// trust domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub chunk_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_act: Option<SpeechAct>,
    #[serde(default)]
    pub emotion_primary: PrimaryEmotion,
    #[serde(default)]
    pub stance: Stance,
    #[serde(default)]
    pub boundary_signal: BoundarySignal,
    #[serde(default)]
    pub repair_attempt: bool,
    #[serde(default)]
    pub gradations: Gradations,
    #[serde(default)]
    pub labels_coarse: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels_fine_local: Vec<String>,
    pub confidence_llm: f64,
    /// Model identifier that produced the record.
    pub model: String,
    /// Hash of prompt + model config for provenance.
    pub prompt_hash: String,
    /// Pass name → pass-specific metadata.
    #[serde(default)]
    pub pass_meta: BTreeMap<String, serde_json::Value>,
}

impl EnrichmentRecord {
    pub fn empty(chunk_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            speech_act: None,
            emotion_primary: PrimaryEmotion::Neutral,
            stance: Stance::Neutral,
            boundary_signal: BoundarySignal::None,
            repair_attempt: false,
            gradations: Gradations::default(),
            labels_coarse: Vec::new(),
            labels_fine_local: Vec::new(),
            confidence_llm: 0.0,
            model: model.into(),
            prompt_hash: String::new(),
            pass_meta: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_serialize_lowercase() {
        assert_eq!(
            serde_json::to_value(SpeechAct::Apologize).unwrap(),
            serde_json::json!("apologize")
        );
        assert_eq!(
            serde_json::to_value(BoundarySignal::Reinforce).unwrap(),
            serde_json::json!("reinforce")
        );
    }

    #[test]
    fn empty_record_is_neutral() {
        let rec = EnrichmentRecord::empty("ch_1", "gemma2");
        assert_eq!(rec.emotion_primary, PrimaryEmotion::Neutral);
        assert_eq!(rec.confidence_llm, 0.0);
        assert!(rec.labels_coarse.is_empty());
    }
}
