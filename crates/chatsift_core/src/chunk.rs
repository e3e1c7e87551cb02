//! Windowed chunk model and the provenance subtree later stages append to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SCHEMA_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMethod {
    Turns,
    Daily,
    Fixed,
    Semantic,
}

impl ChunkMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkMethod::Turns => "turns",
            ChunkMethod::Daily => "daily",
            ChunkMethod::Fixed => "fixed",
            ChunkMethod::Semantic => "semantic",
        }
    }
}

/// Window descriptor for a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowInfo {
    pub method: ChunkMethod,
    pub index: usize,
    pub overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub contact: String,
    pub platform: String,
    pub date_start: DateTime<Utc>,
    pub date_end: DateTime<Utc>,
    pub message_ids: Vec<String>,
    /// Cloud-safe labels. Populated by enrichment.
    #[serde(default)]
    pub labels_coarse: Vec<String>,
    /// Local-only labels. Absent or empty on anything cloud-bound.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels_fine_local: Vec<String>,
    pub char_count: usize,
    /// ≈ 1.3 × word count.
    pub token_estimate: f64,
    pub window: WindowInfo,
}

/// Redaction record appended under `provenance.redaction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionProvenance {
    pub coverage: f64,
    pub tokens_redacted: usize,
    pub pii_kinds: Vec<String>,
    pub threshold_met: bool,
}

/// Enrichment record appended under `provenance.enrichment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentProvenance {
    pub method: String,
    pub pipeline_version: String,
    pub passes: usize,
    pub model: String,
    pub prompt_hash: String,
    pub confidence: f64,
    /// Pass name → duration in milliseconds.
    #[serde(default)]
    pub pass_durations_ms: BTreeMap<String, u64>,
}

/// Immutable origin metadata; later stages add subtrees but never mutate
/// earlier fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub schema_v: String,
    pub run_id: String,
    pub source_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redaction: Option<RedactionProvenance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentProvenance>,
}

impl Provenance {
    pub fn new(run_id: impl Into<String>, source_hash: impl Into<String>) -> Self {
        Self {
            schema_v: SCHEMA_VERSION.to_string(),
            run_id: run_id.into(),
            source_hash: source_hash.into(),
            redaction: None,
            enrichment: None,
        }
    }
}

/// A windowed group of messages with concatenated text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub conv_id: String,
    pub text: String,
    pub meta: ChunkMeta,
    pub provenance: Provenance,
}

impl Chunk {
    /// Whitespace token count of the chunk text.
    pub fn token_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_chunk() -> Chunk {
        let ts = Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap();
        Chunk {
            chunk_id: "ch_0a1b2c3d".to_string(),
            conv_id: "conv-1".to_string(),
            text: "[2024-05-02 09:30] ME: hello there".to_string(),
            meta: ChunkMeta {
                contact: "alex".to_string(),
                platform: "imessage".to_string(),
                date_start: ts,
                date_end: ts,
                message_ids: vec!["1".to_string()],
                labels_coarse: vec![],
                labels_fine_local: vec![],
                char_count: 34,
                token_estimate: 5.2,
                window: WindowInfo {
                    method: ChunkMethod::Turns,
                    index: 0,
                    overlap: 0,
                },
            },
            provenance: Provenance::new("run-1", "abc123def456"),
        }
    }

    #[test]
    fn empty_fine_labels_are_omitted_from_json() {
        let chunk = sample_chunk();
        let json = serde_json::to_value(&chunk).unwrap();
        assert!(json["meta"].get("labels_fine_local").is_none());
        assert_eq!(json["meta"]["window"]["method"], "turns");
        assert_eq!(json["provenance"]["schema_v"], SCHEMA_VERSION);
    }

    #[test]
    fn fine_labels_survive_round_trip_when_present() {
        let mut chunk = sample_chunk();
        chunk.meta.labels_fine_local.push("substances".to_string());
        let json = serde_json::to_string(&chunk).unwrap();
        let back: Chunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back.meta.labels_fine_local, vec!["substances"]);
    }
}
