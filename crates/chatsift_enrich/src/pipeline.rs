//! Orchestrates the four passes per chunk, applies the confidence gate and
//! annotates chunks with promoted labels. Low-confidence and malformed
//! enrichments land in a sidecar directory for later re-enrichment.

use crate::gate::{ConfidenceGate, GateDecision};
use crate::ollama::ChatModel;
use crate::passes::{
    EntityScanner, PassResult, PassType, PsychologyAnalyzer, RelationshipAnalyzer,
    StructuralAnalyzer,
};
use anyhow::{Context, Result};
use chatsift_core::hash::short_sha256;
use chatsift_core::{
    BoundarySignal, Chunk, EnrichmentProvenance, EnrichmentRecord, Gradations, LabelTaxonomy,
    PrimaryEmotion, PrivacyTier, SpeechAct, Stance,
};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

pub const PIPELINE_VERSION: &str = "multi_pass_v1";

/// Rolling context shared by every chunk in a batch.
#[derive(Debug, Clone)]
pub struct EnrichmentContext {
    pub contact: String,
    pub conversation_id: String,
    pub privacy_tier: PrivacyTier,
    pub entities_found: BTreeSet<String>,
    pub labels_applied: BTreeMap<String, usize>,
    pub patterns_detected: Vec<String>,
}

impl EnrichmentContext {
    pub fn new(contact: &str, conversation_id: &str, privacy_tier: PrivacyTier) -> Self {
        Self {
            contact: contact.to_string(),
            conversation_id: conversation_id.to_string(),
            privacy_tier,
            entities_found: BTreeSet::new(),
            labels_applied: BTreeMap::new(),
            patterns_detected: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentOutcome {
    pub record: EnrichmentRecord,
    pub decision: GateDecision,
}

pub struct MultiPassPipeline {
    taxonomy: Arc<LabelTaxonomy>,
    model: Arc<dyn ChatModel>,
    gate: ConfidenceGate,
    sidecar_dir: Option<PathBuf>,
}

impl MultiPassPipeline {
    pub fn new(taxonomy: Arc<LabelTaxonomy>, model: Arc<dyn ChatModel>) -> Self {
        Self {
            taxonomy,
            model,
            gate: ConfidenceGate::default(),
            sidecar_dir: None,
        }
    }

    pub fn with_gate(mut self, gate: ConfidenceGate) -> Self {
        self.gate = gate;
        self
    }

    /// Directory for sidelined and malformed enrichments.
    pub fn with_sidecar_dir(mut self, dir: PathBuf) -> Self {
        self.sidecar_dir = Some(dir);
        self
    }

    pub fn gate(&self) -> &ConfidenceGate {
        &self.gate
    }

    /// Run all four passes over one chunk. The chunk's metadata is only
    /// touched when the gate promotes the result.
    pub async fn enrich_chunk(
        &self,
        chunk: &mut Chunk,
        context: &mut EnrichmentContext,
        history_len: usize,
    ) -> EnrichmentOutcome {
        let chunk_id = chunk.chunk_id.clone();
        let text = chunk.text.clone();
        if text.trim().is_empty() {
            tracing::warn!(chunk_id = %chunk_id, "Empty text, skipping enrichment");
            let record = EnrichmentRecord::empty(&chunk_id, self.model.model_name());
            return EnrichmentOutcome {
                record,
                decision: GateDecision::Sideline,
            };
        }

        tracing::debug!(chunk_id = %chunk_id, "Starting 4-pass enrichment");

        // Passes run strictly in order; each sees the prior results.
        let scanner = EntityScanner::new(&self.taxonomy);
        let entities = scanner.extract(&text, context);

        let structural = StructuralAnalyzer::new(&self.taxonomy);
        let structure = structural.analyze(self.model.as_ref(), &text, &entities).await;

        let prior = [entities.clone(), structure.clone()];
        let psychological = PsychologyAnalyzer::new(&self.taxonomy);
        let psychology = psychological.analyze(self.model.as_ref(), &text, &prior).await;

        let prior = [entities.clone(), structure.clone(), psychology.clone()];
        let relational = RelationshipAnalyzer::new(&self.taxonomy);
        let relationships = relational
            .analyze(self.model.as_ref(), &text, &prior, history_len)
            .await;

        let passes = [entities, structure, psychology, relationships];
        let record = self.assemble_record(&chunk_id, &text, &passes, context);

        // Track label frequency for recurring-pattern detection.
        for label in record
            .labels_coarse
            .iter()
            .chain(record.labels_fine_local.iter())
        {
            *context.labels_applied.entry(label.clone()).or_default() += 1;
        }

        let decision = self.gate.decide(&context.conversation_id, record.confidence_llm);
        match decision {
            GateDecision::Promote => self.annotate_chunk(chunk, &record, &passes, context),
            GateDecision::Sideline => {
                if let Err(e) = self.write_sidecar(&record) {
                    tracing::error!(chunk_id = %chunk_id, "Sidecar write failed: {e}");
                }
            }
        }

        EnrichmentOutcome { record, decision }
    }

    /// Enrich a batch for one contact. Chunks are processed in order so the
    /// relationship pass can see a rolling history window; model-call
    /// concurrency is bounded inside the client.
    pub async fn enrich_chunks(
        &self,
        chunks: &mut [Chunk],
        contact: &str,
        privacy_tier: PrivacyTier,
    ) -> Vec<EnrichmentOutcome> {
        let conversation_id = chunks
            .first()
            .map(|c| c.conv_id.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let mut context = EnrichmentContext::new(contact, &conversation_id, privacy_tier);

        tracing::info!(
            count = chunks.len(),
            contact,
            "Starting multi-pass enrichment"
        );

        let mut outcomes = Vec::with_capacity(chunks.len());
        let mut enriched_so_far = 0usize;
        for chunk in chunks.iter_mut() {
            let history_len = enriched_so_far.min(5);
            let outcome = self.enrich_chunk(chunk, &mut context, history_len).await;
            if outcome.decision == GateDecision::Promote {
                enriched_so_far += 1;
            }
            outcomes.push(outcome);

            // A label seen three times in the batch becomes a recurring
            // pattern.
            let recurring: Vec<String> = context
                .labels_applied
                .iter()
                .filter(|(_, count)| **count >= 3)
                .map(|(label, _)| format!("recurring_{label}"))
                .collect();
            for pattern in recurring {
                if !context.patterns_detected.contains(&pattern) {
                    tracing::debug!(pattern = %pattern, "Detected recurring pattern");
                    context.patterns_detected.push(pattern);
                }
            }
        }

        tracing::info!(
            enriched = outcomes.len(),
            unique_labels = context.labels_applied.len(),
            patterns = context.patterns_detected.len(),
            "Multi-pass enrichment complete"
        );
        outcomes
    }

    fn assemble_record(
        &self,
        chunk_id: &str,
        text: &str,
        passes: &[PassResult; 4],
        context: &EnrichmentContext,
    ) -> EnrichmentRecord {
        let mut all_labels: Vec<String> = passes
            .iter()
            .flat_map(|p| p.labels.iter().cloned())
            .collect();
        all_labels.sort();
        all_labels.dedup();

        let enhanced = self.taxonomy.apply_co_occurrence(&all_labels);
        let (coarse, fine) = self.taxonomy.validate(&enhanced);

        let mut record = EnrichmentRecord::empty(chunk_id, self.model.model_name());

        let structure_meta = &passes[1].metadata;
        let psychology_meta = &passes[2].metadata;
        let relationship_meta = &passes[3].metadata;

        record.speech_act = structure_meta["speech_acts"]
            .as_array()
            .and_then(|acts| acts.iter().filter_map(|a| a.as_str()).find_map(map_speech_act));

        record.emotion_primary = psychology_meta["emotion_primary"]
            .as_str()
            .and_then(parse_emotion)
            .unwrap_or(PrimaryEmotion::Neutral);

        record.stance = match relationship_meta["interaction_quality"].as_str() {
            Some("harmonious") | Some("improving") => Stance::Supportive,
            Some("tense") | Some("deteriorating") => Stance::Challenging,
            _ => Stance::Neutral,
        };

        record.boundary_signal = structure_meta["boundary_signals"]
            .as_array()
            .and_then(|signals| {
                signals
                    .iter()
                    .filter_map(|s| s.as_str())
                    .find_map(parse_boundary_signal)
            })
            .unwrap_or(BoundarySignal::None);

        record.repair_attempt = record.speech_act == Some(SpeechAct::Apologize)
            || enhanced.iter().any(|l| l.contains("repair"));

        let directness = match structure_meta["communication_style"].as_str() {
            Some("direct") => 0.9,
            Some("mixed") => 0.5,
            Some("indirect") => 0.2,
            _ => 0.5,
        };
        record.gradations = Gradations {
            certainty: psychology_meta["emotion_confidence"]
                .as_f64()
                .unwrap_or(0.5)
                .clamp(0.0, 1.0),
            directness,
            intensity: emotion_intensity(record.emotion_primary),
        };

        record.labels_coarse = coarse;
        record.labels_fine_local = fine;

        // Privacy invariant: fine labels only survive in a local-only tier.
        if context.privacy_tier != PrivacyTier::LocalOnly
            && !record.labels_fine_local.is_empty()
        {
            tracing::warn!(
                chunk_id,
                tier = context.privacy_tier.as_str(),
                "Dropping fine labels outside local-only tier"
            );
            record.pass_meta.insert(
                "privacy_violations".to_string(),
                json!(["fine labels produced outside local_only tier"]),
            );
            record.labels_fine_local.clear();
        }

        let total_confidence: f64 = passes.iter().map(|p| p.confidence).sum();
        record.confidence_llm = total_confidence / passes.len() as f64;

        record.prompt_hash = short_sha256(
            format!(
                "{}:{}",
                PsychologyAnalyzer::prompt(text, &passes[..2]),
                self.model.model_name()
            )
            .as_bytes(),
            16,
        );

        for pass in passes {
            let mut meta = pass.metadata.clone();
            if !pass.validation_errors.is_empty() {
                meta["validation_errors"] = json!(pass.validation_errors);
            }
            meta["duration_ms"] = json!(pass.duration_ms);
            meta["confidence"] = json!(pass.confidence);
            record
                .pass_meta
                .insert(pass.pass_type.as_str().to_string(), meta);
        }

        record
    }

    fn annotate_chunk(
        &self,
        chunk: &mut Chunk,
        record: &EnrichmentRecord,
        passes: &[PassResult; 4],
        context: &EnrichmentContext,
    ) {
        chunk.meta.labels_coarse = record.labels_coarse.clone();
        chunk.meta.labels_fine_local = if context.privacy_tier == PrivacyTier::LocalOnly {
            record.labels_fine_local.clone()
        } else {
            Vec::new()
        };

        let mut pass_durations_ms = BTreeMap::new();
        for pass in passes {
            pass_durations_ms.insert(pass.pass_type.as_str().to_string(), pass.duration_ms);
        }

        chunk.provenance.enrichment = Some(EnrichmentProvenance {
            method: "multi_pass_pipeline".to_string(),
            pipeline_version: PIPELINE_VERSION.to_string(),
            passes: passes.len(),
            model: self.model.model_name().to_string(),
            prompt_hash: record.prompt_hash.clone(),
            confidence: record.confidence_llm,
            pass_durations_ms,
        });
    }

    fn write_sidecar(&self, record: &EnrichmentRecord) -> Result<()> {
        let Some(dir) = &self.sidecar_dir else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create sidecar dir {}", dir.display()))?;
        let payload = json!({
            "record": record,
            "confidence_distribution": self.gate.distribution(),
        });
        let path = dir.join(format!("{}.json", record.chunk_id));
        std::fs::write(&path, serde_json::to_string_pretty(&payload)?)
            .with_context(|| format!("Failed to write sidecar {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Sidelined enrichment");
        Ok(())
    }
}

fn map_speech_act(raw: &str) -> Option<SpeechAct> {
    match raw {
        "requesting" | "questioning" | "ask" => Some(SpeechAct::Ask),
        "informing" | "inform" => Some(SpeechAct::Inform),
        "promising" | "promise" => Some(SpeechAct::Promise),
        "refusing" | "refuse" | "disagreeing" => Some(SpeechAct::Refuse),
        "apologizing" | "apologize" => Some(SpeechAct::Apologize),
        "suggesting" | "proposing" | "propose" => Some(SpeechAct::Propose),
        "meta" => Some(SpeechAct::Meta),
        _ => None,
    }
}

fn parse_emotion(raw: &str) -> Option<PrimaryEmotion> {
    match raw {
        "joy" => Some(PrimaryEmotion::Joy),
        "anger" => Some(PrimaryEmotion::Anger),
        "fear" => Some(PrimaryEmotion::Fear),
        "sadness" => Some(PrimaryEmotion::Sadness),
        "disgust" => Some(PrimaryEmotion::Disgust),
        "surprise" => Some(PrimaryEmotion::Surprise),
        "neutral" => Some(PrimaryEmotion::Neutral),
        _ => None,
    }
}

fn parse_boundary_signal(raw: &str) -> Option<BoundarySignal> {
    match raw {
        "setting" | "set" => Some(BoundarySignal::Set),
        "testing" | "test" => Some(BoundarySignal::Test),
        "crossing" | "violate" => Some(BoundarySignal::Violate),
        "reinforce" | "reinforcing" => Some(BoundarySignal::Reinforce),
        _ => None,
    }
}

fn emotion_intensity(emotion: PrimaryEmotion) -> f64 {
    match emotion {
        PrimaryEmotion::Anger => 0.9,
        PrimaryEmotion::Fear => 0.8,
        PrimaryEmotion::Joy => 0.7,
        PrimaryEmotion::Disgust => 0.7,
        PrimaryEmotion::Sadness => 0.6,
        PrimaryEmotion::Surprise => 0.6,
        PrimaryEmotion::Neutral => 0.1,
    }
}
