//! Abstraction engine: turns a local enrichment plus its conversation
//! window into the cloud-safe `ContextSummary`. Numerical scores get
//! Laplace noise calibrated to the window size.

use crate::tokenizer::PrivacyTokenizer;
use crate::AbstractionLevel;
use chatsift_core::{EnrichmentRecord, PrimaryEmotion, PrivacyTier, Stance};
use chatsift_shield::DifferentialPrivacyEngine;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// One window entry: the per-chunk signal the abstraction functions need.
#[derive(Debug, Clone)]
pub struct WindowItem {
    pub emotion_primary: PrimaryEmotion,
    pub labels_coarse: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl WindowItem {
    pub fn from_record(record: &EnrichmentRecord, timestamp: DateTime<Utc>) -> Self {
        Self {
            emotion_primary: record.emotion_primary,
            labels_coarse: record.labels_coarse.clone(),
            timestamp,
        }
    }
}

/// Privacy-safe context summary (level 3 of the ladder).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSummary {
    pub temporal_pattern: String,
    pub emotional_trajectory: String,
    pub relationship_dynamic: String,
    pub communication_style: String,
    pub conflict_pattern: String,

    // Sensitive topic families: booleans only, no detail.
    pub substance_context_present: bool,
    pub intimate_context_present: bool,
    pub boundary_discussion_present: bool,
    pub trauma_indicators_present: bool,

    // Noisy scores in [0, 1].
    pub emotional_intensity_score: f64,
    pub conflict_escalation_score: f64,
    pub intimacy_progression_score: f64,
    pub trust_stability_score: f64,

    /// Tokens referencing fine details without disclosing them.
    pub privacy_tokens: Vec<String>,

    pub abstraction_level: AbstractionLevel,
    pub privacy_tier: PrivacyTier,
}

pub struct AbstractionEngine {
    epsilon: f64,
    noise: DifferentialPrivacyEngine,
    tokenizer: PrivacyTokenizer,
}

impl AbstractionEngine {
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon,
            noise: DifferentialPrivacyEngine::new(None),
            tokenizer: PrivacyTokenizer::new(),
        }
    }

    pub fn with_seed(epsilon: f64, seed: u64) -> Self {
        Self {
            epsilon,
            noise: DifferentialPrivacyEngine::new(Some(seed)),
            tokenizer: PrivacyTokenizer::with_salt(format!("bridge-{seed}")),
        }
    }

    pub fn create_context_summary(
        &self,
        local: &EnrichmentRecord,
        window: &[WindowItem],
    ) -> ContextSummary {
        let fine = &local.labels_fine_local;
        let coarse = &local.labels_coarse;

        let substance_present = fine.iter().any(|l| l.contains("substance"));
        let intimate_present = fine
            .iter()
            .any(|l| l.contains("intimacy") || l.contains("sexual"));
        let boundary_present = fine.iter().any(|l| l.contains("boundary"));
        let trauma_present = fine.iter().any(|l| l.contains("trauma"));

        let privacy_tokens = fine
            .iter()
            .map(|label| self.tokenizer.tokenize_label(label))
            .collect();

        ContextSummary {
            temporal_pattern: temporal_pattern(window).to_string(),
            emotional_trajectory: emotional_trajectory(window),
            relationship_dynamic: relationship_dynamic(coarse).to_string(),
            communication_style: communication_style(local),
            conflict_pattern: conflict_pattern(local).to_string(),
            substance_context_present: substance_present,
            intimate_context_present: intimate_present,
            boundary_discussion_present: boundary_present,
            trauma_indicators_present: trauma_present,
            emotional_intensity_score: self.noisy_emotional_intensity(window),
            conflict_escalation_score: self.noisy_indicator_fraction(
                window,
                &["conflict", "anger", "frustration", "argument"],
            ),
            intimacy_progression_score: self.noisy_indicator_fraction(
                window,
                &["intimacy", "trust", "vulnerability", "closeness"],
            ),
            trust_stability_score: self.noisy_trust_stability(window),
            privacy_tokens,
            abstraction_level: AbstractionLevel::HighAbstract,
            privacy_tier: PrivacyTier::CloudSafe,
        }
    }

    /// Laplace noise at sensitivity 1/|window|, clamped to [0, 1].
    fn add_window_noise(&self, base: f64, window_len: usize, sensitivity_factor: f64) -> f64 {
        if window_len == 0 {
            return base.clamp(0.0, 1.0);
        }
        let sensitivity = sensitivity_factor / window_len as f64;
        let noisy = base + self.noise.laplace_noise(sensitivity / self.epsilon);
        noisy.clamp(0.0, 1.0)
    }

    fn noisy_emotional_intensity(&self, window: &[WindowItem]) -> f64 {
        if window.is_empty() {
            return 0.0;
        }
        let mean = window
            .iter()
            .map(|item| emotion_intensity(item.emotion_primary))
            .sum::<f64>()
            / window.len() as f64;
        self.add_window_noise(mean, window.len(), 1.0)
    }

    fn noisy_indicator_fraction(&self, window: &[WindowItem], indicators: &[&str]) -> f64 {
        if window.is_empty() {
            return 0.0;
        }
        let hits = window
            .iter()
            .filter(|item| {
                item.labels_coarse
                    .iter()
                    .any(|label| indicators.iter().any(|i| label.contains(i)))
            })
            .count();
        let base = hits as f64 / window.len() as f64;
        self.add_window_noise(base, window.len(), 1.0)
    }

    fn noisy_trust_stability(&self, window: &[WindowItem]) -> f64 {
        if window.is_empty() {
            return 0.5;
        }
        let positive = window
            .iter()
            .filter(|item| {
                item.labels_coarse
                    .iter()
                    .any(|l| l.contains("trust") || l.contains("care"))
            })
            .count() as f64;
        let negative = window
            .iter()
            .filter(|item| {
                item.labels_coarse
                    .iter()
                    .any(|l| l.contains("conflict") || l.contains("betrayal"))
            })
            .count() as f64;
        let balance = (positive - negative) / window.len() as f64;
        let base = 0.5 + balance * 0.5;
        // Trust balance moves by 2 when one record flips sides.
        self.add_window_noise(base, window.len(), 2.0)
    }
}

// ============================================================================
// Pattern abstractions
// ============================================================================

pub fn temporal_pattern(window: &[WindowItem]) -> &'static str {
    match window.len() {
        0 | 1 => "single_message_pattern",
        2..=5 => "brief_exchange_pattern",
        6..=20 => "moderate_conversation_pattern",
        21..=50 => "extended_conversation_pattern",
        _ => "lengthy_discussion_pattern",
    }
}

fn emotion_name(emotion: PrimaryEmotion) -> &'static str {
    match emotion {
        PrimaryEmotion::Joy => "joy",
        PrimaryEmotion::Anger => "anger",
        PrimaryEmotion::Fear => "fear",
        PrimaryEmotion::Sadness => "sadness",
        PrimaryEmotion::Disgust => "disgust",
        PrimaryEmotion::Surprise => "surprise",
        PrimaryEmotion::Neutral => "neutral",
    }
}

pub fn emotional_trajectory(window: &[WindowItem]) -> String {
    if window.is_empty() {
        return "neutral_stable_trajectory".to_string();
    }
    let emotions: Vec<PrimaryEmotion> = window.iter().map(|i| i.emotion_primary).collect();
    let distinct: std::collections::BTreeSet<&'static str> =
        emotions.iter().map(|e| emotion_name(*e)).collect();

    if distinct.len() == 1 {
        return format!("{}_stable_trajectory", emotion_name(emotions[0]));
    }
    let has = |e: PrimaryEmotion| emotions.contains(&e);
    if has(PrimaryEmotion::Anger) && has(PrimaryEmotion::Sadness) {
        "conflict_to_sadness_trajectory".to_string()
    } else if has(PrimaryEmotion::Neutral) && has(PrimaryEmotion::Joy) {
        "neutral_to_positive_trajectory".to_string()
    } else if (has(PrimaryEmotion::Anger) || has(PrimaryEmotion::Fear))
        && has(PrimaryEmotion::Neutral)
    {
        "negative_to_neutral_trajectory".to_string()
    } else {
        "mixed_emotional_trajectory".to_string()
    }
}

pub fn relationship_dynamic(coarse: &[String]) -> &'static str {
    let has = |needle: &str| coarse.iter().any(|l| l == needle);
    let indicators = ["trust", "intimacy", "conflict", "support"]
        .iter()
        .filter(|i| has(i))
        .count();

    if has("trust") && indicators <= 1 {
        "trust_development_dynamic"
    } else if has("conflict") && has("support") {
        "conflict_resolution_dynamic"
    } else if has("intimacy") && indicators <= 1 {
        "intimacy_progression_dynamic"
    } else if has("support") && indicators <= 1 {
        "support_exchange_dynamic"
    } else if indicators > 2 {
        "complex_relationship_dynamic"
    } else {
        "neutral_relationship_dynamic"
    }
}

pub fn communication_style(local: &EnrichmentRecord) -> String {
    let tone = match local.stance {
        Stance::Supportive => "supportive",
        Stance::Challenging => "challenging",
        Stance::Neutral => "neutral",
    };
    let directness = local.gradations.directness;
    if directness > 0.7 {
        format!("direct_{tone}_communication")
    } else if directness < 0.3 {
        format!("indirect_{tone}_communication")
    } else {
        format!("moderate_{tone}_communication")
    }
}

pub fn conflict_pattern(local: &EnrichmentRecord) -> &'static str {
    let has_conflict = local.labels_coarse.iter().any(|l| l.contains("conflict"));
    if !has_conflict {
        "no_conflict_pattern"
    } else if local.repair_attempt {
        "constructive_conflict_pattern"
    } else if local.stance == Stance::Challenging {
        "destructive_conflict_pattern"
    } else {
        "mixed_conflict_pattern"
    }
}

pub fn emotion_intensity(emotion: PrimaryEmotion) -> f64 {
    match emotion {
        PrimaryEmotion::Joy => 0.7,
        PrimaryEmotion::Anger => 0.9,
        PrimaryEmotion::Sadness => 0.6,
        PrimaryEmotion::Fear => 0.8,
        PrimaryEmotion::Surprise => 0.6,
        PrimaryEmotion::Disgust => 0.7,
        PrimaryEmotion::Neutral => 0.0,
    }
}

/// Hour-of-day bucket from the window's last message; 0 for an empty
/// window.
pub fn hour_of_day(window: &[WindowItem]) -> u32 {
    window.last().map(|item| item.timestamp.hour()).unwrap_or(0)
}

/// opening | development | climax | resolution, from window shape and
/// emotional progression.
pub fn conversation_phase(window: &[WindowItem]) -> &'static str {
    if window.is_empty() {
        return "single";
    }
    let emotions: Vec<PrimaryEmotion> = window.iter().map(|i| i.emotion_primary).collect();
    match window.len() {
        1 | 2 => "opening",
        3..=10 => {
            if emotions
                .iter()
                .any(|e| matches!(e, PrimaryEmotion::Anger | PrimaryEmotion::Fear))
            {
                "climax"
            } else {
                "development"
            }
        }
        _ => {
            let tail_neutral = emotions
                .iter()
                .rev()
                .take(3)
                .all(|e| *e == PrimaryEmotion::Neutral);
            if tail_neutral {
                "resolution"
            } else {
                "development"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(emotion: PrimaryEmotion, labels: &[&str], hour: u32) -> WindowItem {
        WindowItem {
            emotion_primary: emotion,
            labels_coarse: labels.iter().map(|s| s.to_string()).collect(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
        }
    }

    fn engine() -> AbstractionEngine {
        AbstractionEngine::with_seed(1.0, 42)
    }

    #[test]
    fn temporal_pattern_buckets_by_window_size() {
        assert_eq!(temporal_pattern(&[]), "single_message_pattern");
        let w: Vec<WindowItem> = (0..4).map(|_| item(PrimaryEmotion::Neutral, &[], 9)).collect();
        assert_eq!(temporal_pattern(&w), "brief_exchange_pattern");
        let w: Vec<WindowItem> = (0..30).map(|_| item(PrimaryEmotion::Neutral, &[], 9)).collect();
        assert_eq!(temporal_pattern(&w), "extended_conversation_pattern");
    }

    #[test]
    fn trajectory_detects_stable_and_mixed() {
        let stable: Vec<WindowItem> =
            (0..3).map(|_| item(PrimaryEmotion::Joy, &[], 9)).collect();
        assert_eq!(emotional_trajectory(&stable), "joy_stable_trajectory");

        let conflict = vec![
            item(PrimaryEmotion::Anger, &[], 9),
            item(PrimaryEmotion::Sadness, &[], 9),
        ];
        assert_eq!(emotional_trajectory(&conflict), "conflict_to_sadness_trajectory");
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let engine = engine();
        let window: Vec<WindowItem> = (0..10)
            .map(|i| {
                item(
                    if i % 2 == 0 {
                        PrimaryEmotion::Anger
                    } else {
                        PrimaryEmotion::Neutral
                    },
                    &["conflict", "trust"],
                    9,
                )
            })
            .collect();
        let mut record = EnrichmentRecord::empty("c", "m");
        record.labels_coarse = vec!["conflict".to_string()];
        let summary = engine.create_context_summary(&record, &window);

        for score in [
            summary.emotional_intensity_score,
            summary.conflict_escalation_score,
            summary.intimacy_progression_score,
            summary.trust_stability_score,
        ] {
            assert!((0.0..=1.0).contains(&score), "score out of range: {score}");
        }
    }

    #[test]
    fn empty_window_defaults() {
        let engine = engine();
        let record = EnrichmentRecord::empty("c", "m");
        let summary = engine.create_context_summary(&record, &[]);
        assert_eq!(summary.emotional_intensity_score, 0.0);
        assert_eq!(summary.trust_stability_score, 0.5);
        assert_eq!(summary.temporal_pattern, "single_message_pattern");
    }

    #[test]
    fn privacy_tokens_reference_fine_labels_consistently() {
        let engine = engine();
        let mut record = EnrichmentRecord::empty("c", "m");
        record.labels_fine_local =
            vec!["substances".to_string(), "family_conflict".to_string()];
        let first = engine.create_context_summary(&record, &[]);
        let second = engine.create_context_summary(&record, &[]);

        assert_eq!(first.privacy_tokens.len(), 2);
        assert_eq!(first.privacy_tokens, second.privacy_tokens);
        assert!(first.privacy_tokens[0].contains("TKN:SENSITIVE:"));
        assert!(first.privacy_tokens[1].contains("TKN:PERSONAL:"));
    }

    #[test]
    fn phase_heuristic_tracks_emotions() {
        assert_eq!(conversation_phase(&[]), "single");
        let opening = vec![item(PrimaryEmotion::Neutral, &[], 9)];
        assert_eq!(conversation_phase(&opening), "opening");

        let climax: Vec<WindowItem> =
            (0..6).map(|_| item(PrimaryEmotion::Anger, &[], 9)).collect();
        assert_eq!(conversation_phase(&climax), "climax");

        let mut resolution: Vec<WindowItem> =
            (0..12).map(|_| item(PrimaryEmotion::Anger, &[], 9)).collect();
        resolution.extend((0..3).map(|_| item(PrimaryEmotion::Neutral, &[], 9)));
        assert_eq!(conversation_phase(&resolution), "resolution");
    }

    #[test]
    fn hour_comes_from_last_window_item() {
        let window = vec![
            item(PrimaryEmotion::Neutral, &[], 9),
            item(PrimaryEmotion::Neutral, &[], 22),
        ];
        assert_eq!(hour_of_day(&window), 22);
        assert_eq!(hour_of_day(&[]), 0);
    }

    #[test]
    fn communication_style_reflects_directness() {
        let mut record = EnrichmentRecord::empty("c", "m");
        record.gradations.directness = 0.9;
        record.stance = Stance::Supportive;
        assert_eq!(communication_style(&record), "direct_supportive_communication");
        record.gradations.directness = 0.1;
        assert_eq!(communication_style(&record), "indirect_supportive_communication");
    }
}
