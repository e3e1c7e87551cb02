//! Multi-layer privacy validation across the abstraction ladder.

use crate::abstraction::ContextSummary;
use crate::EncryptedContextVector;
use chatsift_core::EnrichmentRecord;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub violations: Vec<String>,
    pub risk_score: f64,
}

pub struct MultiLayerPrivacyValidator;

impl MultiLayerPrivacyValidator {
    pub fn validate(
        &self,
        local: &EnrichmentRecord,
        summary: &ContextSummary,
        encrypted: Option<&EncryptedContextVector>,
    ) -> ValidationReport {
        let mut violations = Vec::new();

        violations.extend(Self::validate_summary(summary));
        if let Some(encrypted) = encrypted {
            violations.extend(Self::validate_encrypted(encrypted));
        }
        violations.extend(Self::validate_cross_layer(local, summary));

        let risk_score = violations.len() as f64 * 0.1;
        let passed = violations.is_empty();
        if !passed {
            tracing::warn!(?violations, "Privacy validation failed");
        }

        ValidationReport {
            passed,
            violations,
            risk_score,
        }
    }

    fn validate_summary(summary: &ContextSummary) -> Vec<String> {
        let mut violations = Vec::new();

        if summary.privacy_tokens.len() > 10 {
            violations
                .push("Excessive privacy tokens may enable reconstruction".to_string());
        }

        let sensitive_flags = [
            summary.substance_context_present,
            summary.intimate_context_present,
            summary.boundary_discussion_present,
            summary.trauma_indicators_present,
        ];
        if sensitive_flags.iter().filter(|f| **f).count() > 3 {
            violations.push("Too many sensitive context flags active".to_string());
        }

        let scores = [
            summary.emotional_intensity_score,
            summary.conflict_escalation_score,
            summary.intimacy_progression_score,
            summary.trust_stability_score,
        ];
        if scores.iter().any(|s| !(0.0..=1.0).contains(s)) {
            violations.push("Privacy scores outside valid range [0,1]".to_string());
        }

        violations
    }

    fn validate_encrypted(encrypted: &EncryptedContextVector) -> Vec<String> {
        let mut violations = Vec::new();

        if encrypted.encrypted_semantic_vector.is_empty() {
            violations.push("Missing encrypted semantic vector".to_string());
        }
        if encrypted.encryption_key_id.is_empty() {
            violations.push("Missing encryption key id".to_string());
        }
        if encrypted.temporal_position > 23 {
            violations.push("Invalid temporal position".to_string());
        }

        violations
    }

    fn validate_cross_layer(local: &EnrichmentRecord, summary: &ContextSummary) -> Vec<String> {
        let mut violations = Vec::new();

        let substance_in_fine = local
            .labels_fine_local
            .iter()
            .any(|l| l.contains("substance"));
        if substance_in_fine && !summary.substance_context_present {
            violations.push("Substance context inconsistency between layers".to_string());
        }

        if summary.privacy_tokens.len() > local.labels_fine_local.len() {
            violations.push(
                "Privacy tokens exceed fine labels: possible over-abstraction".to_string(),
            );
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstraction::AbstractionEngine;

    fn record_with_fine(fine: &[&str]) -> EnrichmentRecord {
        let mut record = EnrichmentRecord::empty("c", "m");
        record.labels_fine_local = fine.iter().map(|s| s.to_string()).collect();
        record
    }

    fn summary_for(record: &EnrichmentRecord) -> ContextSummary {
        AbstractionEngine::with_seed(1.0, 7).create_context_summary(record, &[])
    }

    #[test]
    fn consistent_layers_pass() {
        let record = record_with_fine(&["substances"]);
        let summary = summary_for(&record);
        let report = MultiLayerPrivacyValidator.validate(&record, &summary, None);
        assert!(report.passed, "violations: {:?}", report.violations);
        assert_eq!(report.risk_score, 0.0);
    }

    #[test]
    fn substance_flag_mismatch_is_a_violation() {
        let record = record_with_fine(&["substances"]);
        let mut summary = summary_for(&record);
        summary.substance_context_present = false;
        let report = MultiLayerPrivacyValidator.validate(&record, &summary, None);
        assert!(!report.passed);
        assert!(report
            .violations
            .iter()
            .any(|v| v.contains("Substance context inconsistency")));
    }

    #[test]
    fn token_overflow_is_over_abstraction() {
        let record = record_with_fine(&["substances"]);
        let mut summary = summary_for(&record);
        summary.privacy_tokens.push("⟦TKN:CONTEXT:deadbeef⟧".to_string());
        let report = MultiLayerPrivacyValidator.validate(&record, &summary, None);
        assert!(report
            .violations
            .iter()
            .any(|v| v.contains("over-abstraction")));
    }

    #[test]
    fn out_of_range_scores_fail() {
        let record = record_with_fine(&[]);
        let mut summary = summary_for(&record);
        summary.conflict_escalation_score = 1.7;
        let report = MultiLayerPrivacyValidator.validate(&record, &summary, None);
        assert!(!report.passed);
    }

    #[test]
    fn encrypted_metadata_is_checked() {
        let record = record_with_fine(&[]);
        let summary = summary_for(&record);
        let encrypted = EncryptedContextVector {
            encrypted_semantic_vector: vec![],
            encrypted_emotional_vector: vec![1],
            encrypted_relationship_vector: vec![1],
            conversation_phase: "opening".to_string(),
            temporal_position: 99,
            message_count_range: "1-5".to_string(),
            encryption_key_id: String::new(),
            vector_dimension: 128,
            privacy_tier: chatsift_core::PrivacyTier::PatternOnly,
        };
        let report = MultiLayerPrivacyValidator.validate(&record, &summary, Some(&encrypted));
        assert!(report.violations.len() >= 3);
        assert!(report.risk_score > 0.2);
    }
}
