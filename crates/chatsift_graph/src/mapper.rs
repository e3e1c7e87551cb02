//! Label-to-relationship mapping with context awareness. Each rule names a
//! source-label set, a target relationship type, a base confidence and
//! per-context weights; detection admits rules above a minimum confidence
//! and returns the strongest five.

use crate::RelationshipType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipContext {
    Romantic,
    Sexual,
    Family,
    Friend,
    Professional,
    Unknown,
}

impl RelationshipContext {
    pub const ALL: [RelationshipContext; 6] = [
        RelationshipContext::Romantic,
        RelationshipContext::Sexual,
        RelationshipContext::Family,
        RelationshipContext::Friend,
        RelationshipContext::Professional,
        RelationshipContext::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipContext::Romantic => "romantic",
            RelationshipContext::Sexual => "sexual",
            RelationshipContext::Family => "family",
            RelationshipContext::Friend => "friend",
            RelationshipContext::Professional => "professional",
            RelationshipContext::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelationshipMapping {
    pub source_labels: BTreeSet<String>,
    pub target: RelationshipType,
    pub confidence: f64,
    pub context_weights: BTreeMap<RelationshipContext, f64>,
    pub required_sequence: bool,
    pub exclusion_labels: BTreeSet<String>,
}

fn labels(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn weights(entries: &[(RelationshipContext, f64)]) -> BTreeMap<RelationshipContext, f64> {
    entries.iter().copied().collect()
}

fn uniform(weight: f64) -> BTreeMap<RelationshipContext, f64> {
    RelationshipContext::ALL.iter().map(|c| (*c, weight)).collect()
}

fn mapping(
    source: &[&str],
    target: RelationshipType,
    confidence: f64,
    context_weights: BTreeMap<RelationshipContext, f64>,
) -> RelationshipMapping {
    RelationshipMapping {
        source_labels: labels(source),
        target,
        confidence,
        context_weights,
        required_sequence: false,
        exclusion_labels: BTreeSet::new(),
    }
}

fn sequenced(
    source: &[&str],
    target: RelationshipType,
    confidence: f64,
    context_weights: BTreeMap<RelationshipContext, f64>,
) -> RelationshipMapping {
    RelationshipMapping {
        required_sequence: true,
        ..mapping(source, target, confidence, context_weights)
    }
}

pub struct PsychologyRelationshipMapper {
    mappings: Vec<RelationshipMapping>,
    context_detectors: BTreeMap<RelationshipContext, BTreeSet<String>>,
}

impl Default for PsychologyRelationshipMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl PsychologyRelationshipMapper {
    pub fn new() -> Self {
        Self {
            mappings: build_mappings(),
            context_detectors: build_context_detectors(),
        }
    }

    pub fn mappings(&self) -> &[RelationshipMapping] {
        &self.mappings
    }

    /// Map labels from a chunk pair to relationship types.
    ///
    /// confidence = min(1, base · context_weight + 0.2 · overlap_ratio);
    /// mappings below 0.3 are dropped; the strongest five are returned.
    pub fn map_labels_to_relationships(
        &self,
        chunk1_labels: &[String],
        chunk2_labels: &[String],
        context: RelationshipContext,
        temporal_sequence: bool,
    ) -> Vec<(RelationshipType, f64)> {
        let combined: BTreeSet<&str> = chunk1_labels
            .iter()
            .chain(chunk2_labels.iter())
            .map(String::as_str)
            .collect();

        let mut detected = Vec::new();
        for mapping in &self.mappings {
            let overlap = mapping
                .source_labels
                .iter()
                .filter(|l| combined.contains(l.as_str()))
                .count();
            if overlap == 0 {
                continue;
            }
            if mapping
                .exclusion_labels
                .iter()
                .any(|l| combined.contains(l.as_str()))
            {
                continue;
            }
            if mapping.required_sequence && !temporal_sequence {
                continue;
            }

            let context_weight = mapping.context_weights.get(&context).copied().unwrap_or(1.0);
            let overlap_ratio = overlap as f64 / mapping.source_labels.len() as f64;
            let confidence =
                (mapping.confidence * context_weight + 0.2 * overlap_ratio).min(1.0);

            if confidence > 0.3 {
                detected.push((mapping.target, confidence));
            }
        }

        detected.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.as_str().cmp(b.0.as_str()))
        });
        detected.truncate(5);
        detected
    }

    /// Detect the relationship context from labels: the detector set with
    /// the highest overlap ratio wins; UNKNOWN when nothing matches.
    pub fn detect_relationship_context(&self, chunk_labels: &[String]) -> RelationshipContext {
        let labels: BTreeSet<&str> = chunk_labels.iter().map(String::as_str).collect();

        let mut best = (RelationshipContext::Unknown, 0.0);
        for (context, detector) in &self.context_detectors {
            let overlap = detector
                .iter()
                .filter(|l| labels.contains(l.as_str()))
                .count();
            if overlap > 0 {
                let score = overlap as f64 / detector.len() as f64;
                if score > best.1 {
                    best = (*context, score);
                }
            }
        }
        best.0
    }

    /// Human-readable explanation for a detected relationship.
    pub fn explanation(&self, relationship: RelationshipType, source_labels: &[String]) -> String {
        let base = match relationship {
            RelationshipType::SexualEscalates => "Sexual tension and arousal building",
            RelationshipType::SexualWithdraws => "Sexual withdrawal or rejection pattern",
            RelationshipType::BoundaryTests => "Boundary testing or limit pushing behavior",
            RelationshipType::BoundaryViolates => "Clear boundary violation",
            RelationshipType::ConsentSeeks => "Active consent seeking",
            RelationshipType::Dominates => "Power assertion or dominance behavior",
            RelationshipType::Manipulates => "Emotional or psychological manipulation pattern",
            RelationshipType::Gaslights => "Gaslighting or reality distortion behavior",
            RelationshipType::EscalatesFrom => "Conflict or tension escalation pattern",
            RelationshipType::RepairsAfter => "Relationship repair or reconciliation attempt",
            RelationshipType::Triangulates => "Third-party involvement or triangulation",
            RelationshipType::Isolates => "Social isolation or support system undermining",
            other => return format!("Relationship pattern: {}", other.as_str()),
        };
        if source_labels.is_empty() {
            base.to_string()
        } else {
            let shown: Vec<&str> = source_labels.iter().take(3).map(String::as_str).collect();
            format!("{base} (based on: {})", shown.join(", "))
        }
    }
}

fn build_mappings() -> Vec<RelationshipMapping> {
    use RelationshipContext::*;
    use RelationshipType::*;

    vec![
        // Sexual & intimate
        mapping(
            &["sexual_content", "arousal_anticipation", "sexual_negotiation"],
            SexualEscalates,
            0.85,
            weights(&[(Sexual, 1.2), (Romantic, 1.1), (Professional, 0.6)]),
        ),
        mapping(
            &["sexual_rejection", "sexual_withdrawal", "intimacy_avoidance"],
            SexualWithdraws,
            0.82,
            weights(&[(Sexual, 1.15), (Romantic, 1.05), (Family, 0.3)]),
        ),
        mapping(
            &["arousal_escalation", "sexual_tension", "desire_expression"],
            ArousalBuilds,
            0.88,
            weights(&[(Sexual, 1.3), (Romantic, 1.2), (Professional, 0.4)]),
        ),
        mapping(
            &["arousal_deflation", "sexual_disappointment", "desire_unfulfilled"],
            ArousalDeflates,
            0.78,
            weights(&[(Sexual, 1.1), (Romantic, 1.0)]),
        ),
        mapping(
            &["emotional_intimacy", "vulnerability_sharing", "deep_connection"],
            IntimateConnects,
            0.83,
            weights(&[(Romantic, 1.2), (Sexual, 1.1), (Friend, 0.9), (Family, 0.8)]),
        ),
        mapping(
            &["emotional_distance", "vulnerability_withdrawal", "intimacy_barriers"],
            IntimateDistances,
            0.80,
            weights(&[(Romantic, 1.1), (Sexual, 1.0), (Family, 0.9)]),
        ),
        // Boundary & consent
        mapping(
            &["boundary_establishment", "limit_setting", "consent_clarification"],
            BoundarySets,
            0.90,
            uniform(1.0),
        ),
        mapping(
            &["boundary_testing", "limit_pushing", "consent_pressure"],
            BoundaryTests,
            0.87,
            weights(&[(Sexual, 1.3), (Romantic, 1.2), (Professional, 1.1)]),
        ),
        mapping(
            &["boundary_violation", "consent_violation", "limit_crossing"],
            BoundaryViolates,
            0.95,
            uniform(1.2),
        ),
        mapping(
            &["boundary_reinforcement", "limit_maintenance", "consent_reaffirmation"],
            BoundaryReinforces,
            0.85,
            uniform(1.0),
        ),
        mapping(
            &["consent_seeking", "permission_asking", "consent_check"],
            ConsentSeeks,
            0.88,
            weights(&[(Sexual, 1.3), (Romantic, 1.1), (Professional, 1.2)]),
        ),
        mapping(
            &["consent_granting", "permission_giving", "agreement_explicit"],
            ConsentGives,
            0.83,
            uniform(1.0),
        ),
        mapping(
            &["consent_withdrawal", "permission_revocation", "agreement_cancellation"],
            ConsentWithdraws,
            0.92,
            uniform(1.1),
        ),
        // Power & control
        mapping(
            &["dominance_assertion", "power_display", "control_taking"],
            Dominates,
            0.86,
            weights(&[(Sexual, 1.2), (Professional, 1.1), (Family, 0.9)]),
        ),
        mapping(
            &["submission_display", "power_yielding", "control_surrendering"],
            SubmitsTo,
            0.84,
            weights(&[(Sexual, 1.2), (Romantic, 1.0), (Family, 0.8)]),
        ),
        mapping(
            &["authority_challenge", "power_resistance", "control_defiance"],
            Challenges,
            0.88,
            weights(&[(Professional, 1.2), (Family, 1.1), (Sexual, 1.0)]),
        ),
        mapping(
            &["control_behavior", "manipulation_attempt", "coercion_pattern"],
            Controls,
            0.89,
            uniform(1.1),
        ),
        mapping(
            &["resistance_behavior", "control_pushback", "autonomy_assertion"],
            Resists,
            0.82,
            uniform(1.0),
        ),
        // Emotional & psychological
        sequenced(
            &["conflict_escalation", "tension_increase", "stress_amplification"],
            EscalatesFrom,
            0.87,
            uniform(1.0),
        ),
        sequenced(
            &["repair_attempt", "reconciliation_effort", "relationship_mending"],
            RepairsAfter,
            0.90,
            uniform(1.0),
        ),
        mapping(
            &["emotional_trigger", "psychological_trigger", "trauma_activation"],
            Triggers,
            0.85,
            uniform(1.0),
        ),
        mapping(
            &["validation_giving", "emotional_support", "affirmation_providing"],
            Validates,
            0.83,
            weights(&[(Romantic, 1.1), (Family, 1.2), (Friend, 1.1)]),
        ),
        mapping(
            &["invalidation_pattern", "dismissal_behavior", "emotional_dismissal"],
            Invalidates,
            0.86,
            uniform(1.1),
        ),
        mapping(
            &["gaslighting_pattern", "reality_distortion", "perception_manipulation"],
            Gaslights,
            0.93,
            uniform(1.2),
        ),
        mapping(
            &["emotional_manipulation", "psychological_manipulation", "guilt_tripping"],
            Manipulates,
            0.88,
            uniform(1.1),
        ),
        mapping(
            &["emotional_soothing", "comfort_providing", "calming_behavior"],
            Soothes,
            0.81,
            weights(&[(Romantic, 1.1), (Family, 1.2), (Friend, 1.0)]),
        ),
        // Family & support
        mapping(
            &["nurturing_behavior", "caretaking_pattern", "protective_instinct"],
            Nurtures,
            0.84,
            weights(&[(Family, 1.3), (Romantic, 1.1), (Friend, 0.9)]),
        ),
        mapping(
            &["protective_behavior", "defense_pattern", "safety_providing"],
            Protects,
            0.82,
            weights(&[(Family, 1.2), (Romantic, 1.1), (Friend, 1.0)]),
        ),
        mapping(
            &["dependency_pattern", "reliance_behavior", "support_seeking"],
            DependsOn,
            0.79,
            weights(&[(Family, 1.1), (Romantic, 1.0), (Professional, 0.7)]),
        ),
        mapping(
            &["support_providing", "help_offering", "assistance_pattern"],
            Supports,
            0.85,
            uniform(1.0),
        ),
        mapping(
            &["emotional_burden", "caretaking_overload", "responsibility_dumping"],
            Burdens,
            0.87,
            weights(&[(Family, 1.2), (Romantic, 1.1), (Friend, 0.9)]),
        ),
        // Professional & transactional
        mapping(
            &["service_negotiation", "terms_discussion", "contract_establishing"],
            NegotiatesService,
            0.89,
            weights(&[(Professional, 1.4), (Unknown, 0.7)]),
        ),
        mapping(
            &["terms_establishment", "conditions_setting", "agreement_formation"],
            EstablishesTerms,
            0.86,
            weights(&[(Professional, 1.3), (Unknown, 0.8)]),
        ),
        mapping(
            &["professional_boundary", "work_boundary", "business_maintenance"],
            MaintainsProfessional,
            0.91,
            weights(&[(Professional, 1.5), (Romantic, 0.6), (Sexual, 0.5)]),
        ),
        mapping(
            &["boundary_blurring", "professional_crossing", "personal_mixing"],
            BlursProfessional,
            0.88,
            weights(&[(Professional, 1.3), (Romantic, 1.1)]),
        ),
        // Advanced dynamics
        mapping(
            &["third_party_involvement", "triangle_creation", "others_involving"],
            Triangulates,
            0.84,
            uniform(1.1),
        ),
        mapping(
            &["isolation_pattern", "social_separation", "support_cutting"],
            Isolates,
            0.89,
            uniform(1.2),
        ),
        mapping(
            &["competition_dynamic", "rivalry_pattern", "competing_behavior"],
            CompetesWith,
            0.81,
            weights(&[(Professional, 1.2), (Family, 1.0), (Friend, 1.1)]),
        ),
        mapping(
            &["alliance_formation", "partnership_building", "coalition_creating"],
            AlliesWith,
            0.83,
            uniform(1.0),
        ),
        mapping(
            &["trust_betrayal", "loyalty_violation", "confidence_breaking"],
            Betrays,
            0.91,
            uniform(1.1),
        ),
        sequenced(
            &["reconciliation_attempt", "peace_making", "relationship_restoration"],
            Reconciles,
            0.86,
            uniform(1.0),
        ),
    ]
}

fn build_context_detectors() -> BTreeMap<RelationshipContext, BTreeSet<String>> {
    use RelationshipContext::*;
    let mut detectors = BTreeMap::new();
    detectors.insert(
        Sexual,
        labels(&[
            "sexual_content",
            "arousal_anticipation",
            "sexual_negotiation",
            "sexual_rejection",
            "sexual_withdrawal",
            "desire_expression",
            "arousal_escalation",
            "sexual_tension",
            "sexual_coercion",
            "sexuality",
        ]),
    );
    detectors.insert(
        Romantic,
        labels(&[
            "emotional_intimacy",
            "vulnerability_sharing",
            "deep_connection",
            "romantic_expression",
            "love_declaration",
            "relationship_commitment",
            "future_planning",
            "affection_expression",
            "jealousy_expression",
            "intimacy",
        ]),
    );
    detectors.insert(
        Family,
        labels(&[
            "family_reference",
            "parental_dynamic",
            "sibling_dynamic",
            "nurturing_behavior",
            "caretaking_pattern",
            "protective_instinct",
            "family_obligation",
            "generational_conflict",
            "family_loyalty",
            "family",
        ]),
    );
    detectors.insert(
        Friend,
        labels(&[
            "friendship_reference",
            "social_support",
            "peer_interaction",
            "shared_experience",
            "social_bonding",
            "group_dynamic",
            "social_conflict",
            "peer_pressure",
            "social_validation",
            "social",
        ]),
    );
    detectors.insert(
        Professional,
        labels(&[
            "work_reference",
            "professional_boundary",
            "service_negotiation",
            "terms_discussion",
            "contract_establishing",
            "business_transaction",
            "professional_service",
            "work_relationship",
            "client_interaction",
            "work",
        ]),
    );
    detectors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn boundary_violation_maps_with_high_confidence() {
        let mapper = PsychologyRelationshipMapper::new();
        let detected = mapper.map_labels_to_relationships(
            &strings(&["boundary_violation"]),
            &strings(&["limit_crossing"]),
            RelationshipContext::Unknown,
            true,
        );

        let (rel, confidence) = detected[0];
        assert_eq!(rel, RelationshipType::BoundaryViolates);
        // base 0.95 * weight 1.2 + 0.2 * (2/3), capped at 1.0
        assert!((confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn confidence_formula_matches_contract() {
        let mapper = PsychologyRelationshipMapper::new();
        let detected = mapper.map_labels_to_relationships(
            &strings(&["dependency_pattern"]),
            &[],
            RelationshipContext::Professional,
            true,
        );
        let depends = detected
            .iter()
            .find(|(r, _)| *r == RelationshipType::DependsOn)
            .expect("DEPENDS_ON detected");
        // 0.79 * 0.7 + 0.2 * (1/3)
        let expected = 0.79 * 0.7 + 0.2 / 3.0;
        assert!((depends.1 - expected).abs() < 1e-9);
    }

    #[test]
    fn sequence_requirement_is_enforced() {
        let mapper = PsychologyRelationshipMapper::new();
        let with_sequence = mapper.map_labels_to_relationships(
            &strings(&["repair_attempt"]),
            &[],
            RelationshipContext::Unknown,
            true,
        );
        let without_sequence = mapper.map_labels_to_relationships(
            &strings(&["repair_attempt"]),
            &[],
            RelationshipContext::Unknown,
            false,
        );
        assert!(with_sequence
            .iter()
            .any(|(r, _)| *r == RelationshipType::RepairsAfter));
        assert!(!without_sequence
            .iter()
            .any(|(r, _)| *r == RelationshipType::RepairsAfter));
    }

    #[test]
    fn at_most_five_relationships_returned() {
        let mapper = PsychologyRelationshipMapper::new();
        let many = strings(&[
            "boundary_violation",
            "boundary_testing",
            "boundary_establishment",
            "consent_seeking",
            "consent_withdrawal",
            "gaslighting_pattern",
            "emotional_manipulation",
            "isolation_pattern",
            "trust_betrayal",
        ]);
        let detected = mapper.map_labels_to_relationships(
            &many,
            &[],
            RelationshipContext::Unknown,
            true,
        );
        assert_eq!(detected.len(), 5);
        // Sorted descending.
        for pair in detected.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn unmatched_labels_detect_nothing() {
        let mapper = PsychologyRelationshipMapper::new();
        let detected = mapper.map_labels_to_relationships(
            &strings(&["weather_talk"]),
            &strings(&["lunch_plans"]),
            RelationshipContext::Unknown,
            true,
        );
        assert!(detected.is_empty());
    }

    #[test]
    fn context_detection_picks_highest_overlap() {
        let mapper = PsychologyRelationshipMapper::new();
        assert_eq!(
            mapper.detect_relationship_context(&strings(&[
                "sexual_tension",
                "arousal_escalation",
                "desire_expression"
            ])),
            RelationshipContext::Sexual
        );
        assert_eq!(
            mapper.detect_relationship_context(&strings(&["work_reference", "terms_discussion"])),
            RelationshipContext::Professional
        );
        assert_eq!(
            mapper.detect_relationship_context(&strings(&["nothing_known"])),
            RelationshipContext::Unknown
        );
    }

    #[test]
    fn explanation_names_source_labels() {
        let mapper = PsychologyRelationshipMapper::new();
        let text = mapper.explanation(
            RelationshipType::Gaslights,
            &strings(&["gaslighting_pattern"]),
        );
        assert!(text.contains("Gaslighting"));
        assert!(text.contains("gaslighting_pattern"));
    }
}
