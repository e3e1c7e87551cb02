//! Psychology relationship graph: typed edges between chunk nodes, a
//! label-to-relationship mapper and subgraph pattern templates.

pub mod mapper;
pub mod patterns;
pub mod store;

pub use mapper::{PsychologyRelationshipMapper, RelationshipContext, RelationshipMapping};
pub use patterns::{PatternMatch, PatternTemplate};
pub use store::{PoolMetrics, SqliteGraphStore, TemporalEvolution};

use serde::{Deserialize, Serialize};

/// Nine relationship categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipCategory {
    TemporalStructural,
    SexualIntimate,
    BoundaryConsent,
    EmotionalPsychological,
    PowerControl,
    CommunicationContent,
    ProfessionalTransactional,
    FamilySupport,
    AdvancedDynamics,
}

macro_rules! relationship_types {
    ($(($variant:ident, $name:literal, $category:ident)),+ $(,)?) => {
        /// Closed set of typed edge kinds in the psychology graph.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum RelationshipType {
            $($variant,)+
        }

        impl RelationshipType {
            pub const ALL: &'static [RelationshipType] = &[
                $(RelationshipType::$variant,)+
            ];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(RelationshipType::$variant => $name,)+
                }
            }

            pub fn category(&self) -> RelationshipCategory {
                match self {
                    $(RelationshipType::$variant => RelationshipCategory::$category,)+
                }
            }

            pub fn parse(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(RelationshipType::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

relationship_types! {
    // Temporal & structural
    (RespondsTo, "RESPONDS_TO", TemporalStructural),
    (Follows, "FOLLOWS", TemporalStructural),
    (ReferencesBack, "REFERENCES_BACK", TemporalStructural),
    (Interrupts, "INTERRUPTS", TemporalStructural),
    (Initiates, "INITIATES", TemporalStructural),
    // Sexual & intimate
    (SexualEscalates, "SEXUAL_ESCALATES", SexualIntimate),
    (SexualWithdraws, "SEXUAL_WITHDRAWS", SexualIntimate),
    (IntimateConnects, "INTIMATE_CONNECTS", SexualIntimate),
    (IntimateDistances, "INTIMATE_DISTANCES", SexualIntimate),
    (ArousalBuilds, "AROUSAL_BUILDS", SexualIntimate),
    (ArousalDeflates, "AROUSAL_DEFLATES", SexualIntimate),
    (SexualNegotiates, "SEXUAL_NEGOTIATES", SexualIntimate),
    // Boundary & consent
    (BoundarySets, "BOUNDARY_SETS", BoundaryConsent),
    (BoundaryTests, "BOUNDARY_TESTS", BoundaryConsent),
    (BoundaryViolates, "BOUNDARY_VIOLATES", BoundaryConsent),
    (BoundaryReinforces, "BOUNDARY_REINFORCES", BoundaryConsent),
    (ConsentSeeks, "CONSENT_SEEKS", BoundaryConsent),
    (ConsentGives, "CONSENT_GIVES", BoundaryConsent),
    (ConsentWithdraws, "CONSENT_WITHDRAWS", BoundaryConsent),
    (ConsentViolates, "CONSENT_VIOLATES", BoundaryConsent),
    // Emotional & psychological
    (EscalatesFrom, "ESCALATES_FROM", EmotionalPsychological),
    (RepairsAfter, "REPAIRS_AFTER", EmotionalPsychological),
    (Triggers, "TRIGGERS", EmotionalPsychological),
    (Validates, "VALIDATES", EmotionalPsychological),
    (Invalidates, "INVALIDATES", EmotionalPsychological),
    (Gaslights, "GASLIGHTS", EmotionalPsychological),
    (Manipulates, "MANIPULATES", EmotionalPsychological),
    (Soothes, "SOOTHES", EmotionalPsychological),
    // Power & control
    (Dominates, "DOMINATES", PowerControl),
    (SubmitsTo, "SUBMITS_TO", PowerControl),
    (Challenges, "CHALLENGES", PowerControl),
    (Controls, "CONTROLS", PowerControl),
    (Resists, "RESISTS", PowerControl),
    (Enables, "ENABLES", PowerControl),
    (CodependsOn, "CODEPENDS_ON", PowerControl),
    // Communication & content
    (Parallels, "PARALLELS", CommunicationContent),
    (Contradicts, "CONTRADICTS", CommunicationContent),
    (Elaborates, "ELABORATES", CommunicationContent),
    (Clarifies, "CLARIFIES", CommunicationContent),
    (Avoids, "AVOIDS", CommunicationContent),
    (Deflects, "DEFLECTS", CommunicationContent),
    // Professional & transactional
    (NegotiatesService, "NEGOTIATES_SERVICE", ProfessionalTransactional),
    (EstablishesTerms, "ESTABLISHES_TERMS", ProfessionalTransactional),
    (MaintainsProfessional, "MAINTAINS_PROFESSIONAL", ProfessionalTransactional),
    (BlursProfessional, "BLURS_PROFESSIONAL", ProfessionalTransactional),
    // Family & support
    (Nurtures, "NURTURES", FamilySupport),
    (Protects, "PROTECTS", FamilySupport),
    (DependsOn, "DEPENDS_ON", FamilySupport),
    (Supports, "SUPPORTS", FamilySupport),
    (Burdens, "BURDENS", FamilySupport),
    // Advanced dynamics
    (Triangulates, "TRIANGULATES", AdvancedDynamics),
    (Isolates, "ISOLATES", AdvancedDynamics),
    (CompetesWith, "COMPETES_WITH", AdvancedDynamics),
    (AlliesWith, "ALLIES_WITH", AdvancedDynamics),
    (Betrays, "BETRAYS", AdvancedDynamics),
    (Reconciles, "RECONCILES", AdvancedDynamics),
}

macro_rules! pattern_types {
    ($(($variant:ident, $name:literal)),+ $(,)?) => {
        /// Closed set of subgraph templates representing recurring dynamics.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum PatternType {
            $($variant,)+
        }

        impl PatternType {
            pub const ALL: &'static [PatternType] = &[
                $(PatternType::$variant,)+
            ];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(PatternType::$variant => $name,)+
                }
            }

            pub fn parse(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(PatternType::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

pattern_types! {
    // Core relationship patterns
    (EscalationCycle, "escalation_cycle"),
    (RepairCycle, "repair_cycle"),
    (BoundaryTesting, "boundary_testing"),
    (GaslightingSequence, "gaslighting_sequence"),
    (AvoidancePattern, "avoidance_pattern"),
    (ValidationSeeking, "validation_seeking"),
    // Sexual & intimacy patterns
    (SexualEscalationCycle, "sexual_escalation_cycle"),
    (IntimacyApproachAvoidance, "intimacy_approach_avoidance"),
    (ArousalManipulation, "arousal_manipulation"),
    (SexualCoercionSequence, "sexual_coercion_sequence"),
    (IntimacyWithdrawalPunishment, "intimacy_withdrawal_punishment"),
    // Consent & boundary patterns
    (ConsentErosion, "consent_erosion"),
    (BoundaryViolationCycle, "boundary_violation_cycle"),
    (ConsentManufacturing, "consent_manufacturing"),
    (BoundaryReinforcement, "boundary_reinforcement"),
    (ConsentCheckPattern, "consent_check_pattern"),
    // Power & control patterns
    (PowerStruggleCycle, "power_struggle_cycle"),
    (ControlEscalation, "control_escalation"),
    (CodependentSpiral, "codependent_spiral"),
    (SubmissionConditioning, "submission_conditioning"),
    (ResistancePunishment, "resistance_punishment"),
    // Manipulation & psychological patterns
    (ManipulationSequence, "manipulation_sequence"),
    (InvalidationPattern, "invalidation_pattern"),
    (TriangulationPattern, "triangulation_pattern"),
    (IsolationCampaign, "isolation_campaign"),
    (LoveBombingCycle, "love_bombing_cycle"),
    // Family & support patterns
    (CaretakingOverload, "caretaking_overload"),
    (EmotionalParentification, "emotional_parentification"),
    (DependencyCultivation, "dependency_cultivation"),
    (SupportWithdrawal, "support_withdrawal"),
    (NurturingManipulation, "nurturing_manipulation"),
    // Professional / transactional patterns
    (BoundaryBlurProgression, "boundary_blur_progression"),
    (ServiceScopeCreep, "service_scope_creep"),
    (ProfessionalExploitation, "professional_exploitation"),
    (TermsNegotiationCycle, "terms_negotiation_cycle"),
    // Communication & behavioral patterns
    (DeflectionSequence, "deflection_sequence"),
    (ContradictionPattern, "contradiction_pattern"),
    (ClarificationAvoidance, "clarification_avoidance"),
    (InterruptionDominance, "interruption_dominance"),
    // Complex multi-relationship patterns
    (BetrayalReconciliationCycle, "betrayal_reconciliation_cycle"),
    (CompetitionAllianceFlip, "competition_alliance_flip"),
    (CrisisBonding, "crisis_bonding"),
    (RewardPunishmentConditioning, "reward_punishment_conditioning"),
}

// ============================================================================
// Storage-agnostic graph primitives
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub node_type: String,
    pub properties: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub from_node: String,
    pub to_node: String,
    pub relationship_type: RelationshipType,
    pub properties: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationGraph {
    pub conversation_id: String,
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<GraphRelationship>,
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_names_round_trip() {
        for rel in RelationshipType::ALL {
            assert_eq!(RelationshipType::parse(rel.as_str()), Some(*rel));
        }
        assert_eq!(RelationshipType::parse("NOT_A_TYPE"), None);
    }

    #[test]
    fn pattern_names_round_trip() {
        for pattern in PatternType::ALL {
            assert_eq!(PatternType::parse(pattern.as_str()), Some(*pattern));
        }
    }

    #[test]
    fn every_category_is_populated() {
        use RelationshipCategory::*;
        for category in [
            TemporalStructural,
            SexualIntimate,
            BoundaryConsent,
            EmotionalPsychological,
            PowerControl,
            CommunicationContent,
            ProfessionalTransactional,
            FamilySupport,
            AdvancedDynamics,
        ] {
            assert!(
                RelationshipType::ALL.iter().any(|r| r.category() == category),
                "empty category: {category:?}"
            );
        }
    }

    #[test]
    fn enumerations_are_closed_and_distinct() {
        let mut names: Vec<&str> = RelationshipType::ALL.iter().map(|r| r.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), RelationshipType::ALL.len());

        let mut patterns: Vec<&str> = PatternType::ALL.iter().map(|p| p.as_str()).collect();
        patterns.sort();
        patterns.dedup();
        assert_eq!(patterns.len(), PatternType::ALL.len());
    }
}
