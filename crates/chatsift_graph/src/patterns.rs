//! Pattern templates: each names a relationship-type walk with a length
//! range and a confidence function `min(1, base + factor · walk_len)`.
//! Detection is a bounded-length path search over the typed edge set.

use crate::{GraphRelationship, PatternType, RelationshipType};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct PatternTemplate {
    pub pattern: PatternType,
    /// Relationship type whose walks realize the pattern.
    pub walk: RelationshipType,
    pub min_len: usize,
    pub max_len: usize,
    pub base_confidence: f64,
    pub length_factor: f64,
}

impl PatternTemplate {
    pub fn confidence(&self, walk_len: usize) -> f64 {
        (self.base_confidence + self.length_factor * walk_len as f64).min(1.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternMatch {
    pub pattern_type: PatternType,
    pub confidence: f64,
    pub nodes_involved: Vec<String>,
    pub relationships_involved: Vec<RelationshipType>,
    pub walk_length: usize,
}

fn template(
    pattern: PatternType,
    walk: RelationshipType,
    min_len: usize,
    max_len: usize,
    base: f64,
    factor: f64,
) -> PatternTemplate {
    PatternTemplate {
        pattern,
        walk,
        min_len,
        max_len,
        base_confidence: base,
        length_factor: factor,
    }
}

/// The full template table, one per pattern type.
pub fn templates() -> Vec<PatternTemplate> {
    use PatternType as P;
    use RelationshipType as R;

    vec![
        // Core
        template(P::EscalationCycle, R::EscalatesFrom, 2, 5, 0.7, 0.1),
        template(P::RepairCycle, R::RepairsAfter, 1, 3, 0.8, 0.0),
        template(P::BoundaryTesting, R::BoundaryTests, 2, 8, 0.6, 0.15),
        template(P::GaslightingSequence, R::Gaslights, 2, 6, 0.75, 0.1),
        template(P::AvoidancePattern, R::Avoids, 2, 6, 0.6, 0.1),
        template(P::ValidationSeeking, R::Validates, 3, 8, 0.6, 0.08),
        // Sexual & intimacy
        template(P::SexualEscalationCycle, R::SexualEscalates, 2, 5, 0.7, 0.1),
        template(P::IntimacyApproachAvoidance, R::IntimateDistances, 2, 6, 0.65, 0.1),
        template(P::ArousalManipulation, R::ArousalBuilds, 2, 5, 0.7, 0.1),
        template(P::SexualCoercionSequence, R::SexualNegotiates, 2, 5, 0.75, 0.1),
        template(P::IntimacyWithdrawalPunishment, R::SexualWithdraws, 2, 5, 0.7, 0.1),
        // Consent & boundary
        template(P::ConsentErosion, R::ConsentWithdraws, 2, 6, 0.75, 0.1),
        template(P::BoundaryViolationCycle, R::BoundaryViolates, 2, 6, 0.8, 0.1),
        template(P::ConsentManufacturing, R::ConsentSeeks, 3, 8, 0.65, 0.08),
        template(P::BoundaryReinforcement, R::BoundaryReinforces, 2, 6, 0.7, 0.1),
        template(P::ConsentCheckPattern, R::ConsentSeeks, 2, 6, 0.6, 0.1),
        // Power & control
        template(P::PowerStruggleCycle, R::Challenges, 2, 6, 0.7, 0.1),
        template(P::ControlEscalation, R::Controls, 2, 6, 0.75, 0.1),
        template(P::CodependentSpiral, R::CodependsOn, 2, 6, 0.7, 0.1),
        template(P::SubmissionConditioning, R::SubmitsTo, 3, 8, 0.7, 0.08),
        template(P::ResistancePunishment, R::Resists, 2, 6, 0.65, 0.1),
        // Manipulation & psychological
        template(P::ManipulationSequence, R::Manipulates, 2, 6, 0.75, 0.1),
        template(P::InvalidationPattern, R::Invalidates, 2, 6, 0.7, 0.1),
        template(P::TriangulationPattern, R::Triangulates, 2, 5, 0.7, 0.1),
        template(P::IsolationCampaign, R::Isolates, 2, 8, 0.75, 0.1),
        template(P::LoveBombingCycle, R::IntimateConnects, 3, 8, 0.65, 0.08),
        // Family & support
        template(P::CaretakingOverload, R::Burdens, 2, 6, 0.7, 0.1),
        template(P::EmotionalParentification, R::Nurtures, 3, 8, 0.65, 0.08),
        template(P::DependencyCultivation, R::DependsOn, 3, 8, 0.7, 0.08),
        template(P::SupportWithdrawal, R::Supports, 2, 6, 0.6, 0.1),
        template(P::NurturingManipulation, R::Nurtures, 2, 6, 0.65, 0.1),
        // Professional / transactional
        template(P::BoundaryBlurProgression, R::BlursProfessional, 2, 6, 0.7, 0.1),
        template(P::ServiceScopeCreep, R::EstablishesTerms, 2, 6, 0.65, 0.1),
        template(P::ProfessionalExploitation, R::NegotiatesService, 2, 6, 0.7, 0.1),
        template(P::TermsNegotiationCycle, R::NegotiatesService, 3, 8, 0.6, 0.08),
        // Communication & behavioral
        template(P::DeflectionSequence, R::Deflects, 2, 6, 0.65, 0.1),
        template(P::ContradictionPattern, R::Contradicts, 2, 6, 0.65, 0.1),
        template(P::ClarificationAvoidance, R::Avoids, 3, 8, 0.6, 0.08),
        template(P::InterruptionDominance, R::Interrupts, 2, 6, 0.65, 0.1),
        // Complex multi-relationship
        template(P::BetrayalReconciliationCycle, R::Betrays, 2, 6, 0.75, 0.1),
        template(P::CompetitionAllianceFlip, R::CompetesWith, 2, 6, 0.65, 0.1),
        template(P::CrisisBonding, R::AlliesWith, 2, 6, 0.6, 0.1),
        template(P::RewardPunishmentConditioning, R::Controls, 3, 8, 0.7, 0.08),
    ]
}

/// Detect one template over the edge set: maximal walks of the template's
/// relationship type with length within bounds.
pub fn detect_template(
    template: &PatternTemplate,
    relationships: &[GraphRelationship],
) -> Vec<PatternMatch> {
    // Adjacency restricted to the walk type.
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut targets: BTreeSet<&str> = BTreeSet::new();
    for rel in relationships {
        if rel.relationship_type == template.walk {
            adjacency
                .entry(rel.from_node.as_str())
                .or_default()
                .push(rel.to_node.as_str());
            targets.insert(rel.to_node.as_str());
        }
    }
    if adjacency.is_empty() {
        return Vec::new();
    }

    // Walk starts: nodes with an outgoing edge but no incoming one.
    let starts: Vec<&str> = adjacency
        .keys()
        .filter(|node| !targets.contains(**node))
        .copied()
        .collect();

    let mut matches = Vec::new();
    for start in starts {
        let mut path = vec![start];
        longest_walks(&adjacency, start, template.max_len, &mut path, &mut |walk| {
            let walk_len = walk.len() - 1;
            if walk_len >= template.min_len {
                matches.push(PatternMatch {
                    pattern_type: template.pattern,
                    confidence: template.confidence(walk_len),
                    nodes_involved: walk.iter().map(|n| n.to_string()).collect(),
                    relationships_involved: vec![template.walk],
                    walk_length: walk_len,
                });
            }
        });
    }
    matches
}

/// Depth-first enumeration of maximal walks up to `max_len` edges.
fn longest_walks<'a>(
    adjacency: &BTreeMap<&'a str, Vec<&'a str>>,
    node: &'a str,
    max_len: usize,
    path: &mut Vec<&'a str>,
    emit: &mut impl FnMut(&[&'a str]),
) {
    let at_limit = path.len() - 1 >= max_len;
    let next = if at_limit {
        None
    } else {
        adjacency.get(node)
    };

    match next {
        Some(successors) if !successors.is_empty() => {
            for &succ in successors {
                if path.contains(&succ) {
                    // Cycle guard: emit what we have.
                    emit(path);
                    continue;
                }
                path.push(succ);
                longest_walks(adjacency, succ, max_len, path, emit);
                path.pop();
            }
        }
        _ => emit(path),
    }
}

/// Run all (or the selected) templates over the edge set.
pub fn detect_patterns(
    relationships: &[GraphRelationship],
    pattern_types: Option<&[PatternType]>,
) -> Vec<PatternMatch> {
    let all = templates();
    let selected: Vec<&PatternTemplate> = match pattern_types {
        Some(wanted) => all.iter().filter(|t| wanted.contains(&t.pattern)).collect(),
        None => all.iter().collect(),
    };

    let mut matches = Vec::new();
    for template in selected {
        matches.extend(detect_template(template, relationships));
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn edge(from: &str, to: &str, rel: RelationshipType) -> GraphRelationship {
        GraphRelationship {
            from_node: from.to_string(),
            to_node: to.to_string(),
            relationship_type: rel,
            properties: json!({}),
        }
    }

    #[test]
    fn every_pattern_type_has_a_template() {
        let table = templates();
        for pattern in PatternType::ALL {
            assert!(
                table.iter().any(|t| t.pattern == *pattern),
                "no template for {pattern:?}"
            );
        }
        assert_eq!(table.len(), PatternType::ALL.len());
    }

    #[test]
    fn escalation_chain_matches_with_length_scaled_confidence() {
        let edges = vec![
            edge("a", "b", RelationshipType::EscalatesFrom),
            edge("b", "c", RelationshipType::EscalatesFrom),
            edge("c", "d", RelationshipType::EscalatesFrom),
        ];
        let matches = detect_patterns(&edges, Some(&[PatternType::EscalationCycle]));

        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.walk_length, 3);
        assert_eq!(m.nodes_involved, vec!["a", "b", "c", "d"]);
        // 0.7 + 0.1 * 3
        assert!((m.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn short_walks_below_min_len_do_not_match() {
        let edges = vec![edge("a", "b", RelationshipType::EscalatesFrom)];
        let matches = detect_patterns(&edges, Some(&[PatternType::EscalationCycle]));
        assert!(matches.is_empty());
    }

    #[test]
    fn repair_cycle_matches_single_edge() {
        let edges = vec![edge("conflict", "repair", RelationshipType::RepairsAfter)];
        let matches = detect_patterns(&edges, Some(&[PatternType::RepairCycle]));
        assert_eq!(matches.len(), 1);
        assert!((matches[0].confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn walk_length_is_capped_at_template_max() {
        let mut edges = Vec::new();
        for i in 0..10 {
            edges.push(edge(
                &format!("n{i}"),
                &format!("n{}", i + 1),
                RelationshipType::EscalatesFrom,
            ));
        }
        let matches = detect_patterns(&edges, Some(&[PatternType::EscalationCycle]));
        assert!(!matches.is_empty());
        for m in &matches {
            assert!(m.walk_length <= 5);
        }
    }

    #[test]
    fn confidence_clips_to_one() {
        let t = template(
            PatternType::BoundaryTesting,
            RelationshipType::BoundaryTests,
            2,
            8,
            0.6,
            0.15,
        );
        assert!((t.confidence(2) - 0.9).abs() < 1e-9);
        assert_eq!(t.confidence(5), 1.0);
    }

    #[test]
    fn cyclic_edges_do_not_hang_detection() {
        let edges = vec![
            edge("a", "b", RelationshipType::BoundaryTests),
            edge("b", "a", RelationshipType::BoundaryTests),
            edge("x", "a", RelationshipType::BoundaryTests),
        ];
        // Must terminate; the a<->b cycle is cut by the guard.
        let _ = detect_patterns(&edges, Some(&[PatternType::BoundaryTesting]));
    }

    #[test]
    fn unrelated_edge_types_do_not_match() {
        let edges = vec![
            edge("a", "b", RelationshipType::Follows),
            edge("b", "c", RelationshipType::Follows),
        ];
        let matches = detect_patterns(&edges, Some(&[PatternType::EscalationCycle]));
        assert!(matches.is_empty());
    }
}
