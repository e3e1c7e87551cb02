//! Label taxonomy: two disjoint label universes (coarse = cloud-safe,
//! fine = local-only), synonym normalization, co-occurrence expansion and
//! polarity scores. Loaded once at startup.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// A co-occurrence rule: when every label in `requires` is present, the
/// labels in `implies` are unioned into the set.
#[derive(Debug, Clone, Deserialize)]
pub struct CoOccurrenceRule {
    pub requires: BTreeSet<String>,
    pub implies: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct TaxonomyFile {
    coarse: Vec<String>,
    fine: Vec<String>,
    /// canonical label → surface forms.
    synonyms: BTreeMap<String, Vec<String>>,
    co_occurrence: Vec<CoOccurrenceRule>,
    polarity: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct LabelTaxonomy {
    coarse: BTreeSet<String>,
    fine: BTreeSet<String>,
    /// surface form → canonical label.
    synonyms: BTreeMap<String, String>,
    co_occurrence: Vec<CoOccurrenceRule>,
    polarity: BTreeMap<String, f64>,
}

impl Default for LabelTaxonomy {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LabelTaxonomy {
    /// The bundled taxonomy: 18 coarse root categories and the fine-only
    /// sensitive set.
    pub fn builtin() -> Self {
        let coarse = [
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
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        let fine = [
            "sexuality",
            "substances",
            "mental_health_specific",
            "financial_details",
            "location_specific",
            "family_conflict",
            "relationship_issues",
            "personal_secrets",
            "vulnerability_specific",
            "trauma_indicators",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        let mut synonyms = BTreeMap::new();
        for (canonical, surfaces) in [
            ("stress", vec!["anxiety", "pressure", "overwhelm", "stressed"]),
            ("conflict", vec!["argument", "fight", "disagreement"]),
            ("support", vec!["supportive", "helping", "comfort"]),
            ("intimacy", vec!["closeness", "connection"]),
            ("emotion", vec!["emotional", "feelings"]),
            ("boundaries", vec!["boundary", "limits"]),
            ("trust", vec!["trusting"]),
            ("family", vec!["relatives"]),
            ("social", vec!["relationship", "relational"]),
            ("communication", vec!["talking", "conversation"]),
            ("time", vec!["temporal", "scheduling"]),
            ("substances", vec!["substance_use", "drugs_reference"]),
        ] {
            for surface in surfaces {
                synonyms.insert(surface.to_string(), canonical.to_string());
            }
        }

        let co_occurrence = vec![
            CoOccurrenceRule {
                requires: ["conflict", "intimacy"].iter().map(|s| s.to_string()).collect(),
                implies: ["stress"].iter().map(|s| s.to_string()).collect(),
            },
            CoOccurrenceRule {
                requires: ["support", "trust"].iter().map(|s| s.to_string()).collect(),
                implies: ["care"].iter().map(|s| s.to_string()).collect(),
            },
            CoOccurrenceRule {
                requires: ["boundaries", "conflict"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                implies: ["respect"].iter().map(|s| s.to_string()).collect(),
            },
        ];

        let polarity = [
            ("support", 0.8),
            ("care", 0.7),
            ("trust", 0.7),
            ("growth", 0.6),
            ("intimacy", 0.5),
            ("respect", 0.5),
            ("planning", 0.2),
            ("communication", 0.1),
            ("time", 0.0),
            ("attention", 0.0),
            ("social", 0.1),
            ("work", -0.1),
            ("stress", -0.6),
            ("conflict", -0.7),
            ("family_conflict", -0.7),
            ("trauma_indicators", -0.9),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            coarse,
            fine,
            synonyms,
            co_occurrence,
            polarity,
        }
    }

    /// Load from a TOML file, merging on top of the builtin sets.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read taxonomy file: {}", path.as_ref().display())
        })?;
        let file: TaxonomyFile =
            toml::from_str(&content).with_context(|| "Failed to parse taxonomy TOML")?;

        let mut taxonomy = Self::builtin();
        taxonomy.coarse.extend(file.coarse);
        taxonomy.fine.extend(file.fine);
        for (canonical, surfaces) in file.synonyms {
            for surface in surfaces {
                taxonomy
                    .synonyms
                    .insert(surface.to_lowercase(), canonical.to_lowercase());
            }
        }
        taxonomy.co_occurrence.extend(file.co_occurrence);
        taxonomy.polarity.extend(file.polarity);

        tracing::info!(
            coarse = taxonomy.coarse.len(),
            fine = taxonomy.fine.len(),
            "Loaded label taxonomy"
        );
        Ok(taxonomy)
    }

    /// Normalize a label through the synonym map. Idempotent: canonical
    /// labels map to themselves.
    pub fn normalize(&self, label: &str) -> String {
        let lower = label.to_lowercase();
        self.synonyms.get(&lower).cloned().unwrap_or(lower)
    }

    pub fn is_coarse(&self, label: &str) -> bool {
        self.coarse.contains(&self.normalize(label))
    }

    pub fn is_fine(&self, label: &str) -> bool {
        self.fine.contains(&self.normalize(label))
    }

    pub fn coarse_labels(&self) -> &BTreeSet<String> {
        &self.coarse
    }

    pub fn fine_labels(&self) -> &BTreeSet<String> {
        &self.fine
    }

    pub fn polarity(&self, label: &str) -> f64 {
        self.polarity
            .get(&self.normalize(label))
            .copied()
            .unwrap_or(0.0)
    }

    /// Union in implied labels for every rule whose required set is fully
    /// present. Output is sorted and deduplicated.
    pub fn apply_co_occurrence(&self, labels: &[String]) -> Vec<String> {
        let normalized: BTreeSet<String> = labels.iter().map(|l| self.normalize(l)).collect();
        let mut enhanced = normalized.clone();

        for rule in &self.co_occurrence {
            if rule.requires.is_subset(&normalized) {
                enhanced.extend(rule.implies.iter().cloned());
            }
        }

        enhanced.into_iter().collect()
    }

    /// Split labels into (coarse, fine), dropping anything the taxonomy
    /// doesn't know. The returned sets are disjoint by construction.
    pub fn validate(&self, labels: &[String]) -> (Vec<String>, Vec<String>) {
        let mut coarse_valid = BTreeSet::new();
        let mut fine_valid = BTreeSet::new();

        for label in labels {
            let normalized = self.normalize(label);
            if self.coarse.contains(&normalized) {
                coarse_valid.insert(normalized);
            } else if self.fine.contains(&normalized) {
                fine_valid.insert(normalized);
            } else {
                tracing::debug!(label = %label, "Unknown label dropped");
            }
        }

        (
            coarse_valid.into_iter().collect(),
            fine_valid.into_iter().collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn coarse_and_fine_universes_are_disjoint() {
        let tax = LabelTaxonomy::builtin();
        assert!(tax.coarse.intersection(&tax.fine).next().is_none());
    }

    #[test]
    fn normalize_maps_synonyms_to_canonical() {
        let tax = LabelTaxonomy::builtin();
        assert_eq!(tax.normalize("anxiety"), "stress");
        assert_eq!(tax.normalize("ARGUMENT"), "conflict");
        assert_eq!(tax.normalize("stress"), "stress");
    }

    #[test]
    fn co_occurrence_unions_implied_labels() {
        let tax = LabelTaxonomy::builtin();
        let labels = vec!["conflict".to_string(), "intimacy".to_string()];
        let enhanced = tax.apply_co_occurrence(&labels);
        assert!(enhanced.contains(&"stress".to_string()));
        assert!(enhanced.contains(&"conflict".to_string()));
    }

    #[test]
    fn co_occurrence_requires_full_set() {
        let tax = LabelTaxonomy::builtin();
        let enhanced = tax.apply_co_occurrence(&["conflict".to_string()]);
        assert!(!enhanced.contains(&"stress".to_string()));
    }

    #[test]
    fn validate_drops_unknown_and_separates() {
        let tax = LabelTaxonomy::builtin();
        let (coarse, fine) = tax.validate(&[
            "stress".to_string(),
            "substances".to_string(),
            "no_such_label".to_string(),
        ]);
        assert_eq!(coarse, vec!["stress"]);
        assert_eq!(fine, vec!["substances"]);
    }

    #[test]
    fn validated_coarse_never_intersects_fine_universe() {
        let tax = LabelTaxonomy::builtin();
        let mixed: Vec<String> = tax
            .coarse
            .iter()
            .chain(tax.fine.iter())
            .cloned()
            .collect();
        let (coarse, _) = tax.validate(&mixed);
        for label in &coarse {
            assert!(!tax.fine.contains(label));
        }
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(label in "[a-zA-Z_]{1,24}") {
            let tax = LabelTaxonomy::builtin();
            let once = tax.normalize(&label);
            prop_assert_eq!(tax.normalize(&once), once);
        }

        #[test]
        fn co_occurrence_never_removes_labels(
            labels in proptest::collection::vec("[a-z_]{1,16}", 0..8)
        ) {
            let tax = LabelTaxonomy::builtin();
            let enhanced = tax.apply_co_occurrence(&labels);
            for label in &labels {
                prop_assert!(enhanced.contains(&tax.normalize(label)));
            }
        }
    }
}
