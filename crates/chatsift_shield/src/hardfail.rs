//! Hard-fail tier: content classes that block processing outright. Pattern
//! detection with threat levels, plus an optional contextual adjuster that
//! may raise a level but can lower `confirmed` no further than `probable`.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Safe,
    /// Logged and warned.
    Suspicious,
    /// Blocks cloud-bound data, local processing continues.
    Probable,
    /// Blocks all processing.
    Confirmed,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Safe => "safe",
            ThreatLevel::Suspicious => "suspicious",
            ThreatLevel::Probable => "probable",
            ThreatLevel::Confirmed => "confirmed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HardFailClass {
    Csam,
    Violence,
    DrugTrafficking,
    FinancialCrime,
}

impl HardFailClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            HardFailClass::Csam => "csam",
            HardFailClass::Violence => "violence",
            HardFailClass::DrugTrafficking => "drug_trafficking",
            HardFailClass::FinancialCrime => "financial_crime",
        }
    }
}

struct PatternSet {
    class: HardFailClass,
    level: ThreatLevel,
    confidence_base: f64,
    patterns: &'static LazyLock<Vec<Regex>>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
        .collect()
}

static CSAM_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(?:child|kid|minor|underage)\s+(?:porn|explicit|sexual|nude|naked)",
        r"\b(?:preteen|underage)\s+(?:model|pic|photo|video|content)s?\b",
        r"\b(?:[5-9]|1[0-7])\s*(?:year|yr|y\.?o\.?)[\s\w]{0,24}\b(?:sexual|nude|explicit)",
        r"\b(?:trade|swap|share|exchange)\s+(?:pics|photos|videos)\s+(?:of\s+)?(?:young|teen|minor)",
        r"\b(?:collection|archive|folder)\s+(?:of|with)\s+(?:young|teen|minor)",
    ])
});

static VIOLENCE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(?:kill|murder|hurt|attack|assault)\s+(?:someone|people|person|him|her|them)\b",
        r"\b(?:bomb|explosive|weapon|gun|ammunition)\s+(?:making|building|buying|getting|acquiring)",
        r"\b(?:plan|planning|gonna|going\s+to)\s+(?:kill|hurt|attack|shoot)\b",
        r"\b(?:hit\s+list|target\s+list)\b",
        r"\b(?:school|workplace|mass)\s+(?:shooting|attack|violence)\b",
    ])
});

static DRUGS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(?:sell|selling|deal|dealing|traffic|smuggle)\s+(?:drugs|cocaine|heroin|meth|fentanyl)",
        r"\b(?:drug\s+deal|trafficking|smuggling|distribution\s+network)\b",
        r"\b(?:cook|cooking|producing)\s+(?:meth|fentanyl)\b",
        r"\b(?:supplier|connect|hookup|dealer)\s+(?:available|needed)\b",
        r"\b(?:product|party\s+favors)\s+(?:for\s+sale|available)\b",
    ])
});

static FINANCIAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(?:money\s+launder\w*|clean\s+money|wash\s+cash)\b",
        r"\b(?:credit\s+card|identity)\s+(?:fraud|theft)\b",
        r"\b(?:fake|forged|counterfeit)\s+(?:id|ids|documents|papers|cards)\b",
        r"\b(?:tax\s+evasion|offshore\s+account|hide\s+money)\b",
    ])
});

fn pattern_sets() -> [PatternSet; 4] {
    [
        PatternSet {
            class: HardFailClass::Csam,
            level: ThreatLevel::Confirmed,
            confidence_base: 0.9,
            patterns: &CSAM_PATTERNS,
        },
        PatternSet {
            class: HardFailClass::Violence,
            level: ThreatLevel::Probable,
            confidence_base: 0.8,
            patterns: &VIOLENCE_PATTERNS,
        },
        PatternSet {
            class: HardFailClass::DrugTrafficking,
            level: ThreatLevel::Probable,
            confidence_base: 0.7,
            patterns: &DRUGS_PATTERNS,
        },
        PatternSet {
            class: HardFailClass::FinancialCrime,
            level: ThreatLevel::Suspicious,
            confidence_base: 0.6,
            patterns: &FINANCIAL_PATTERNS,
        },
    ]
}

/// Result of analysing one text.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub threat_level: ThreatLevel,
    pub confidence: f64,
    pub detected_classes: Vec<String>,
    /// Matched phrases, capped at 5 for privacy in logs.
    pub evidence: Vec<String>,
    pub reasoning: String,
    pub should_block_cloud: bool,
    pub should_block_all: bool,
}

impl DetectionResult {
    fn safe() -> Self {
        Self {
            threat_level: ThreatLevel::Safe,
            confidence: 0.0,
            detected_classes: Vec::new(),
            evidence: Vec::new(),
            reasoning: "No threats detected".to_string(),
            should_block_cloud: false,
            should_block_all: false,
        }
    }
}

/// Optional second-stage classifier over the surrounding messages. May
/// return an adjusted (level, confidence); the detector clamps the result
/// so `confirmed` never drops below `probable`.
pub trait ContextualClassifier: Send + Sync {
    fn adjust(
        &self,
        text: &str,
        context: &[String],
        pattern_result: &DetectionResult,
    ) -> Option<(ThreatLevel, f64)>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionStats {
    pub total_analyzed: u64,
    pub threats_detected: u64,
    pub by_level: BTreeMap<String, u64>,
    pub by_class: BTreeMap<String, u64>,
}

pub struct HardFailDetector {
    classifier: Option<Box<dyn ContextualClassifier>>,
    stats: std::sync::Mutex<DetectionStats>,
}

impl HardFailDetector {
    pub fn new() -> Self {
        Self {
            classifier: None,
            stats: std::sync::Mutex::new(DetectionStats::default()),
        }
    }

    pub fn with_classifier(classifier: Box<dyn ContextualClassifier>) -> Self {
        Self {
            classifier: Some(classifier),
            stats: std::sync::Mutex::new(DetectionStats::default()),
        }
    }

    /// Class names triggered in `text`, regardless of level.
    pub fn detect_classes(&self, text: &str) -> Vec<String> {
        self.analyze(text, &[]).detected_classes
    }

    /// Full multi-stage analysis over `text` with optional surrounding
    /// messages.
    pub fn analyze(&self, text: &str, context: &[String]) -> DetectionResult {
        let mut result = DetectionResult::safe();
        let mut evidence: Vec<String> = Vec::new();

        for set in pattern_sets() {
            let mut class_hit = false;
            for regex in set.patterns.iter() {
                if let Some(m) = regex.find(text) {
                    class_hit = true;
                    if evidence.len() < 5 {
                        evidence.push(m.as_str().to_string());
                    }
                }
            }
            if class_hit {
                result.detected_classes.push(set.class.as_str().to_string());
                if set.level > result.threat_level {
                    result.threat_level = set.level;
                }
                result.confidence = result.confidence.max(set.confidence_base);
            }
        }
        result.evidence = evidence;

        if let Some(classifier) = &self.classifier {
            if let Some((adjusted_level, adjusted_confidence)) =
                classifier.adjust(text, context, &result)
            {
                let pattern_level = result.threat_level;
                let level = if pattern_level == ThreatLevel::Confirmed {
                    // Contextual evidence can soften a confirmed hit to
                    // probable at most, never below.
                    adjusted_level.max(ThreatLevel::Probable)
                } else {
                    adjusted_level.max(pattern_level)
                };
                result.threat_level = level;
                result.confidence = result.confidence.max(adjusted_confidence);
            }
        }

        result.should_block_cloud =
            matches!(result.threat_level, ThreatLevel::Probable | ThreatLevel::Confirmed);
        result.should_block_all = result.threat_level == ThreatLevel::Confirmed;
        result.reasoning = if result.detected_classes.is_empty() {
            "No threats detected".to_string()
        } else {
            format!(
                "Pattern matches in classes: {}",
                result.detected_classes.join(", ")
            )
        };

        self.record(&result);
        result
    }

    fn record(&self, result: &DetectionResult) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.total_analyzed += 1;
        if result.threat_level != ThreatLevel::Safe {
            stats.threats_detected += 1;
        }
        *stats
            .by_level
            .entry(result.threat_level.as_str().to_string())
            .or_default() += 1;
        for class in &result.detected_classes {
            *stats.by_class.entry(class.clone()).or_default() += 1;
        }

        match result.threat_level {
            ThreatLevel::Confirmed => {
                tracing::error!(classes = ?result.detected_classes, "Confirmed hard-fail content")
            }
            ThreatLevel::Probable => {
                tracing::warn!(classes = ?result.detected_classes, "Probable hard-fail content")
            }
            ThreatLevel::Suspicious => {
                tracing::warn!(classes = ?result.detected_classes, "Suspicious content")
            }
            ThreatLevel::Safe => {}
        }
    }

    pub fn stats(&self) -> DetectionStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for HardFailDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_is_safe() {
        let detector = HardFailDetector::new();
        let result = detector.analyze("lunch at noon? the weather is great", &[]);
        assert_eq!(result.threat_level, ThreatLevel::Safe);
        assert!(!result.should_block_cloud);
        assert!(!result.should_block_all);
    }

    #[test]
    fn violence_is_probable_and_blocks_cloud_only() {
        let detector = HardFailDetector::new();
        let result = detector.analyze("I'm planning to kill him tomorrow", &[]);
        assert_eq!(result.threat_level, ThreatLevel::Probable);
        assert!(result.should_block_cloud);
        assert!(!result.should_block_all);
        assert_eq!(result.detected_classes, vec!["violence"]);
    }

    #[test]
    fn financial_crime_is_suspicious_only() {
        let detector = HardFailDetector::new();
        let result = detector.analyze("they wash cash through the shop", &[]);
        assert_eq!(result.threat_level, ThreatLevel::Suspicious);
        assert!(!result.should_block_cloud);
    }

    #[test]
    fn confirmed_blocks_everything() {
        let detector = HardFailDetector::new();
        let result = detector.analyze("he shared child explicit material", &[]);
        assert_eq!(result.threat_level, ThreatLevel::Confirmed);
        assert!(result.should_block_cloud);
        assert!(result.should_block_all);
    }

    struct Downgrader;
    impl ContextualClassifier for Downgrader {
        fn adjust(
            &self,
            _text: &str,
            _context: &[String],
            _pattern_result: &DetectionResult,
        ) -> Option<(ThreatLevel, f64)> {
            Some((ThreatLevel::Safe, 0.9))
        }
    }

    struct Upgrader;
    impl ContextualClassifier for Upgrader {
        fn adjust(
            &self,
            _text: &str,
            _context: &[String],
            _pattern_result: &DetectionResult,
        ) -> Option<(ThreatLevel, f64)> {
            Some((ThreatLevel::Probable, 0.85))
        }
    }

    #[test]
    fn classifier_cannot_lower_confirmed_below_probable() {
        let detector = HardFailDetector::with_classifier(Box::new(Downgrader));
        let result = detector.analyze("he shared child explicit material", &[]);
        assert_eq!(result.threat_level, ThreatLevel::Probable);
    }

    #[test]
    fn classifier_can_raise_level() {
        let detector = HardFailDetector::with_classifier(Box::new(Upgrader));
        let result = detector.analyze("totally ordinary text", &[]);
        assert_eq!(result.threat_level, ThreatLevel::Probable);
    }

    #[test]
    fn stats_accumulate() {
        let detector = HardFailDetector::new();
        detector.analyze("hello", &[]);
        detector.analyze("planning to attack them", &[]);
        let stats = detector.stats();
        assert_eq!(stats.total_analyzed, 2);
        assert_eq!(stats.threats_detected, 1);
        assert_eq!(stats.by_class.get("violence"), Some(&1));
    }

    #[test]
    fn evidence_is_capped_for_privacy() {
        let detector = HardFailDetector::new();
        let text = "sell cocaine, sell heroin, sell meth, sell fentanyl, \
                    dealer needed, supplier available, drug deal here";
        let result = detector.analyze(text, &[]);
        assert!(result.evidence.len() <= 5);
    }
}
