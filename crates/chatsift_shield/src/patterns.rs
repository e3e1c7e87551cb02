//! Pattern-tier PII detection: deterministic regexes, compiled once.

use regex::Regex;
use std::sync::LazyLock;

// ============================================================================
// Pre-compiled detectors
// ============================================================================

static RE_EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

static RE_PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+?\d{1,3}[\s.-]?(?:\(\d{3}\)|\d{3})[\s.-]?\d{3}[\s.-]?\d{4}").unwrap()
});

static RE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:https?://|www\.)[^\s<>"]+"#).unwrap());

static RE_CREDIT_CARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{4}\b").unwrap());

static RE_SSN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());

static RE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b\d{1,5}\s+(?:[A-Z][a-z]+\s+){1,3}(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr|Court|Ct|Place|Pl|Way)\b",
    )
    .unwrap()
});

/// Common first names for the optional name tier. Deliberately small; the
/// point is catching casual references, not a census.
const COMMON_NAMES: &[&str] = &[
    "James", "Mary", "John", "Patricia", "Robert", "Jennifer", "Michael", "Linda", "David",
    "Elizabeth", "William", "Barbara", "Richard", "Susan", "Joseph", "Jessica", "Thomas", "Sarah",
    "Christopher", "Karen", "Daniel", "Nancy", "Matthew", "Lisa", "Anthony", "Betty", "Mark",
    "Margaret", "Emily", "Ashley", "Amanda", "Alice", "Hannah", "Kevin", "Brian", "Laura",
];

static RE_NAMES: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = COMMON_NAMES.join("|");
    Regex::new(&format!(r"\b(?:{alternation})\b")).unwrap()
});

// ============================================================================
// Match model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PiiKind {
    Email,
    Phone,
    Url,
    CreditCard,
    Ssn,
    Address,
    Name,
}

impl PiiKind {
    /// Category tag used in placeholder tokens.
    pub fn as_str(&self) -> &'static str {
        match self {
            PiiKind::Email => "EMAIL",
            PiiKind::Phone => "PHONE",
            PiiKind::Url => "URL",
            PiiKind::CreditCard => "CC",
            PiiKind::Ssn => "SSN",
            PiiKind::Address => "ADDRESS",
            PiiKind::Name => "NAME",
        }
    }
}

/// One detection: kind, byte span, surface and base confidence.
#[derive(Debug, Clone)]
pub struct PiiMatch {
    pub kind: PiiKind,
    pub start: usize,
    pub end: usize,
    pub surface: String,
    pub confidence: f64,
}

pub struct PiiDetector;

impl PiiDetector {
    pub fn new() -> Self {
        Self
    }

    /// Run every pattern over `text`. Overlapping detections are resolved
    /// by preferring the earlier, longer match so replacements never
    /// corrupt each other.
    pub fn detect(&self, text: &str, include_names: bool) -> Vec<PiiMatch> {
        let mut raw: Vec<PiiMatch> = Vec::new();

        let mut scan = |regex: &Regex, kind: PiiKind, confidence: f64| {
            for m in regex.find_iter(text) {
                raw.push(PiiMatch {
                    kind,
                    start: m.start(),
                    end: m.end(),
                    surface: m.as_str().to_string(),
                    confidence,
                });
            }
        };

        scan(&RE_EMAIL, PiiKind::Email, 0.99);
        scan(&RE_URL, PiiKind::Url, 0.98);
        scan(&RE_SSN, PiiKind::Ssn, 0.95);
        scan(&RE_CREDIT_CARD, PiiKind::CreditCard, 0.90);
        scan(&RE_PHONE, PiiKind::Phone, 0.95);
        scan(&RE_ADDRESS, PiiKind::Address, 0.80);
        if include_names {
            scan(&RE_NAMES, PiiKind::Name, 0.60);
        }

        // Longest-earliest wins on overlap.
        raw.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
        let mut kept: Vec<PiiMatch> = Vec::with_capacity(raw.len());
        for candidate in raw {
            let overlaps = kept
                .iter()
                .any(|m| candidate.start < m.end && m.start < candidate.end);
            if !overlaps {
                kept.push(candidate);
            }
        }
        kept
    }
}

impl Default for PiiDetector {
    fn default() -> Self {
        Self::new()
    }
}
