//! Privacy tokenizer for the bridge: routes a sensitive surface to the
//! bounded category prefixes (SENSITIVE, PERSONAL, CONTEXT) and delegates
//! the consistent HMAC tokenization to the shield's tokenizer.

use chatsift_shield::ConsistentTokenizer;
use rand::Rng;

pub struct PrivacyTokenizer {
    inner: ConsistentTokenizer,
}

impl PrivacyTokenizer {
    /// Fresh per-session salt.
    pub fn new() -> Self {
        let salt = hex::encode(rand::rng().random::<[u8; 16]>());
        Self {
            inner: ConsistentTokenizer::new(salt),
        }
    }

    pub fn with_salt(salt: impl Into<String>) -> Self {
        Self {
            inner: ConsistentTokenizer::new(salt.into()),
        }
    }

    /// Category for a fine label: sexual/substance/trauma surfaces are
    /// SENSITIVE, relational ones PERSONAL, everything else CONTEXT.
    pub fn category_for(label: &str) -> &'static str {
        const SENSITIVE: &[&str] = &["sexual", "sexuality", "substance", "trauma"];
        const PERSONAL: &[&str] = &["family", "relationship", "boundary", "personal"];

        if SENSITIVE.iter().any(|s| label.contains(s)) {
            "SENSITIVE"
        } else if PERSONAL.iter().any(|p| label.contains(p)) {
            "PERSONAL"
        } else {
            "CONTEXT"
        }
    }

    /// Consistent token for a fine label; the same label yields the same
    /// token across chunks within a session.
    pub fn tokenize_label(&self, label: &str) -> String {
        self.inner.tokenize(label, Self::category_for(label))
    }

    pub fn tokenize(&self, surface: &str, category: &str) -> String {
        self.inner.tokenize(surface, category)
    }
}

impl Default for PrivacyTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_bounded() {
        assert_eq!(PrivacyTokenizer::category_for("sexuality"), "SENSITIVE");
        assert_eq!(PrivacyTokenizer::category_for("substances"), "SENSITIVE");
        assert_eq!(PrivacyTokenizer::category_for("trauma_indicators"), "SENSITIVE");
        assert_eq!(PrivacyTokenizer::category_for("family_conflict"), "PERSONAL");
        assert_eq!(PrivacyTokenizer::category_for("relationship_issues"), "PERSONAL");
        assert_eq!(PrivacyTokenizer::category_for("location_specific"), "CONTEXT");
    }

    #[test]
    fn same_label_same_token_across_calls() {
        let tok = PrivacyTokenizer::with_salt("fixed-salt");
        assert_eq!(
            tok.tokenize_label("substances"),
            tok.tokenize_label("substances")
        );
    }

    #[test]
    fn token_carries_category_prefix() {
        let tok = PrivacyTokenizer::with_salt("fixed-salt");
        let token = tok.tokenize_label("substances");
        assert!(token.contains("TKN:SENSITIVE:"));
    }
}
