//! Consistent pseudonymization. The same `(surface, kind)` pair always
//! yields the same opaque token under a per-installation salt, so
//! downstream components can reason about identity without seeing the
//! surface.

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::Serialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

type HmacSha256 = Hmac<Sha256>;

/// Load a 64-hex-char salt from `path`, creating it with OS randomness if
/// absent.
pub fn load_or_create_salt<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    if path.exists() {
        let salt = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read salt file: {}", path.display()))?;
        return Ok(salt.trim().to_string());
    }

    let bytes: [u8; 32] = rand::rng().random();
    let salt = hex::encode(bytes);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, &salt)
        .with_context(|| format!("Failed to write salt file: {}", path.display()))?;
    tracing::info!(path = %path.display(), "Created new pseudonymization salt");
    Ok(salt)
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenizerStats {
    pub distinct_surfaces: usize,
    pub by_kind: std::collections::BTreeMap<String, usize>,
}

/// HMAC-based tokenizer with a per-run cache.
pub struct ConsistentTokenizer {
    salt: String,
    cache: Mutex<HashMap<(String, String), String>>,
}

impl ConsistentTokenizer {
    pub fn new(salt: impl Into<String>) -> Self {
        Self {
            salt: salt.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// `⟦TKN:<KIND>:<8-hex>⟧` for the given surface. Tokens are idempotent
    /// under re-tokenization because a token never matches a PII pattern.
    pub fn tokenize(&self, surface: &str, kind: &str) -> String {
        let key = (surface.to_string(), kind.to_string());
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = cache.get(&key) {
            return token.clone();
        }

        let mut mac = HmacSha256::new_from_slice(self.salt.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(surface.as_bytes());
        mac.update(b":");
        mac.update(kind.as_bytes());
        let digest = mac.finalize().into_bytes();
        let token = format!("\u{27e6}TKN:{}:{}\u{27e7}", kind, &hex::encode(digest)[..8]);

        cache.insert(key, token.clone());
        token
    }

    /// Inverse lookup over this run's cache: token → original surface.
    pub fn surface_for(&self, token: &str) -> Option<String> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .iter()
            .find(|(_, t)| t.as_str() == token)
            .map(|((surface, _), _)| surface.clone())
    }

    /// Replace every cached token occurring in `text` with its surface.
    /// Only meaningful within the run that produced the tokens.
    pub fn restore(&self, text: &str) -> String {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let mut restored = text.to_string();
        for ((surface, _), token) in cache.iter() {
            restored = restored.replace(token.as_str(), surface);
        }
        restored
    }

    pub fn stats(&self) -> TokenizerStats {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let mut by_kind = std::collections::BTreeMap::new();
        for (_, kind) in cache.keys() {
            *by_kind.entry(kind.clone()).or_default() += 1;
        }
        TokenizerStats {
            distinct_surfaces: cache.len(),
            by_kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn same_surface_same_token() {
        let tok = ConsistentTokenizer::new("a".repeat(64));
        let t1 = tok.tokenize("alice@example.com", "EMAIL");
        let t2 = tok.tokenize("alice@example.com", "EMAIL");
        assert_eq!(t1, t2);
    }

    #[test]
    fn different_kind_different_token() {
        let tok = ConsistentTokenizer::new("a".repeat(64));
        let t1 = tok.tokenize("555-0101", "PHONE");
        let t2 = tok.tokenize("555-0101", "GENERAL");
        assert_ne!(t1, t2);
    }

    #[test]
    fn different_salt_different_token() {
        let a = ConsistentTokenizer::new("a".repeat(64));
        let b = ConsistentTokenizer::new("b".repeat(64));
        assert_ne!(
            a.tokenize("alice@example.com", "EMAIL"),
            b.tokenize("alice@example.com", "EMAIL")
        );
    }

    #[test]
    fn token_has_grammar_shape() {
        let tok = ConsistentTokenizer::new("a".repeat(64));
        let token = tok.tokenize("alice@example.com", "EMAIL");
        assert!(token.starts_with("\u{27e6}TKN:EMAIL:"));
        assert!(token.ends_with('\u{27e7}'));
        let hex_part = token
            .trim_start_matches("\u{27e6}TKN:EMAIL:")
            .trim_end_matches('\u{27e7}');
        assert_eq!(hex_part.len(), 8);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn salt_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("salt");
        let created = load_or_create_salt(&path).unwrap();
        assert_eq!(created.len(), 64);
        let loaded = load_or_create_salt(&path).unwrap();
        assert_eq!(created, loaded);
    }

    #[test]
    fn restore_inverts_tokenization() {
        let tok = ConsistentTokenizer::new("a".repeat(64));
        let token = tok.tokenize("alice@example.com", "EMAIL");
        assert_eq!(
            tok.surface_for(&token).as_deref(),
            Some("alice@example.com")
        );
        let text = format!("write to {token} today");
        assert_eq!(tok.restore(&text), "write to alice@example.com today");
        assert_eq!(tok.surface_for("⟦TKN:EMAIL:00000000⟧"), None);
    }

    #[test]
    fn stats_count_kinds() {
        let tok = ConsistentTokenizer::new("a".repeat(64));
        tok.tokenize("a@b.co", "EMAIL");
        tok.tokenize("c@d.co", "EMAIL");
        tok.tokenize("555-0100", "PHONE");
        let stats = tok.stats();
        assert_eq!(stats.distinct_surfaces, 3);
        assert_eq!(stats.by_kind["EMAIL"], 2);
        assert_eq!(stats.by_kind["PHONE"], 1);
    }

    proptest! {
        #[test]
        fn tokenization_is_deterministic(surface in ".{1,40}", kind in "[A-Z]{2,10}") {
            let tok = ConsistentTokenizer::new("f".repeat(64));
            prop_assert_eq!(tok.tokenize(&surface, &kind), tok.tokenize(&surface, &kind));
        }
    }
}
