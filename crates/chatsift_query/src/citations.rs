//! Citation bookkeeping for RAG answers: each retrieved chunk becomes a
//! numbered citation with a bounded snippet.

use chatsift_index::SearchResult;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    /// "C1", "C2", ... in retrieval order.
    pub id: String,
    pub chunk_id: String,
    pub message_ids: Vec<String>,
    pub score: f64,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

#[derive(Debug, Default)]
pub struct CitationManager {
    citations: Vec<Citation>,
}

impl CitationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.citations.clear();
    }

    pub fn add(&mut self, result: &SearchResult, max_snippet_length: usize) {
        let mut snippet: String = result.text.chars().take(max_snippet_length).collect();
        if result.text.chars().count() > max_snippet_length {
            snippet.push('…');
        }

        self.citations.push(Citation {
            id: format!("C{}", self.citations.len() + 1),
            chunk_id: result.chunk_id.clone(),
            message_ids: result.message_ids.clone(),
            score: result.combined_score,
            snippet,
            date: result.date_start.as_ref().map(|d| d.chars().take(10).collect()),
            platform: result.platform.clone(),
        });
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    pub fn into_citations(self) -> Vec<Citation> {
        self.citations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsift_core::PrivacyTier;
    use std::collections::BTreeMap;

    fn result(chunk_id: &str, text: &str) -> SearchResult {
        SearchResult {
            chunk_id: chunk_id.to_string(),
            text: text.to_string(),
            combined_score: 0.8,
            scores: BTreeMap::new(),
            contributions: BTreeMap::new(),
            message_ids: vec!["1".to_string(), "2".to_string()],
            labels_coarse: vec![],
            privacy_tier: PrivacyTier::CloudSafe,
            date_start: Some("2024-05-02T09:30:00+00:00".to_string()),
            platform: Some("imessage".to_string()),
        }
    }

    #[test]
    fn citations_are_numbered_in_order() {
        let mut manager = CitationManager::new();
        manager.add(&result("ch_a", "first"), 300);
        manager.add(&result("ch_b", "second"), 300);
        let citations = manager.citations();
        assert_eq!(citations[0].id, "C1");
        assert_eq!(citations[1].id, "C2");
        assert_eq!(citations[0].chunk_id, "ch_a");
    }

    #[test]
    fn snippets_are_bounded() {
        let mut manager = CitationManager::new();
        let long_text = "x".repeat(500);
        manager.add(&result("ch_a", &long_text), 300);
        let snippet = &manager.citations()[0].snippet;
        assert_eq!(snippet.chars().count(), 301); // 300 + ellipsis
        assert!(snippet.ends_with('…'));
    }

    #[test]
    fn date_is_truncated_to_day() {
        let mut manager = CitationManager::new();
        manager.add(&result("ch_a", "text"), 300);
        assert_eq!(manager.citations()[0].date.as_deref(), Some("2024-05-02"));
    }
}
