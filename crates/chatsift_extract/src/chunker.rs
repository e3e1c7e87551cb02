//! Chunking strategies: sliding turn windows, daily windows and fixed
//! character budgets.

use chatsift_core::hash::short_sha256;
use chatsift_core::{CanonicalMessage, Chunk, ChunkMeta, ChunkMethod, Provenance, WindowInfo};
use uuid::Uuid;

pub struct ConversationChunker {
    run_id: String,
}

impl ConversationChunker {
    pub fn new(run_id: Option<String>) -> Self {
        Self {
            run_id: run_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Stable hash over contributing message ids and timestamps.
    fn source_hash(messages: &[&CanonicalMessage]) -> String {
        let content = messages
            .iter()
            .map(|m| format!("{}:{}", m.msg_id, m.timestamp.to_rfc3339()))
            .collect::<Vec<_>>()
            .join("|");
        short_sha256(content.as_bytes(), 12)
    }

    fn chunk_id(&self, conv_id: &str, method: ChunkMethod, index: usize) -> String {
        let content = format!("{}:{}:{}:{}", conv_id, method.as_str(), index, self.run_id);
        format!("ch_{}", short_sha256(content.as_bytes(), 8))
    }

    fn render_line(msg: &CanonicalMessage, contact: &str, fmt: &str) -> String {
        let sender = if msg.is_me { "ME" } else { contact };
        format!(
            "[{}] {}: {}",
            msg.timestamp.format(fmt),
            sender,
            msg.text.as_deref().unwrap_or("")
        )
    }

    fn build_chunk(
        &self,
        window: &[&CanonicalMessage],
        contact: &str,
        method: ChunkMethod,
        index: usize,
        overlap: usize,
        source_hash: &str,
        text: String,
    ) -> Chunk {
        let conv_id = window[0].conv_id.clone();
        let word_count = text.split_whitespace().count();
        Chunk {
            chunk_id: self.chunk_id(&conv_id, method, index),
            conv_id,
            meta: ChunkMeta {
                contact: contact.to_string(),
                platform: window[0].platform.clone(),
                date_start: window[0].timestamp,
                date_end: window[window.len() - 1].timestamp,
                message_ids: window.iter().map(|m| m.msg_id.clone()).collect(),
                labels_coarse: Vec::new(),
                labels_fine_local: Vec::new(),
                char_count: text.chars().count(),
                token_estimate: word_count as f64 * 1.3,
                window: WindowInfo {
                    method,
                    index,
                    overlap,
                },
            },
            provenance: Provenance::new(self.run_id.clone(), source_hash.to_string()),
            text,
        }
    }

    /// Sliding window of `turns_per_chunk` messages with `stride` overlap.
    pub fn chunk_by_turns(
        &self,
        messages: &[CanonicalMessage],
        turns_per_chunk: usize,
        stride: usize,
        contact: &str,
    ) -> Vec<Chunk> {
        if messages.is_empty() {
            return Vec::new();
        }
        let mut sorted: Vec<&CanonicalMessage> = messages.iter().collect();
        sorted.sort_by_key(|m| m.timestamp);
        let source_hash = Self::source_hash(&sorted);

        let step = turns_per_chunk.saturating_sub(stride).max(1);
        let mut chunks = Vec::new();
        let mut index = 0;
        let mut start = 0;

        while start < sorted.len() {
            let end = (start + turns_per_chunk).min(sorted.len());
            let window = &sorted[start..end];

            let text = window
                .iter()
                .map(|m| Self::render_line(m, contact, "%Y-%m-%d %H:%M"))
                .collect::<Vec<_>>()
                .join("\n");

            let overlap = if start > 0 { stride } else { 0 };
            chunks.push(self.build_chunk(
                window,
                contact,
                ChunkMethod::Turns,
                index,
                overlap,
                &source_hash,
                text,
            ));

            index += 1;
            if end == sorted.len() {
                break;
            }
            start += step;
        }

        chunks
    }

    /// One chunk per calendar day.
    pub fn chunk_by_daily(&self, messages: &[CanonicalMessage], contact: &str) -> Vec<Chunk> {
        if messages.is_empty() {
            return Vec::new();
        }
        let mut sorted: Vec<&CanonicalMessage> = messages.iter().collect();
        sorted.sort_by_key(|m| m.timestamp);
        let source_hash = Self::source_hash(&sorted);

        let mut chunks = Vec::new();
        let mut index = 0;
        let mut day_start = 0;

        while day_start < sorted.len() {
            let day = sorted[day_start].timestamp.date_naive();
            let mut day_end = day_start;
            while day_end < sorted.len() && sorted[day_end].timestamp.date_naive() == day {
                day_end += 1;
            }
            let window = &sorted[day_start..day_end];

            let body = window
                .iter()
                .map(|m| Self::render_line(m, contact, "%H:%M"))
                .collect::<Vec<_>>()
                .join("\n");
            let text = format!("=== {} ===\n{}", day, body);

            chunks.push(self.build_chunk(
                window,
                contact,
                ChunkMethod::Daily,
                index,
                0,
                &source_hash,
                text,
            ));

            index += 1;
            day_start = day_end;
        }

        chunks
    }

    /// Greedy packing under a character budget, breaking on message
    /// boundaries.
    pub fn chunk_by_fixed_size(
        &self,
        messages: &[CanonicalMessage],
        char_limit: usize,
        contact: &str,
    ) -> Vec<Chunk> {
        if messages.is_empty() {
            return Vec::new();
        }
        let mut sorted: Vec<&CanonicalMessage> = messages.iter().collect();
        sorted.sort_by_key(|m| m.timestamp);
        let source_hash = Self::source_hash(&sorted);

        let mut chunks = Vec::new();
        let mut index = 0;
        let mut current: Vec<&CanonicalMessage> = Vec::new();
        let mut current_chars = 0usize;

        for msg in sorted {
            let line_len = Self::render_line(msg, contact, "%Y-%m-%d %H:%M")
                .chars()
                .count()
                + 1;

            if current_chars + line_len > char_limit && !current.is_empty() {
                let text = current
                    .iter()
                    .map(|m| Self::render_line(m, contact, "%Y-%m-%d %H:%M"))
                    .collect::<Vec<_>>()
                    .join("\n");
                chunks.push(self.build_chunk(
                    &current,
                    contact,
                    ChunkMethod::Fixed,
                    index,
                    0,
                    &source_hash,
                    text,
                ));
                index += 1;
                current.clear();
                current_chars = 0;
            }

            current.push(msg);
            current_chars += line_len;
        }

        if !current.is_empty() {
            let text = current
                .iter()
                .map(|m| Self::render_line(m, contact, "%Y-%m-%d %H:%M"))
                .collect::<Vec<_>>()
                .join("\n");
            chunks.push(self.build_chunk(
                &current,
                contact,
                ChunkMethod::Fixed,
                index,
                0,
                &source_hash,
                text,
            ));
        }

        chunks
    }

    pub fn chunk_messages(
        &self,
        messages: &[CanonicalMessage],
        method: ChunkMethod,
        contact: &str,
    ) -> Vec<Chunk> {
        match method {
            ChunkMethod::Turns => self.chunk_by_turns(messages, 40, 10, contact),
            ChunkMethod::Daily => self.chunk_by_daily(messages, contact),
            ChunkMethod::Fixed => self.chunk_by_fixed_size(messages, 4000, contact),
            // Semantic chunking reuses the turn windows until a semantic
            // splitter lands.
            ChunkMethod::Semantic => self.chunk_by_turns(messages, 40, 10, contact),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsift_core::SourceRef;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn msg(id: u32, minute: u32, text: &str, is_me: bool) -> CanonicalMessage {
        CanonicalMessage {
            msg_id: id.to_string(),
            conv_id: "conv-1".to_string(),
            platform: "imessage".to_string(),
            timestamp: Utc
                .with_ymd_and_hms(2024, 6, 1 + minute / 1440, (minute / 60) % 24, minute % 60, 0)
                .unwrap(),
            sender: if is_me { "Me" } else { "Alex" }.to_string(),
            sender_id: if is_me { "me" } else { "alex" }.to_string(),
            is_me,
            text: Some(text.to_string()),
            reply_to_msg_id: None,
            reactions: vec![],
            attachments: vec![],
            source_ref: SourceRef {
                path: "chat.db".to_string(),
                guid: None,
            },
            source_meta: BTreeMap::new(),
        }
    }

    #[test]
    fn empty_input_yields_empty_chunks() {
        let chunker = ConversationChunker::new(Some("run".to_string()));
        assert!(chunker.chunk_by_turns(&[], 40, 10, "alex").is_empty());
        assert!(chunker.chunk_by_daily(&[], "alex").is_empty());
        assert!(chunker.chunk_by_fixed_size(&[], 100, "alex").is_empty());
    }

    #[test]
    fn single_message_yields_one_chunk() {
        let chunker = ConversationChunker::new(Some("run".to_string()));
        let messages = vec![msg(1, 0, "hello", true)];
        let chunks = chunker.chunk_by_turns(&messages, 40, 10, "alex");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].meta.message_ids, vec!["1"]);
        assert!(chunks[0].text.contains("ME: hello"));
    }

    #[test]
    fn turn_windows_overlap_by_stride() {
        let chunker = ConversationChunker::new(Some("run".to_string()));
        let messages: Vec<_> = (0..10).map(|i| msg(i, i, "msg", i % 2 == 0)).collect();
        let chunks = chunker.chunk_by_turns(&messages, 4, 2, "alex");
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].meta.window.overlap, 0);
        assert_eq!(chunks[1].meta.window.overlap, 2);
        // The second window starts step = 4 - 2 messages in.
        assert_eq!(chunks[1].meta.message_ids[0], "2");
    }

    #[test]
    fn chunk_ids_are_deterministic_per_run() {
        let a = ConversationChunker::new(Some("run-a".to_string()));
        let b = ConversationChunker::new(Some("run-a".to_string()));
        let c = ConversationChunker::new(Some("run-b".to_string()));
        let messages = vec![msg(1, 0, "hi", true), msg(2, 1, "yo", false)];

        let ca = a.chunk_by_turns(&messages, 40, 10, "alex");
        let cb = b.chunk_by_turns(&messages, 40, 10, "alex");
        let cc = c.chunk_by_turns(&messages, 40, 10, "alex");
        assert_eq!(ca[0].chunk_id, cb[0].chunk_id);
        assert_ne!(ca[0].chunk_id, cc[0].chunk_id);
        assert_eq!(ca[0].provenance.source_hash, cc[0].provenance.source_hash);
    }

    #[test]
    fn daily_chunks_split_on_date() {
        let chunker = ConversationChunker::new(Some("run".to_string()));
        // minute 1500 crosses into the next day.
        let messages = vec![msg(1, 10, "day one", true), msg(2, 1500, "day two", false)];
        let chunks = chunker.chunk_by_daily(&messages, "alex");
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with("=== 2024-06-01 ==="));
        assert!(chunks[1].text.starts_with("=== 2024-06-02 ==="));
    }

    #[test]
    fn fixed_size_respects_char_limit() {
        let chunker = ConversationChunker::new(Some("run".to_string()));
        let messages: Vec<_> = (0..6).map(|i| msg(i, i, "0123456789", true)).collect();
        let chunks = chunker.chunk_by_fixed_size(&messages, 80, "alex");
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.meta.char_count <= 80);
        }
        let total: usize = chunks.iter().map(|c| c.meta.message_ids.len()).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn token_estimate_is_word_count_scaled() {
        let chunker = ConversationChunker::new(Some("run".to_string()));
        let messages = vec![msg(1, 0, "one two three", true)];
        let chunks = chunker.chunk_by_turns(&messages, 40, 10, "alex");
        let words = chunks[0].text.split_whitespace().count() as f64;
        assert!((chunks[0].meta.token_estimate - words * 1.3).abs() < 1e-9);
    }
}
