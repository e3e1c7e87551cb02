pub mod chunker;
pub mod imessage;
pub mod report;

pub use chunker::ConversationChunker;
pub use imessage::IMessageExtractor;
pub use report::MissingAttachmentsReport;

use anyhow::Result;
use async_trait::async_trait;
use chatsift_core::CanonicalMessage;
use serde::Serialize;

/// Counters accumulated during one extraction run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionReport {
    pub messages_extracted: usize,
    pub reactions_folded: usize,
    pub unresolved_replies: usize,
    pub errors: Vec<String>,
}

/// Capability trait for source extractors. Implementations produce
/// canonical messages and never infer `is_me`; it comes from the source's
/// own attribution bit.
#[async_trait]
pub trait Extractor {
    /// Tag identifying the source family ("imessage", "instagram", ...).
    fn platform(&self) -> &'static str;

    /// Cheap structural validation of the source before extraction.
    async fn validate_source(&self) -> Result<bool>;

    /// Extract all messages. Reactions are folded into their targets and
    /// replies resolved within the extracted set.
    async fn extract(&mut self) -> Result<Vec<CanonicalMessage>>;

    fn report(&self) -> &ExtractionReport;
}
