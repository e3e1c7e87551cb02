//! Missing-attachments report: which attachments referenced by the source
//! database are absent on disk, with remediation steps.

use anyhow::{Context, Result};
use chatsift_core::CanonicalMessage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct MissingAttachmentItem {
    pub conv_guid: String,
    pub msg_id: String,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingAttachmentsSummary {
    pub total_missing: usize,
    pub by_conversation: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingAttachmentsReport {
    pub generated_at: DateTime<Utc>,
    pub contact: String,
    pub items: Vec<MissingAttachmentItem>,
    pub summary: MissingAttachmentsSummary,
    pub remediation_guidance: Vec<String>,
}

impl MissingAttachmentsReport {
    /// Scan extracted messages for attachments with no resolvable local
    /// file.
    pub fn from_messages(contact: &str, messages: &[CanonicalMessage]) -> Self {
        let mut items = Vec::new();

        for msg in messages {
            for att in &msg.attachments {
                let missing = match &att.abs_path {
                    Some(path) => !path.exists(),
                    None => true,
                };
                if missing {
                    items.push(MissingAttachmentItem {
                        conv_guid: msg
                            .source_ref
                            .guid
                            .clone()
                            .unwrap_or_else(|| msg.conv_id.clone()),
                        msg_id: msg.msg_id.clone(),
                        filename: att.filename.clone(),
                    });
                }
            }
        }

        let mut by_conversation: BTreeMap<String, usize> = BTreeMap::new();
        for item in &items {
            *by_conversation.entry(item.conv_guid.clone()).or_default() += 1;
        }

        Self {
            generated_at: Utc::now(),
            contact: contact.to_string(),
            summary: MissingAttachmentsSummary {
                total_missing: items.len(),
                by_conversation,
            },
            items,
            remediation_guidance: vec![
                "Open Messages.app and let attachments finish downloading from iCloud."
                    .to_string(),
                "Re-run extraction with access to ~/Library/Messages/Attachments.".to_string(),
                "For a device backup, restore attachments with a full (not reduced) backup."
                    .to_string(),
            ],
        }
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)
            .with_context(|| format!("Failed to write report {}", path.as_ref().display()))?;
        tracing::info!(path = %path.as_ref().display(), "Wrote missing-attachments report");
        Ok(())
    }
}
