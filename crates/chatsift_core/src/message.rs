//! Canonical message model: the universal representation every extractor
//! must produce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A single message after extraction, platform differences normalized away.
///
/// Reactions referencing this message are folded into `reactions` and never
/// appear as standalone messages. `reply_to_msg_id` is only set when the
/// target resolved within the extracted set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub msg_id: String,
    pub conv_id: String,
    pub platform: String,
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    pub sender_id: String,
    pub is_me: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_msg_id: Option<String>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub source_ref: SourceRef,
    /// Non-canonical source columns, preserved losslessly.
    #[serde(default)]
    pub source_meta: BTreeMap<String, serde_json::Value>,
}

/// Reaction (tapback) folded into its target message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    /// Originating handle. The wire key is `from` by contract.
    pub from: String,
    pub kind: ReactionKind,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Love,
    Like,
    Dislike,
    Laugh,
    Emphasize,
    Question,
}

impl ReactionKind {
    /// Apple associated_message_type codes for tapbacks.
    pub fn from_apple_code(code: i64) -> Option<Self> {
        match code {
            2000 => Some(ReactionKind::Love),
            2001 => Some(ReactionKind::Like),
            2002 => Some(ReactionKind::Dislike),
            2003 => Some(ReactionKind::Laugh),
            2004 => Some(ReactionKind::Emphasize),
            2005 => Some(ReactionKind::Question),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_name: Option<String>,
    /// Absolute path after an optional copy into the working area.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abs_path: Option<PathBuf>,
}

/// Pointer back to the originating database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
}
