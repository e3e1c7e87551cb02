//! iMessage extractor for macOS/iOS chat.db SQLite databases.
//!
//! The source database is copied (with WAL/SHM side files) into a scratch
//! directory and opened read-only, so a live Messages.app never sees our
//! reads.

use crate::{ExtractionReport, Extractor};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chatsift_core::{
    Attachment, AttachmentKind, CanonicalMessage, PipelineError, Reaction, ReactionKind, SourceRef,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Apple epoch starts at 2001-01-01T00:00:00Z.
fn apple_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap()
}

/// Raw values above this magnitude are nanoseconds since the Apple epoch;
/// at or below it they are seconds. The boundary itself belongs to the
/// seconds regime.
const NANOSECOND_THRESHOLD: i64 = 100_000_000_000;

/// Convert a raw Apple-epoch timestamp to UTC.
pub fn convert_apple_timestamp(raw: i64) -> Option<DateTime<Utc>> {
    if raw == 0 {
        return None;
    }
    let delta = if raw.abs() > NANOSECOND_THRESHOLD {
        Duration::nanoseconds(raw)
    } else {
        Duration::seconds(raw)
    };
    apple_epoch().checked_add_signed(delta)
}

#[derive(Debug, Clone)]
struct RawMessage {
    rowid: i64,
    guid: Option<String>,
    body: Option<String>,
    is_me: bool,
    service: Option<String>,
    date_raw: i64,
    assoc_guid: Option<String>,
    assoc_type: Option<i64>,
    has_attachments: bool,
    balloon_bundle_id: Option<String>,
    chat_guid: Option<String>,
    handle: Option<String>,
}

pub struct IMessageExtractor {
    source_path: PathBuf,
    report: ExtractionReport,
    cancel: Arc<AtomicBool>,
    /// Holds the scratch copy alive for the extractor's lifetime.
    _scratch: Option<tempfile::TempDir>,
}

impl IMessageExtractor {
    pub fn new<P: AsRef<Path>>(source_path: P) -> Self {
        Self {
            source_path: source_path.as_ref().to_path_buf(),
            report: ExtractionReport::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            _scratch: None,
        }
    }

    /// Cancellation flag observed between rows.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Copy the database and its WAL/SHM side files to a scratch directory
    /// so we never hold locks on the live database.
    fn copy_database(&mut self) -> Result<PathBuf> {
        let scratch = tempfile::Builder::new()
            .prefix("chatsift_imessage_")
            .tempdir()
            .context("Failed to create scratch directory")?;
        let temp_db = scratch.path().join("chat.db");

        std::fs::copy(&self.source_path, &temp_db).map_err(|e| {
            anyhow::Error::from(PipelineError::SourceUnreadable(format!(
                "{}: {e}",
                self.source_path.display()
            )))
        })?;

        for suffix in ["-wal", "-shm"] {
            let side = PathBuf::from(format!("{}{}", self.source_path.display(), suffix));
            if side.exists() {
                let target = scratch.path().join(format!("chat.db{suffix}"));
                std::fs::copy(&side, &target)
                    .with_context(|| format!("Failed to copy side file {}", side.display()))?;
            }
        }

        self._scratch = Some(scratch);
        Ok(temp_db)
    }

    async fn open_read_only(path: &Path) -> Result<Pool<Sqlite>> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true);
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open iMessage database")
    }

    async fn fetch_raw_messages(pool: &Pool<Sqlite>) -> Result<Vec<RawMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT
              m.ROWID as msg_rowid,
              m.guid as msg_guid,
              m.text as body,
              m.is_from_me as is_me,
              m.service as service,
              m.date as date_raw,
              m.associated_message_guid as assoc_guid,
              m.associated_message_type as assoc_type,
              m.cache_has_attachments as has_attachments,
              m.balloon_bundle_id as balloon_bundle_id,
              c.guid as chat_guid,
              h.id as handle_resolved
            FROM message m
            LEFT JOIN chat_message_join cmj ON cmj.message_id = m.ROWID
            LEFT JOIN chat c ON c.ROWID = cmj.chat_id
            LEFT JOIN handle h ON h.ROWID = m.handle_id
            ORDER BY m.date ASC
            "#,
        )
        .fetch_all(pool)
        .await
        .context("Failed to query messages")?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            messages.push(RawMessage {
                rowid: row.get("msg_rowid"),
                guid: row.get("msg_guid"),
                body: row.get("body"),
                is_me: row.get::<i64, _>("is_me") != 0,
                service: row.get("service"),
                date_raw: row.get::<Option<i64>, _>("date_raw").unwrap_or(0),
                assoc_guid: row.get("assoc_guid"),
                assoc_type: row.get("assoc_type"),
                has_attachments: row
                    .get::<Option<i64>, _>("has_attachments")
                    .unwrap_or(0)
                    != 0,
                balloon_bundle_id: row.get("balloon_bundle_id"),
                chat_guid: row.get("chat_guid"),
                handle: row.get("handle_resolved"),
            });
        }
        Ok(messages)
    }

    async fn fetch_attachments(pool: &Pool<Sqlite>, msg_rowid: i64) -> Result<Vec<Attachment>> {
        let rows = sqlx::query(
            r#"
            SELECT a.filename, a.uti, a.mime_type, a.transfer_name
            FROM message_attachment_join maj
            JOIN attachment a ON maj.attachment_id = a.ROWID
            WHERE maj.message_id = ?
            "#,
        )
        .bind(msg_rowid)
        .fetch_all(pool)
        .await
        .context("Failed to query attachments")?;

        let mut attachments = Vec::with_capacity(rows.len());
        for row in rows {
            let filename: Option<String> = row.get("filename");
            let uti: Option<String> = row.get("uti");
            let mime_type: Option<String> = row.get("mime_type");
            let transfer_name: Option<String> = row.get("transfer_name");

            let kind = sniff_attachment_kind(uti.as_deref(), filename.as_deref());
            attachments.push(Attachment {
                kind,
                filename: filename
                    .or_else(|| transfer_name.clone())
                    .unwrap_or_else(|| "unknown".to_string()),
                mime_type,
                uti,
                transfer_name,
                abs_path: None,
            });
        }
        Ok(attachments)
    }

    /// Split raw rows into regular messages and reactions grouped by their
    /// target GUID.
    fn group_reactions(
        &mut self,
        raw: Vec<RawMessage>,
    ) -> (Vec<RawMessage>, HashMap<String, Vec<Reaction>>) {
        let mut reactions_by_target: HashMap<String, Vec<Reaction>> = HashMap::new();
        let mut regular = Vec::with_capacity(raw.len());

        for msg in raw {
            let kind = msg.assoc_type.and_then(ReactionKind::from_apple_code);
            match (kind, msg.assoc_guid.clone()) {
                (Some(kind), Some(target_guid)) => {
                    let sender = if msg.is_me {
                        "Me".to_string()
                    } else {
                        msg.handle.clone().unwrap_or_else(|| "Unknown".to_string())
                    };
                    let ts = convert_apple_timestamp(msg.date_raw).unwrap_or_else(Utc::now);
                    reactions_by_target
                        .entry(target_guid)
                        .or_default()
                        .push(Reaction {
                            from: sender,
                            kind,
                            ts,
                        });
                    self.report.reactions_folded += 1;
                }
                _ => regular.push(msg),
            }
        }

        (regular, reactions_by_target)
    }
}

/// UTI first, then filename extension, else a generic file.
fn sniff_attachment_kind(uti: Option<&str>, filename: Option<&str>) -> AttachmentKind {
    if let Some(uti) = uti {
        let uti = uti.to_lowercase();
        if uti.contains("image") {
            return AttachmentKind::Image;
        }
        if uti.contains("video") || uti.contains("movie") {
            return AttachmentKind::Video;
        }
        if uti.contains("audio") {
            return AttachmentKind::Audio;
        }
        return AttachmentKind::File;
    }

    if let Some(name) = filename {
        if let Some(ext) = name.rsplit('.').next() {
            let ext = ext.to_lowercase();
            const IMAGE: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp", "heic"];
            const VIDEO: &[&str] = &["mp4", "mov", "avi", "mkv", "wmv", "m4v"];
            const AUDIO: &[&str] = &["mp3", "wav", "aac", "m4a", "flac", "ogg", "caf"];
            if IMAGE.contains(&ext.as_str()) {
                return AttachmentKind::Image;
            }
            if VIDEO.contains(&ext.as_str()) {
                return AttachmentKind::Video;
            }
            if AUDIO.contains(&ext.as_str()) {
                return AttachmentKind::Audio;
            }
        }
    }

    AttachmentKind::File
}

#[async_trait]
impl Extractor for IMessageExtractor {
    fn platform(&self) -> &'static str {
        "imessage"
    }

    async fn validate_source(&self) -> Result<bool> {
        if !self.source_path.exists() {
            return Ok(false);
        }
        let pool = match Self::open_read_only(&self.source_path).await {
            Ok(pool) => pool,
            Err(e) => {
                tracing::warn!("Failed to open candidate database: {e}");
                return Ok(false);
            }
        };

        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('message','chat','handle')",
        )
        .fetch_all(&pool)
        .await?;
        pool.close().await;
        Ok(rows.len() == 3)
    }

    async fn extract(&mut self) -> Result<Vec<CanonicalMessage>> {
        if !self.validate_source().await? {
            return Err(PipelineError::SourceUnreadable(format!(
                "not an iMessage database: {}",
                self.source_path.display()
            ))
            .into());
        }

        let temp_db = self.copy_database()?;
        let pool = Self::open_read_only(&temp_db).await?;

        let raw = Self::fetch_raw_messages(&pool).await?;
        tracing::info!(count = raw.len(), "Fetched raw messages");

        let (regular, reactions_by_target) = self.group_reactions(raw);
        tracing::info!(folded = self.report.reactions_folded, "Grouped reactions");

        // GUID → ROWID map for reply resolution within the extracted set.
        let guid_to_rowid: HashMap<String, String> = regular
            .iter()
            .filter_map(|m| m.guid.clone().map(|g| (g, m.rowid.to_string())))
            .collect();

        let mut messages = Vec::with_capacity(regular.len());
        for msg in regular {
            if self.cancel.load(Ordering::Relaxed) {
                tracing::warn!("Extraction cancelled, returning partial set");
                break;
            }

            let timestamp = convert_apple_timestamp(msg.date_raw).unwrap_or_else(Utc::now);

            let (sender, sender_id) = if msg.is_me {
                ("Me".to_string(), "me".to_string())
            } else {
                let handle = msg.handle.clone().unwrap_or_else(|| "Unknown".to_string());
                let id = handle.to_lowercase();
                (handle, id)
            };

            // Non-reaction associations are replies; unresolved targets are
            // nulled and counted.
            let reply_to_msg_id = match &msg.assoc_guid {
                Some(guid) => match guid_to_rowid.get(guid) {
                    Some(rowid) => Some(rowid.clone()),
                    None => {
                        self.report.unresolved_replies += 1;
                        None
                    }
                },
                None => None,
            };

            let reactions = msg
                .guid
                .as_ref()
                .and_then(|g| reactions_by_target.get(g).cloned())
                .unwrap_or_default();

            let attachments = match Self::fetch_attachments(&pool, msg.rowid).await {
                Ok(attachments) => attachments,
                Err(e) => {
                    let err = format!("attachments for message {}: {e}", msg.rowid);
                    tracing::error!("{err}");
                    self.report.errors.push(err);
                    Vec::new()
                }
            };

            let mut source_meta = BTreeMap::new();
            source_meta.insert("msg_rowid".to_string(), serde_json::json!(msg.rowid));
            if let Some(service) = &msg.service {
                source_meta.insert("service".to_string(), serde_json::json!(service));
            }
            if let Some(assoc_guid) = &msg.assoc_guid {
                source_meta.insert("assoc_guid".to_string(), serde_json::json!(assoc_guid));
            }
            if let Some(assoc_type) = msg.assoc_type {
                source_meta.insert("assoc_type".to_string(), serde_json::json!(assoc_type));
            }
            if msg.has_attachments {
                source_meta.insert("has_attachments".to_string(), serde_json::json!(true));
            }
            if let Some(bundle) = &msg.balloon_bundle_id {
                source_meta.insert("balloon_bundle_id".to_string(), serde_json::json!(bundle));
            }

            messages.push(CanonicalMessage {
                msg_id: msg.rowid.to_string(),
                conv_id: msg.chat_guid.clone().unwrap_or_else(|| "unknown".to_string()),
                platform: "imessage".to_string(),
                timestamp,
                sender,
                sender_id,
                is_me: msg.is_me,
                text: msg.body,
                reply_to_msg_id,
                reactions,
                attachments,
                source_ref: SourceRef {
                    path: self.source_path.display().to_string(),
                    guid: msg.chat_guid,
                },
                source_meta,
            });
        }

        pool.close().await;
        self.report.messages_extracted = messages.len();
        Ok(messages)
    }

    fn report(&self) -> &ExtractionReport {
        &self.report
    }
}
