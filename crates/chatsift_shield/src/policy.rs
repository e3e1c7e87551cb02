//! The Policy Shield itself: redaction over chunks, coverage accounting,
//! cloud preflight and DP-backed summaries.

use crate::dp::{
    seed_from_salt, DifferentialPrivacyEngine, DpResult, DpValue, PrivacyBudget, QueryType,
    StatisticalQuery,
};
use crate::hardfail::HardFailDetector;
use crate::patterns::{PiiDetector, PiiMatch};
use crate::tokenizer::{load_or_create_salt, ConsistentTokenizer, TokenizerStats};
use anyhow::{Context, Result};
use chatsift_core::{Chunk, PipelineError, PolicyConfig, RedactionProvenance};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Per-chunk redaction metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkRedaction {
    pub coverage: f64,
    pub tokens_redacted: usize,
    pub pii_kinds: Vec<String>,
    pub hard_fail_classes: Vec<String>,
    /// Probable-level content: the chunk stays in local processing but must
    /// not traverse the cloud boundary.
    pub cloud_blocked: bool,
    pub threshold_met: bool,
}

/// Conversation-level redaction report.
#[derive(Debug, Clone, Serialize)]
pub struct RedactionReport {
    pub coverage: f64,
    pub strict: bool,
    pub hardfail_triggered: bool,
    pub messages_total: usize,
    pub tokens_redacted: usize,
    pub placeholders: BTreeMap<String, usize>,
    pub coarse_label_counts: BTreeMap<String, usize>,
    pub visibility_leaks: Vec<String>,
    /// Chunks redacted and retained locally but barred from the cloud
    /// boundary by probable-level content.
    pub cloud_blocked_chunks: Vec<String>,
    pub notes: Vec<String>,
}

impl RedactionReport {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)
            .with_context(|| format!("Failed to write report {}", path.as_ref().display()))?;
        tracing::info!(path = %path.as_ref().display(), "Saved redaction report");
        Ok(())
    }
}

/// Differentially-private aggregate view safe to leave the trust domain.
#[derive(Debug, Clone, Serialize)]
pub struct PrivacySafeSummary {
    pub total_chunks: f64,
    pub avg_chunk_length: f64,
    pub privacy_method: String,
    pub epsilon: f64,
    pub delta: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_distribution: Option<BTreeMap<String, f64>>,
    pub generated_at: chrono::DateTime<Utc>,
}

pub struct PolicyShield {
    policy: PolicyConfig,
    detector: PiiDetector,
    hard_fail: HardFailDetector,
    tokenizer: ConsistentTokenizer,
    dp: Option<DifferentialPrivacyEngine>,
}

impl PolicyShield {
    /// Build a shield. When `salt_file` is given the salt persists across
    /// runs; otherwise an ephemeral salt is generated.
    pub fn new(policy: PolicyConfig, salt_file: Option<&Path>) -> Result<Self> {
        let salt = match salt_file {
            Some(path) => load_or_create_salt(path)?,
            None => {
                use rand::Rng;
                hex::encode(rand::rng().random::<[u8; 32]>())
            }
        };

        let dp = if policy.enable_differential_privacy {
            Some(DifferentialPrivacyEngine::new(Some(seed_from_salt(&salt))))
        } else {
            None
        };

        tracing::info!(
            threshold = policy.effective_threshold(),
            dp_enabled = policy.enable_differential_privacy,
            "Initialized Policy Shield"
        );

        Ok(Self {
            policy,
            detector: PiiDetector::new(),
            hard_fail: HardFailDetector::new(),
            tokenizer: ConsistentTokenizer::new(salt),
            dp,
        })
    }

    /// Attach a persisted DP budget ledger.
    pub fn with_ledger_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        if let Some(dp) = self.dp.take() {
            self.dp = Some(dp.with_ledger_file(path)?);
        }
        Ok(self)
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn tokenizer_stats(&self) -> TokenizerStats {
        self.tokenizer.stats()
    }

    /// Invert this run's opaque tokens back to their surfaces. Local-only
    /// tooling; the inverse exists solely in the in-memory cache.
    pub fn restore_text(&self, redacted: &str) -> String {
        self.tokenizer.restore(redacted)
    }

    pub fn dp_budget_summary(&self) -> BTreeMap<String, f64> {
        self.dp
            .as_ref()
            .map(|dp| dp.budget_summary())
            .unwrap_or_default()
    }

    pub fn dp_engine(&self) -> Option<&DifferentialPrivacyEngine> {
        self.dp.as_ref()
    }

    // ------------------------------------------------------------------
    // Redaction
    // ------------------------------------------------------------------

    fn replacement_for(&self, m: &PiiMatch) -> String {
        if self.policy.pseudonymize && self.policy.opaque_tokens {
            self.tokenizer.tokenize(&m.surface, m.kind.as_str())
        } else {
            format!("[{}]", m.kind.as_str())
        }
    }

    /// Coverage = 1 − pii_tokens / total_tokens over whitespace tokens of
    /// the original text. Empty text counts as fully covered.
    fn coverage(original: &str, matches: &[PiiMatch]) -> f64 {
        if original.trim().is_empty() {
            return 1.0;
        }
        let total = original.split_whitespace().count();
        if total == 0 {
            return 1.0;
        }
        let pii: usize = matches
            .iter()
            .map(|m| m.surface.split_whitespace().count())
            .sum();
        ((total.saturating_sub(pii)) as f64 / total as f64).max(0.0)
    }

    /// Redact one text. Fails with `HardFailContent` only for
    /// confirmed-level content under the active policy; probable content is
    /// redacted normally but marked `cloud_blocked`, suspicious content is
    /// logged.
    pub fn redact_chunk_text(&self, text: &str) -> Result<(String, ChunkRedaction), PipelineError> {
        let detection = self.hard_fail.analyze(text, &[]);
        if self.policy.block_hard_fail && detection.should_block_all {
            return Err(PipelineError::HardFailContent {
                classes: detection.detected_classes,
                level: detection.threat_level.as_str().to_string(),
            });
        }

        let matches = self.detector.detect(text, self.policy.detect_names);

        // Replace back-to-front so earlier spans stay valid.
        let mut redacted = text.to_string();
        let mut tokens_redacted = 0;
        for m in matches.iter().rev() {
            let replacement = self.replacement_for(m);
            redacted.replace_range(m.start..m.end, &replacement);
            tokens_redacted += m.surface.split_whitespace().count();
        }

        let coverage = Self::coverage(text, &matches);
        let threshold = self.policy.effective_threshold();
        if coverage < threshold {
            tracing::warn!(coverage, threshold, "Coverage below threshold");
        }

        Ok((
            redacted,
            ChunkRedaction {
                coverage,
                tokens_redacted,
                pii_kinds: matches.iter().map(|m| m.kind.as_str().to_string()).collect(),
                hard_fail_classes: detection.detected_classes,
                cloud_blocked: self.policy.block_hard_fail && detection.should_block_cloud,
                threshold_met: coverage >= threshold,
            },
        ))
    }

    /// Redact an ordered sequence of chunks. Confirmed-level hard-fail
    /// chunks are quarantined (not emitted); probable-level chunks are
    /// emitted but recorded as cloud-blocked; detection problems become
    /// visibility leaks surfaced in the report.
    pub fn redact_chunks(&self, chunks: &[Chunk]) -> (Vec<Chunk>, RedactionReport) {
        tracing::info!(count = chunks.len(), "Starting redaction");

        let mut redacted_chunks = Vec::with_capacity(chunks.len());
        let mut coverage_scores = Vec::new();
        let mut placeholders: BTreeMap<String, usize> = BTreeMap::new();
        let mut coarse_label_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut visibility_leaks = Vec::new();
        let mut cloud_blocked_chunks = Vec::new();
        let mut notes = Vec::new();
        let mut total_tokens_redacted = 0;
        let mut hardfail_triggered = false;
        let mut messages_total = 0;

        for chunk in chunks {
            messages_total += chunk.meta.message_ids.len();
            for label in &chunk.meta.labels_coarse {
                *coarse_label_counts.entry(label.clone()).or_default() += 1;
            }

            if chunk.text.is_empty() {
                redacted_chunks.push(chunk.clone());
                continue;
            }

            match self.redact_chunk_text(&chunk.text) {
                Ok((redacted_text, meta)) => {
                    // Unredacted PII surviving redaction is an internal
                    // invariant violation.
                    let residual = self.detector.detect(&redacted_text, self.policy.detect_names);
                    if !residual.is_empty() {
                        visibility_leaks.push(chunk.chunk_id.clone());
                        notes.push(format!(
                            "Chunk {}: residual PII after redaction",
                            chunk.chunk_id
                        ));
                        continue;
                    }

                    coverage_scores.push(meta.coverage);
                    total_tokens_redacted += meta.tokens_redacted;
                    for kind in &meta.pii_kinds {
                        *placeholders.entry(kind.clone()).or_default() += 1;
                    }
                    if meta.cloud_blocked {
                        cloud_blocked_chunks.push(chunk.chunk_id.clone());
                        notes.push(format!(
                            "Chunk {}: probable classes block cloud: {:?}",
                            chunk.chunk_id, meta.hard_fail_classes
                        ));
                    } else if !meta.hard_fail_classes.is_empty() {
                        notes.push(format!(
                            "Chunk {}: suspicious classes logged: {:?}",
                            chunk.chunk_id, meta.hard_fail_classes
                        ));
                    }

                    let mut out = chunk.clone();
                    out.text = redacted_text;
                    out.provenance.redaction = Some(RedactionProvenance {
                        coverage: meta.coverage,
                        tokens_redacted: meta.tokens_redacted,
                        pii_kinds: meta.pii_kinds,
                        threshold_met: meta.threshold_met,
                    });
                    redacted_chunks.push(out);
                }
                Err(PipelineError::HardFailContent { classes, level }) => {
                    hardfail_triggered = true;
                    notes.push(format!(
                        "Chunk {}: hard-fail classes detected ({level}): {classes:?}",
                        chunk.chunk_id
                    ));
                    tracing::warn!(
                        chunk_id = %chunk.chunk_id,
                        ?classes,
                        level,
                        "Quarantined hard-fail chunk"
                    );
                }
                Err(e) => {
                    visibility_leaks.push(chunk.chunk_id.clone());
                    notes.push(format!("Chunk {}: redaction error: {e}", chunk.chunk_id));
                }
            }
        }

        let coverage = if coverage_scores.is_empty() {
            1.0
        } else {
            coverage_scores.iter().sum::<f64>() / coverage_scores.len() as f64
        };

        let report = RedactionReport {
            coverage,
            strict: self.policy.strict_mode,
            hardfail_triggered,
            messages_total,
            tokens_redacted: total_tokens_redacted,
            placeholders,
            coarse_label_counts,
            cloud_blocked_chunks,
            visibility_leaks,
            notes,
        };

        tracing::info!(
            coverage = report.coverage,
            tokens_redacted = report.tokens_redacted,
            "Redaction complete"
        );
        (redacted_chunks, report)
    }

    // ------------------------------------------------------------------
    // Cloud preflight
    // ------------------------------------------------------------------

    /// Reasons the redacted batch cannot traverse the cloud boundary.
    pub fn preflight_cloud_check(
        &self,
        redacted_chunks: &[Chunk],
        report: &RedactionReport,
    ) -> (bool, Vec<String>) {
        let mut blocking = Vec::new();

        let threshold = self.policy.effective_threshold();
        if report.coverage < threshold {
            blocking.push(format!(
                "Coverage {:.3} below required {threshold}",
                report.coverage
            ));
        }
        if report.hardfail_triggered {
            blocking.push("Hard-fail classes detected".to_string());
        }
        if !report.cloud_blocked_chunks.is_empty() {
            blocking.push(format!(
                "Probable hard-fail content blocks cloud-bound chunks: {:?}",
                report.cloud_blocked_chunks
            ));
        }
        if !report.visibility_leaks.is_empty() {
            blocking.push(format!(
                "Visibility leaks detected: {:?}",
                report.visibility_leaks
            ));
        }
        if redacted_chunks
            .iter()
            .any(|c| !c.meta.labels_fine_local.is_empty())
        {
            blocking.push("Fine-grained labels present in redacted data".to_string());
        }

        (blocking.is_empty(), blocking)
    }

    // ------------------------------------------------------------------
    // DP aggregation
    // ------------------------------------------------------------------

    /// Execute a batch of queries under an evenly split budget.
    pub fn aggregate_statistics_with_dp(
        &self,
        records: &[Value],
        queries: &[StatisticalQuery],
    ) -> Result<BTreeMap<String, DpResult>> {
        let dp = self
            .dp
            .as_ref()
            .context("Differential privacy is not enabled in policy")?;
        if records.is_empty() {
            tracing::warn!("No records provided for statistical aggregation");
            return Ok(BTreeMap::new());
        }
        if queries.is_empty() {
            return Ok(BTreeMap::new());
        }

        let budget = PrivacyBudget::new(
            self.policy.dp_epsilon / queries.len() as f64,
            self.policy.dp_delta / queries.len() as f64,
            1.0,
        )?;

        let mut results = BTreeMap::new();
        for (i, query) in queries.iter().enumerate() {
            let name = format!("{}_{}_{i}", query.query_type.as_str(), query.field_name);
            let outcome = match query.query_type {
                QueryType::Count => dp.count_query(records, query, &budget),
                QueryType::Sum => dp.sum_query(records, query, &budget),
                QueryType::Histogram => dp.histogram_query(records, query, &budget),
                QueryType::Mean => dp.mean_query(records, query, &budget, (-1000.0, 1000.0)),
            };
            match outcome {
                Ok(result) => {
                    results.insert(name, result);
                }
                Err(e) => {
                    tracing::error!("DP query {name} failed: {e}");
                }
            }
        }

        tracing::info!(count = results.len(), "Completed DP query batch");
        Ok(results)
    }

    /// DP counts plus an optional label distribution over redacted chunks.
    pub fn generate_privacy_safe_summary(
        &self,
        redacted_chunks: &[Chunk],
        include_label_distribution: bool,
    ) -> Result<PrivacySafeSummary> {
        // Flatten chunks into records: lengths instead of content.
        let mut all_labels: Vec<String> = redacted_chunks
            .iter()
            .flat_map(|c| c.meta.labels_coarse.iter().cloned())
            .collect();
        all_labels.sort();
        all_labels.dedup();

        let records: Vec<Value> = redacted_chunks
            .iter()
            .map(|chunk| {
                let mut record = serde_json::Map::new();
                record.insert("chunk_id".to_string(), Value::from(1));
                record.insert("text".to_string(), Value::from(chunk.text.len()));
                record.insert(
                    "platform".to_string(),
                    Value::from(chunk.meta.platform.clone()),
                );
                for label in &all_labels {
                    let present = chunk.meta.labels_coarse.contains(label);
                    record.insert(
                        format!("has_label_{label}"),
                        Value::from(if present { 1 } else { 0 }),
                    );
                }
                Value::Object(record)
            })
            .collect();

        let mut queries = vec![
            StatisticalQuery::new(QueryType::Count, "chunk_id"),
            StatisticalQuery::new(QueryType::Sum, "text"),
        ];
        if include_label_distribution {
            for label in &all_labels {
                let mut filter = BTreeMap::new();
                filter.insert(format!("has_label_{label}"), Value::from(1));
                queries.push(
                    StatisticalQuery::new(QueryType::Count, format!("has_label_{label}"))
                        .with_filter(filter),
                );
            }
        }

        let results = self.aggregate_statistics_with_dp(&records, &queries)?;

        let mut total_chunks = 0.0;
        let mut total_text_length = 0.0;
        let mut label_distribution = BTreeMap::new();
        for (name, result) in &results {
            if let DpValue::Scalar(v) = result.value {
                if name.starts_with("count_chunk_id") {
                    total_chunks = v;
                } else if name.starts_with("sum_text") {
                    total_text_length = v;
                } else if let Some(rest) = name.strip_prefix("count_has_label_") {
                    let label = rest.rsplit_once('_').map(|(l, _)| l).unwrap_or(rest);
                    label_distribution.insert(label.to_string(), v);
                }
            }
        }

        Ok(PrivacySafeSummary {
            total_chunks,
            avg_chunk_length: if records.is_empty() {
                0.0
            } else {
                total_text_length / records.len() as f64
            },
            privacy_method: "differential_privacy".to_string(),
            epsilon: self.policy.dp_epsilon,
            delta: self.policy.dp_delta,
            label_distribution: if include_label_distribution && !label_distribution.is_empty() {
                Some(label_distribution)
            } else {
                None
            },
            generated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsift_core::{ChunkMeta, ChunkMethod, Provenance, WindowInfo};
    use chrono::TimeZone;

    fn shield(pseudonymize: bool) -> PolicyShield {
        let mut policy = PolicyConfig::default();
        policy.pseudonymize = pseudonymize;
        policy.opaque_tokens = pseudonymize;
        policy.threshold = 0.99;
        PolicyShield::new(policy, None).unwrap()
    }

    fn chunk_with_text(id: &str, text: &str) -> Chunk {
        let ts = Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap();
        Chunk {
            chunk_id: id.to_string(),
            conv_id: "conv-1".to_string(),
            text: text.to_string(),
            meta: ChunkMeta {
                contact: "alex".to_string(),
                platform: "imessage".to_string(),
                date_start: ts,
                date_end: ts,
                message_ids: vec!["1".to_string(), "2".to_string()],
                labels_coarse: vec![],
                labels_fine_local: vec![],
                char_count: text.len(),
                token_estimate: 0.0,
                window: WindowInfo {
                    method: ChunkMethod::Turns,
                    index: 0,
                    overlap: 0,
                },
            },
            provenance: Provenance::new("run-1", "hash"),
        }
    }

    #[test]
    fn pii_round_trip_scenario() {
        let shield = shield(true);
        let chunk = chunk_with_text(
            "ch_1",
            "Email me at alice@example.com or call +1-415-555-0101.",
        );
        let (redacted, report) = shield.redact_chunks(&[chunk]);

        assert_eq!(redacted.len(), 1);
        let text = &redacted[0].text;
        assert_eq!(text.matches("\u{27e6}TKN:").count(), 2);
        assert!(!text.contains("alice@example.com"));
        assert!(!text.contains("415-555-0101"));

        // 2 of 7 whitespace tokens were PII.
        assert!((report.coverage - 5.0 / 7.0).abs() < 1e-9);
        assert_eq!(report.placeholders.get("EMAIL"), Some(&1));
        assert_eq!(report.placeholders.get("PHONE"), Some(&1));
        assert!(report.tokens_redacted >= 2);
        assert!(!report.hardfail_triggered);

        let prov = redacted[0].provenance.redaction.as_ref().unwrap();
        assert!(!prov.threshold_met);
    }

    #[test]
    fn redact_then_restore_round_trips() {
        let shield = shield(true);
        let original = "Email me at alice@example.com or call +1-415-555-0101.";
        let (redacted, _) = shield.redact_chunk_text(original).unwrap();
        assert_ne!(redacted, original);
        assert_eq!(shield.restore_text(&redacted), original);
    }

    #[test]
    fn redaction_is_idempotent() {
        let shield = shield(true);
        let text = "write to bob@example.net today";
        let (once, _) = shield.redact_chunk_text(text).unwrap();
        let (twice, meta) = shield.redact_chunk_text(&once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(meta.tokens_redacted, 0);
    }

    fn extract_token(text: &str) -> &str {
        let start = text.find('\u{27e6}').unwrap();
        let end = text.find('\u{27e7}').unwrap() + '\u{27e7}'.len_utf8();
        &text[start..end]
    }

    #[test]
    fn tokens_are_consistent_across_chunks() {
        let shield = shield(true);
        let (a, _) = shield.redact_chunk_text("ping alice@example.com now").unwrap();
        let (b, _) = shield
            .redact_chunk_text("later, alice@example.com again")
            .unwrap();
        assert_eq!(extract_token(&a), extract_token(&b));
    }

    #[test]
    fn bracketed_categories_when_pseudonymization_off() {
        let shield = shield(false);
        let (text, _) = shield.redact_chunk_text("mail carol@example.org").unwrap();
        assert!(text.contains("[EMAIL]"));
        assert!(!text.contains("TKN"));
    }

    #[test]
    fn hard_fail_chunk_is_quarantined_and_blocks_preflight() {
        let shield = shield(true);
        let chunks = vec![
            chunk_with_text("ch_ok", "see you at dinner"),
            chunk_with_text("ch_bad", "he shared child explicit material with them"),
        ];
        let (redacted, report) = shield.redact_chunks(&chunks);

        assert_eq!(redacted.len(), 1);
        assert_eq!(redacted[0].chunk_id, "ch_ok");
        assert!(report.hardfail_triggered);

        let (passed, issues) = shield.preflight_cloud_check(&redacted, &report);
        assert!(!passed);
        assert!(issues.iter().any(|i| i.contains("Hard-fail")));
    }

    #[test]
    fn probable_chunk_is_emitted_but_blocked_from_cloud() {
        let shield = shield(true);
        let text = "I'm planning to kill him tomorrow";

        // Probable content still redacts instead of erroring.
        let (_, meta) = shield.redact_chunk_text(text).unwrap();
        assert!(meta.cloud_blocked);
        assert_eq!(meta.hard_fail_classes, vec!["violence"]);

        let chunks = vec![chunk_with_text("ch_probable", text)];
        let (redacted, report) = shield.redact_chunks(&chunks);

        // Retained locally, no quarantine, no hard-fail flag.
        assert_eq!(redacted.len(), 1);
        assert_eq!(redacted[0].chunk_id, "ch_probable");
        assert!(!report.hardfail_triggered);
        assert_eq!(report.cloud_blocked_chunks, vec!["ch_probable"]);

        // But the cloud boundary stays closed.
        let (passed, issues) = shield.preflight_cloud_check(&redacted, &report);
        assert!(!passed);
        assert!(issues.iter().any(|i| i.contains("Probable")));
    }

    #[test]
    fn suspicious_chunk_passes_preflight() {
        let shield = shield(true);
        let chunks = vec![chunk_with_text("ch_susp", "they wash cash through the shop")];
        let (redacted, report) = shield.redact_chunks(&chunks);

        assert_eq!(redacted.len(), 1);
        assert!(!report.hardfail_triggered);
        assert!(report.cloud_blocked_chunks.is_empty());
        assert!(report.notes.iter().any(|n| n.contains("suspicious")));

        let (passed, _) = shield.preflight_cloud_check(&redacted, &report);
        assert!(passed);
    }

    #[test]
    fn fine_labels_block_preflight() {
        let shield = shield(true);
        let mut chunk = chunk_with_text("ch_1", "plain text");
        chunk.meta.labels_fine_local.push("substances".to_string());
        let (redacted, report) = shield.redact_chunks(&[chunk]);
        let (passed, issues) = shield.preflight_cloud_check(&redacted, &report);
        assert!(!passed);
        assert!(issues.iter().any(|i| i.contains("Fine-grained")));
    }

    #[test]
    fn empty_batch_reports_full_coverage() {
        let shield = shield(true);
        let (redacted, report) = shield.redact_chunks(&[]);
        assert!(redacted.is_empty());
        assert_eq!(report.coverage, 1.0);
        assert_eq!(report.messages_total, 0);
        let (passed, _) = shield.preflight_cloud_check(&redacted, &report);
        assert!(passed);
    }

    #[test]
    fn provenance_records_redaction() {
        let shield = shield(true);
        let chunk = chunk_with_text("ch_1", "reach dave@example.com please");
        let (redacted, _) = shield.redact_chunks(&[chunk]);
        let prov = redacted[0].provenance.redaction.as_ref().unwrap();
        assert!(prov.coverage < 1.0);
        assert_eq!(prov.pii_kinds, vec!["EMAIL"]);
        assert_eq!(prov.tokens_redacted, 1);
    }

    #[test]
    fn privacy_safe_summary_uses_dp() {
        // Fixed salt so the noise seed is reproducible.
        let dir = tempfile::tempdir().unwrap();
        let salt_path = dir.path().join("salt");
        std::fs::write(&salt_path, "a".repeat(64)).unwrap();
        let mut policy = PolicyConfig::default();
        policy.threshold = 0.99;
        let shield = PolicyShield::new(policy, Some(&salt_path)).unwrap();

        let mut chunks = Vec::new();
        for i in 0..20 {
            let mut c = chunk_with_text(&format!("ch_{i}"), "some ordinary words here");
            c.meta.labels_coarse.push("stress".to_string());
            chunks.push(c);
        }
        let summary = shield.generate_privacy_safe_summary(&chunks, true).unwrap();
        assert_eq!(summary.privacy_method, "differential_privacy");
        // Noisy but near 20.
        assert!(summary.total_chunks > 5.0 && summary.total_chunks < 40.0);
        let dist = summary.label_distribution.unwrap();
        assert!(dist.contains_key("stress"));
    }

    #[test]
    fn dp_disabled_aggregation_errors() {
        let mut policy = PolicyConfig::default();
        policy.enable_differential_privacy = false;
        let shield = PolicyShield::new(policy, None).unwrap();
        assert!(shield
            .aggregate_statistics_with_dp(
                &[serde_json::json!({"x": 1})],
                &[StatisticalQuery::new(QueryType::Count, "x")]
            )
            .is_err());
    }

    #[test]
    fn batch_budget_splits_across_queries() {
        let shield = shield(true);
        let records: Vec<Value> = (0..10).map(|i| serde_json::json!({"v": i})).collect();
        let queries = vec![
            StatisticalQuery::new(QueryType::Count, "v"),
            StatisticalQuery::new(QueryType::Sum, "v"),
        ];
        let results = shield.aggregate_statistics_with_dp(&records, &queries).unwrap();
        assert_eq!(results.len(), 2);
        for result in results.values() {
            // epsilon 1.0 split over two queries.
            assert!((result.epsilon_spent - 0.5).abs() < 1e-9);
        }
    }
}
