//! SQLite-backed multi-vector store. Each contact gets four logically
//! parallel collections (one per space); vectors are bincode BLOBs ranked
//! in-process by cosine similarity.

use crate::embedding::{cosine_similarity, Embedder};
use crate::{MultiVectorConfig, VectorSpace};
use anyhow::{Context, Result};
use chatsift_core::{Chunk, LabelTaxonomy, PrivacyTier};
use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SpaceStats {
    pub indexed: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub total_indexed: usize,
    pub total_errors: usize,
    pub refused: usize,
    pub per_space: BTreeMap<String, SpaceStats>,
}

/// One fused search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub text: String,
    pub combined_score: f64,
    /// Raw similarity per space.
    pub scores: BTreeMap<VectorSpace, f64>,
    /// weight × similarity per space.
    pub contributions: BTreeMap<VectorSpace, f64>,
    pub message_ids: Vec<String>,
    pub labels_coarse: Vec<String>,
    pub privacy_tier: PrivacyTier,
    pub date_start: Option<String>,
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PsychologyInsights {
    pub total_chunks: usize,
    pub label_distribution: BTreeMap<String, usize>,
    /// YYYY-MM → label → count.
    pub monthly_patterns: BTreeMap<String, BTreeMap<String, usize>>,
    pub privacy_distribution: BTreeMap<String, usize>,
    pub top_labels: Vec<String>,
}

pub struct SqliteVectorStore {
    pool: Pool<Sqlite>,
    embedder: Arc<dyn Embedder>,
    taxonomy: Arc<LabelTaxonomy>,
    config: MultiVectorConfig,
}

impl SqliteVectorStore {
    pub async fn open<P: AsRef<Path>>(
        dir: P,
        embedder: Arc<dyn Embedder>,
        taxonomy: Arc<LabelTaxonomy>,
        config: MultiVectorConfig,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())
            .with_context(|| format!("Failed to create {}", dir.as_ref().display()))?;
        let db_path = dir.as_ref().join("vectors.db");

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .context("Failed to open vector store database")?;

        let store = Self {
            pool,
            embedder,
            taxonomy,
            config,
        };
        store.migrate().await?;
        tracing::info!(path = %db_path.display(), "Opened multi-vector store");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vectors (
                contact TEXT NOT NULL,
                space TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                privacy_tier TEXT NOT NULL,
                platform TEXT,
                date_start TEXT,
                date_end TEXT,
                labels_json TEXT NOT NULL,
                message_ids_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (contact, space, chunk_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create vectors table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_vectors_contact_space ON vectors(contact, space)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create vectors index")?;

        Ok(())
    }

    /// Tier of a single chunk: fine labels force local-only.
    fn chunk_tier(chunk: &Chunk) -> PrivacyTier {
        if chunk.meta.labels_fine_local.is_empty() {
            PrivacyTier::CloudSafe
        } else {
            PrivacyTier::LocalOnly
        }
    }

    /// A chunk whose coarse labels contain a fine-universe value violates
    /// the tier constraint and is refused outright.
    fn validate_tier(&self, chunk: &Chunk) -> bool {
        !chunk
            .meta
            .labels_coarse
            .iter()
            .any(|l| self.taxonomy.fine_labels().contains(l))
    }

    /// Index chunks in batches. The batch's tier is the most restrictive
    /// tier of its members; spaces that do not admit the batch tier are
    /// skipped. Writes are transactional per space per batch and roll
    /// forward on partial failure.
    pub async fn index_chunks(&self, chunks: &[Chunk], contact: &str) -> Result<IndexStats> {
        let mut stats = IndexStats::default();
        if chunks.is_empty() {
            return Ok(stats);
        }

        tracing::info!(count = chunks.len(), contact, "Multi-vector indexing");

        for batch in chunks.chunks(self.config.batch_size.max(1)) {
            let mut accepted: Vec<&Chunk> = Vec::with_capacity(batch.len());
            for chunk in batch {
                if chunk.text.trim().is_empty() {
                    continue;
                }
                if self.validate_tier(chunk) {
                    accepted.push(chunk);
                } else {
                    tracing::warn!(chunk_id = %chunk.chunk_id, "Refused tier-violating entry");
                    stats.refused += 1;
                }
            }
            if accepted.is_empty() {
                continue;
            }

            let batch_tier = accepted
                .iter()
                .map(|c| Self::chunk_tier(c))
                .fold(PrivacyTier::CloudSafe, PrivacyTier::most_restrictive);

            let texts: Vec<String> = accepted.iter().map(|c| c.text.clone()).collect();

            for space in self.embedder.spaces() {
                if batch_tier == PrivacyTier::CloudSafe && !space.admits_cloud_safe() {
                    // Space tier does not admit cloud-safe batches.
                    continue;
                }

                let embeddings = match self.embedder.embed(space, &texts) {
                    Ok(embeddings) => embeddings,
                    Err(e) => {
                        tracing::error!(space = space.as_str(), "Embedding failed: {e}");
                        let entry = stats.per_space.entry(space.as_str().to_string()).or_default();
                        entry.errors += accepted.len();
                        stats.total_errors += accepted.len();
                        continue;
                    }
                };

                match self
                    .write_space_batch(contact, space, batch_tier, &accepted, &embeddings)
                    .await
                {
                    Ok(written) => {
                        let entry = stats.per_space.entry(space.as_str().to_string()).or_default();
                        entry.indexed += written;
                        stats.total_indexed += written;
                    }
                    Err(e) => {
                        tracing::error!(space = space.as_str(), "Batch write failed: {e}");
                        let entry = stats.per_space.entry(space.as_str().to_string()).or_default();
                        entry.errors += accepted.len();
                        stats.total_errors += accepted.len();
                    }
                }
            }
        }

        tracing::info!(
            indexed = stats.total_indexed,
            errors = stats.total_errors,
            refused = stats.refused,
            "Multi-vector indexing complete"
        );
        Ok(stats)
    }

    async fn write_space_batch(
        &self,
        contact: &str,
        space: VectorSpace,
        tier: PrivacyTier,
        chunks: &[&Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let blob = bincode::serialize(embedding).context("Failed to serialize embedding")?;
            let labels_json = serde_json::to_string(&chunk.meta.labels_coarse)?;
            let message_ids_json = serde_json::to_string(&chunk.meta.message_ids)?;

            sqlx::query(
                r#"
                INSERT OR REPLACE INTO vectors
                  (contact, space, chunk_id, text, embedding, privacy_tier,
                   platform, date_start, date_end, labels_json, message_ids_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(contact)
            .bind(space.as_str())
            .bind(&chunk.chunk_id)
            .bind(&chunk.text)
            .bind(blob)
            .bind(tier.as_str())
            .bind(&chunk.meta.platform)
            .bind(chunk.meta.date_start.to_rfc3339())
            .bind(chunk.meta.date_end.to_rfc3339())
            .bind(labels_json)
            .bind(message_ids_json)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(chunks.len())
    }

    /// Fused multi-space search: per space, retrieve 2k candidates; fuse by
    /// weighted sum normalized over the searched spaces; total order by
    /// fused score with ties broken by chunk_id.
    pub async fn search(
        &self,
        query: &str,
        contact: &str,
        k: usize,
        weights: Option<&BTreeMap<VectorSpace, f64>>,
    ) -> Result<Vec<SearchResult>> {
        let weights = weights.unwrap_or(&self.config.weights);
        let query_texts = vec![query.to_string()];

        struct Candidate {
            text: String,
            scores: BTreeMap<VectorSpace, f64>,
            message_ids: Vec<String>,
            labels_coarse: Vec<String>,
            privacy_tier: PrivacyTier,
            date_start: Option<String>,
            platform: Option<String>,
        }
        let mut candidates: BTreeMap<String, Candidate> = BTreeMap::new();
        let mut total_weight = 0.0;

        for space in self.embedder.spaces() {
            let weight = weights.get(&space).copied().unwrap_or(0.0);
            let query_embedding = match self.embedder.embed(space, &query_texts) {
                Ok(mut embeddings) if !embeddings.is_empty() => embeddings.remove(0),
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!(space = space.as_str(), "Query embedding failed: {e}");
                    continue;
                }
            };
            total_weight += weight;

            let rows = sqlx::query(
                r#"
                SELECT chunk_id, text, embedding, privacy_tier, platform,
                       date_start, labels_json, message_ids_json
                FROM vectors WHERE contact = ? AND space = ?
                "#,
            )
            .bind(contact)
            .bind(space.as_str())
            .fetch_all(&self.pool)
            .await?;

            // Rank this space's candidates and keep the top 2k for fusion.
            let mut scored: Vec<(String, f64, sqlx::sqlite::SqliteRow)> = Vec::new();
            for row in rows {
                let blob: Vec<u8> = row.get("embedding");
                let embedding: Vec<f32> = match bincode::deserialize(&blob) {
                    Ok(embedding) => embedding,
                    Err(e) => {
                        tracing::error!("Corrupt embedding blob: {e}");
                        continue;
                    }
                };
                let score = cosine_similarity(&query_embedding, &embedding) as f64;
                scored.push((row.get::<String, _>("chunk_id"), score, row));
            }
            scored.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            scored.truncate(k.saturating_mul(2).max(1));

            for (chunk_id, score, row) in scored {
                let entry = candidates.entry(chunk_id).or_insert_with(|| Candidate {
                    text: row.get("text"),
                    scores: BTreeMap::new(),
                    message_ids: serde_json::from_str(
                        &row.get::<String, _>("message_ids_json"),
                    )
                    .unwrap_or_default(),
                    labels_coarse: serde_json::from_str(&row.get::<String, _>("labels_json"))
                        .unwrap_or_default(),
                    privacy_tier: row
                        .get::<String, _>("privacy_tier")
                        .parse()
                        .unwrap_or(PrivacyTier::LocalOnly),
                    date_start: row.get("date_start"),
                    platform: row.get("platform"),
                });
                entry.scores.insert(space, score);
            }
        }

        if total_weight <= 0.0 {
            return Ok(Vec::new());
        }

        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .map(|(chunk_id, candidate)| {
                let mut combined = 0.0;
                let mut contributions = BTreeMap::new();
                for (space, score) in &candidate.scores {
                    let weight = weights.get(space).copied().unwrap_or(0.0);
                    let contribution = weight * score;
                    combined += contribution;
                    contributions.insert(*space, contribution);
                }
                SearchResult {
                    chunk_id,
                    text: candidate.text,
                    combined_score: combined / total_weight,
                    scores: candidate.scores,
                    contributions,
                    message_ids: candidate.message_ids,
                    labels_coarse: candidate.labels_coarse,
                    privacy_tier: candidate.privacy_tier,
                    date_start: candidate.date_start,
                    platform: candidate.platform,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        results.truncate(k);
        Ok(results)
    }

    /// Aggregate psychology view driven by the psychological space's
    /// metadata.
    pub async fn psychology_insights(
        &self,
        contact: &str,
        time_range: Option<(&str, &str)>,
    ) -> Result<PsychologyInsights> {
        let mut sql = String::from(
            "SELECT date_start, privacy_tier, labels_json FROM vectors \
             WHERE contact = ? AND space = 'psychological'",
        );
        if time_range.is_some() {
            sql.push_str(" AND date_start >= ? AND date_start <= ?");
        }

        let mut query = sqlx::query(&sql).bind(contact);
        if let Some((from, to)) = time_range {
            query = query.bind(from).bind(to);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut label_distribution: BTreeMap<String, usize> = BTreeMap::new();
        let mut monthly_patterns: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
        let mut privacy_distribution: BTreeMap<String, usize> = BTreeMap::new();

        for row in &rows {
            let labels: Vec<String> =
                serde_json::from_str(&row.get::<String, _>("labels_json")).unwrap_or_default();
            let tier: String = row.get("privacy_tier");
            *privacy_distribution.entry(tier).or_default() += 1;

            let month = row
                .get::<Option<String>, _>("date_start")
                .map(|d| d.chars().take(7).collect::<String>());

            for label in labels {
                *label_distribution.entry(label.clone()).or_default() += 1;
                if let Some(month) = &month {
                    *monthly_patterns
                        .entry(month.clone())
                        .or_default()
                        .entry(label)
                        .or_default() += 1;
                }
            }
        }

        let mut by_count: Vec<(&String, &usize)> = label_distribution.iter().collect();
        by_count.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let top_labels = by_count
            .into_iter()
            .take(10)
            .map(|(label, _)| label.clone())
            .collect();

        Ok(PsychologyInsights {
            total_chunks: rows.len(),
            label_distribution,
            monthly_patterns,
            privacy_distribution,
            top_labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsift_core::{ChunkMeta, ChunkMethod, Provenance, WindowInfo};
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Embedder with fully controlled vectors, keyed by (space, text).
    struct MockEmbedder {
        vectors: Mutex<HashMap<(VectorSpace, String), Vec<f32>>>,
        spaces: Vec<VectorSpace>,
    }

    impl MockEmbedder {
        fn new(spaces: Vec<VectorSpace>) -> Self {
            Self {
                vectors: Mutex::new(HashMap::new()),
                spaces,
            }
        }

        fn set(&self, space: VectorSpace, text: &str, vector: Vec<f32>) {
            self.vectors
                .lock()
                .unwrap()
                .insert((space, text.to_string()), vector);
        }
    }

    impl Embedder for MockEmbedder {
        fn embed(&self, space: VectorSpace, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let vectors = self.vectors.lock().unwrap();
            Ok(texts
                .iter()
                .map(|t| {
                    vectors
                        .get(&(space, t.clone()))
                        .cloned()
                        .unwrap_or_else(|| vec![1.0, 0.0])
                })
                .collect())
        }

        fn spaces(&self) -> Vec<VectorSpace> {
            self.spaces.clone()
        }
    }

    fn chunk(id: &str, text: &str, fine: &[&str]) -> Chunk {
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
                message_ids: vec!["1".to_string()],
                labels_coarse: vec!["stress".to_string()],
                labels_fine_local: fine.iter().map(|s| s.to_string()).collect(),
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

    async fn store_with(embedder: Arc<MockEmbedder>) -> (SqliteVectorStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteVectorStore::open(
            dir.path(),
            embedder as Arc<dyn Embedder>,
            Arc::new(LabelTaxonomy::builtin()),
            MultiVectorConfig::default(),
        )
        .await
        .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn fusion_is_convex_and_ties_break_by_chunk_id() {
        let embedder = Arc::new(MockEmbedder::new(vec![
            VectorSpace::Semantic,
            VectorSpace::Psychological,
        ]));
        // Query and two chunks; semantic sims 0.9 / 0.3, psychological
        // 0.2 / 0.8, weights 0.5 / 0.5 → both fuse to 0.55.
        embedder.set(VectorSpace::Semantic, "Q", vec![1.0, 0.0]);
        embedder.set(VectorSpace::Psychological, "Q", vec![1.0, 0.0]);
        embedder.set(VectorSpace::Semantic, "text a", vec![0.9, (1.0f32 - 0.81).sqrt()]);
        embedder.set(VectorSpace::Semantic, "text b", vec![0.3, (1.0f32 - 0.09).sqrt()]);
        embedder.set(
            VectorSpace::Psychological,
            "text a",
            vec![0.2, (1.0f32 - 0.04).sqrt()],
        );
        embedder.set(
            VectorSpace::Psychological,
            "text b",
            vec![0.8, (1.0f32 - 0.64).sqrt()],
        );

        let (store, _dir) = store_with(embedder).await;
        store
            .index_chunks(&[chunk("ch_a", "text a", &[]), chunk("ch_b", "text b", &[])], "alex")
            .await
            .unwrap();

        let mut weights = BTreeMap::new();
        weights.insert(VectorSpace::Semantic, 0.5);
        weights.insert(VectorSpace::Psychological, 0.5);
        let results = store.search("Q", "alex", 10, Some(&weights)).await.unwrap();

        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(
                (result.combined_score - 0.55).abs() < 1e-5,
                "fused score was {}",
                result.combined_score
            );
        }

        // Per-space contributions are recorded.
        let a = results.iter().find(|r| r.chunk_id == "ch_a").unwrap();
        assert!((a.contributions[&VectorSpace::Semantic] - 0.45).abs() < 1e-5);
        assert!((a.contributions[&VectorSpace::Psychological] - 0.10).abs() < 1e-5);
    }

    #[tokio::test]
    async fn identical_scores_order_deterministically() {
        let embedder = Arc::new(MockEmbedder::new(vec![VectorSpace::Semantic]));
        embedder.set(VectorSpace::Semantic, "Q", vec![1.0, 0.0]);
        embedder.set(VectorSpace::Semantic, "same", vec![1.0, 0.0]);

        let (store, _dir) = store_with(embedder).await;
        store
            .index_chunks(
                &[chunk("ch_z", "same", &[]), chunk("ch_a", "same", &[])],
                "alex",
            )
            .await
            .unwrap();

        let results = store.search("Q", "alex", 10, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].combined_score, results[1].combined_score);
        assert_eq!(results[0].chunk_id, "ch_a");
        assert_eq!(results[1].chunk_id, "ch_z");
    }

    #[tokio::test]
    async fn local_only_batch_keeps_all_spaces_cloud_safe_skips_temporal() {
        let embedder = Arc::new(MockEmbedder::new(vec![
            VectorSpace::Semantic,
            VectorSpace::Temporal,
        ]));
        let (store, _dir) = store_with(embedder).await;

        // Cloud-safe batch: temporal (local-only space) is skipped.
        let stats = store
            .index_chunks(&[chunk("ch_cs", "hello", &[])], "alex")
            .await
            .unwrap();
        assert_eq!(stats.per_space["semantic"].indexed, 1);
        assert!(stats.per_space.get("temporal").is_none());

        // A fine label makes the batch local-only and temporal admits it.
        let stats = store
            .index_chunks(&[chunk("ch_lo", "hello again", &["substances"])], "alex")
            .await
            .unwrap();
        assert_eq!(stats.per_space["temporal"].indexed, 1);
    }

    #[tokio::test]
    async fn tier_violating_entries_are_refused() {
        let embedder = Arc::new(MockEmbedder::new(vec![VectorSpace::Semantic]));
        let (store, _dir) = store_with(embedder).await;

        let mut bad = chunk("ch_bad", "text", &[]);
        // A fine-universe label smuggled into coarse labels.
        bad.meta.labels_coarse.push("substances".to_string());

        let stats = store.index_chunks(&[bad], "alex").await.unwrap();
        assert_eq!(stats.refused, 1);
        assert_eq!(stats.total_indexed, 0);
    }

    #[tokio::test]
    async fn search_result_carries_privacy_tier() {
        let embedder = Arc::new(MockEmbedder::new(vec![VectorSpace::Semantic]));
        embedder.set(VectorSpace::Semantic, "Q", vec![1.0, 0.0]);
        embedder.set(VectorSpace::Semantic, "sensitive stuff", vec![1.0, 0.0]);

        let (store, _dir) = store_with(embedder).await;
        store
            .index_chunks(
                &[chunk("ch_1", "sensitive stuff", &["substances"])],
                "alex",
            )
            .await
            .unwrap();

        let results = store.search("Q", "alex", 5, None).await.unwrap();
        assert_eq!(results[0].privacy_tier, PrivacyTier::LocalOnly);
    }

    #[tokio::test]
    async fn psychology_insights_aggregate_labels() {
        let embedder = Arc::new(MockEmbedder::new(vec![VectorSpace::Psychological]));
        let (store, _dir) = store_with(embedder).await;

        let mut chunks = Vec::new();
        for i in 0..4 {
            let mut c = chunk(&format!("ch_{i}"), "text", &[]);
            c.meta.labels_coarse = vec!["stress".to_string(), "conflict".to_string()];
            chunks.push(c);
        }
        store.index_chunks(&chunks, "alex").await.unwrap();

        let insights = store.psychology_insights("alex", None).await.unwrap();
        assert_eq!(insights.total_chunks, 4);
        assert_eq!(insights.label_distribution["stress"], 4);
        assert_eq!(insights.label_distribution["conflict"], 4);
        assert!(insights.top_labels.contains(&"stress".to_string()));
        assert_eq!(insights.monthly_patterns["2024-05"]["stress"], 4);
        assert_eq!(insights.privacy_distribution["cloud_safe"], 4);
    }

    #[tokio::test]
    async fn empty_store_searches_empty() {
        let embedder = Arc::new(MockEmbedder::new(vec![VectorSpace::Semantic]));
        embedder.set(VectorSpace::Semantic, "Q", vec![1.0, 0.0]);
        let (store, _dir) = store_with(embedder).await;
        let results = store.search("Q", "nobody", 5, None).await.unwrap();
        assert!(results.is_empty());
    }
}
