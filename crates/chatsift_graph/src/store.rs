//! SQLite-backed graph store: chunk nodes, FOLLOWS edges between adjacent
//! chunks, mapper-driven psychology edges, pattern detection and temporal
//! evolution. Reads are parallel-safe; writes are serialized per store.

use crate::mapper::PsychologyRelationshipMapper;
use crate::patterns::{detect_patterns, PatternMatch};
use crate::{ConversationGraph, GraphNode, GraphRelationship, PatternType, RelationshipType};
use anyhow::{Context, Result};
use chatsift_core::{BoundarySignal, Chunk, EnrichmentRecord, StorageConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Connection pool health view.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetrics {
    pub active_connections: u32,
    pub idle_connections: u32,
    pub total_connections: u32,
    pub peak_connections: u32,
    pub connection_errors: u64,
    pub acquisition_timeouts: u64,
    pub avg_acquisition_ms: f64,
    pub utilization_percent: f64,
    pub health_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvolutionMetrics {
    pub total_events: usize,
    pub boundary_events: usize,
    pub repair_attempts: usize,
    /// Repair-to-boundary ratio; the relationship-health indicator.
    pub boundary_to_repair_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemporalEvolution {
    pub conversation_id: String,
    pub time_window_days: u32,
    pub metrics: EvolutionMetrics,
    pub label_frequency: BTreeMap<String, usize>,
    /// "stable" below three distinct labels, "variable" otherwise.
    pub pattern_stability: String,
}

pub struct SqliteGraphStore {
    pool: Pool<Sqlite>,
    mapper: PsychologyRelationshipMapper,
    /// Graph writes are serialized; reads go straight to the pool.
    write_lock: Mutex<()>,
    connection_errors: AtomicU64,
    acquisition_timeouts: AtomicU64,
    acquisition_ns_total: AtomicU64,
    acquisitions: AtomicU64,
}

impl SqliteGraphStore {
    pub async fn open<P: AsRef<Path>>(path: P, storage: &StorageConfig) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(storage.pool_size.clamp(1, 100))
            .max_lifetime(Duration::from_secs(storage.pool_lifetime_s))
            .acquire_timeout(Duration::from_secs(storage.pool_acquisition_timeout_s))
            .connect_with(options)
            .await
            .context("Failed to open graph database")?;

        let store = Self {
            pool,
            mapper: PsychologyRelationshipMapper::new(),
            write_lock: Mutex::new(()),
            connection_errors: AtomicU64::new(0),
            acquisition_timeouts: AtomicU64::new(0),
            acquisition_ns_total: AtomicU64::new(0),
            acquisitions: AtomicU64::new(0),
        };
        store.migrate().await?;
        tracing::info!(path = %path.as_ref().display(), "Opened graph store");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS graph_nodes (
                conversation_id TEXT NOT NULL,
                id TEXT NOT NULL,
                node_type TEXT NOT NULL,
                timestamp TEXT,
                properties_json TEXT NOT NULL,
                PRIMARY KEY (conversation_id, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create graph_nodes table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS graph_edges (
                conversation_id TEXT NOT NULL,
                from_node TEXT NOT NULL,
                to_node TEXT NOT NULL,
                rel_type TEXT NOT NULL,
                confidence REAL,
                properties_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create graph_edges table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_edges_conv_type ON graph_edges(conversation_id, rel_type)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn mapper(&self) -> &PsychologyRelationshipMapper {
        &self.mapper
    }

    /// Build and persist the conversation graph: one node per chunk,
    /// FOLLOWS edges between adjacent chunks, plus mapper-detected
    /// psychology edges. Replaces any existing graph for the conversation.
    pub async fn create_graph(
        &self,
        conversation_id: &str,
        chunks: &[Chunk],
        records: &[EnrichmentRecord],
    ) -> Result<ConversationGraph> {
        let records_by_chunk: HashMap<&str, &EnrichmentRecord> =
            records.iter().map(|r| (r.chunk_id.as_str(), r)).collect();

        let mut sorted: Vec<&Chunk> = chunks.iter().collect();
        sorted.sort_by_key(|c| c.meta.date_start);

        let nodes: Vec<GraphNode> = sorted
            .iter()
            .map(|chunk| {
                let record = records_by_chunk.get(chunk.chunk_id.as_str());
                GraphNode {
                    id: chunk.chunk_id.clone(),
                    node_type: "chunk".to_string(),
                    properties: json!({
                        "conversation_id": conversation_id,
                        "timestamp": chunk.meta.date_start.to_rfc3339(),
                        "message_ids": chunk.meta.message_ids,
                        "labels_coarse": chunk.meta.labels_coarse,
                        "platform": chunk.meta.platform,
                        "boundary_signal": record
                            .map(|r| r.boundary_signal != BoundarySignal::None)
                            .unwrap_or(false),
                        "repair_attempt": record.map(|r| r.repair_attempt).unwrap_or(false),
                    }),
                }
            })
            .collect();

        let mut relationships = Vec::new();
        for window in sorted.windows(2) {
            let (current, next) = (window[0], window[1]);
            let time_gap = (next.meta.date_start - current.meta.date_start).num_seconds();

            relationships.push(GraphRelationship {
                from_node: current.chunk_id.clone(),
                to_node: next.chunk_id.clone(),
                relationship_type: RelationshipType::Follows,
                properties: json!({ "time_gap_s": time_gap }),
            });

            // Psychology edges from the combined label pair.
            let labels1 = &current.meta.labels_coarse;
            let labels2 = &next.meta.labels_coarse;
            let combined: Vec<String> = labels1.iter().chain(labels2.iter()).cloned().collect();
            let context = self.mapper.detect_relationship_context(&combined);

            for (relationship_type, confidence) in
                self.mapper
                    .map_labels_to_relationships(labels1, labels2, context, true)
            {
                if confidence > 0.7 {
                    tracing::info!(
                        relationship = relationship_type.as_str(),
                        confidence,
                        context = context.as_str(),
                        "High-confidence relationship detected"
                    );
                }
                relationships.push(GraphRelationship {
                    from_node: current.chunk_id.clone(),
                    to_node: next.chunk_id.clone(),
                    relationship_type,
                    properties: json!({
                        "confidence": confidence,
                        "context": context.as_str(),
                        "explanation": self.mapper.explanation(relationship_type, &combined),
                    }),
                });
            }
        }

        self.store_graph(conversation_id, &nodes, &relationships).await?;

        Ok(ConversationGraph {
            conversation_id: conversation_id.to_string(),
            nodes,
            relationships,
            metadata: json!({
                "created_at": Utc::now().to_rfc3339(),
                "chunk_count": chunks.len(),
            }),
        })
    }

    async fn store_graph(
        &self,
        conversation_id: &str,
        nodes: &[GraphNode],
        relationships: &[GraphRelationship],
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.acquire_tx().await?;

        sqlx::query("DELETE FROM graph_nodes WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM graph_edges WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        for node in nodes {
            sqlx::query(
                "INSERT INTO graph_nodes (conversation_id, id, node_type, timestamp, properties_json) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(conversation_id)
            .bind(&node.id)
            .bind(&node.node_type)
            .bind(node.properties["timestamp"].as_str())
            .bind(serde_json::to_string(&node.properties)?)
            .execute(&mut *tx)
            .await?;
        }

        for rel in relationships {
            sqlx::query(
                "INSERT INTO graph_edges (conversation_id, from_node, to_node, rel_type, confidence, properties_json) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(conversation_id)
            .bind(&rel.from_node)
            .bind(&rel.to_node)
            .bind(rel.relationship_type.as_str())
            .bind(rel.properties["confidence"].as_f64())
            .bind(serde_json::to_string(&rel.properties)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(
            conversation_id,
            nodes = nodes.len(),
            edges = relationships.len(),
            "Stored conversation graph"
        );
        Ok(())
    }

    async fn acquire_tx(&self) -> Result<sqlx::Transaction<'_, Sqlite>> {
        let started = std::time::Instant::now();
        let result = self.pool.begin().await;
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.acquisition_ns_total
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);

        match result {
            Ok(tx) => Ok(tx),
            Err(sqlx::Error::PoolTimedOut) => {
                self.acquisition_timeouts.fetch_add(1, Ordering::Relaxed);
                Err(chatsift_core::PipelineError::ResourceExhausted(
                    "graph pool acquisition timed out".to_string(),
                )
                .into())
            }
            Err(e) => {
                self.connection_errors.fetch_add(1, Ordering::Relaxed);
                Err(e).context("Failed to begin graph transaction")
            }
        }
    }

    pub async fn get_conversation_graph(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationGraph>> {
        let node_rows = sqlx::query(
            "SELECT id, node_type, properties_json FROM graph_nodes WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        if node_rows.is_empty() {
            return Ok(None);
        }

        let nodes = node_rows
            .into_iter()
            .map(|row| GraphNode {
                id: row.get("id"),
                node_type: row.get("node_type"),
                properties: serde_json::from_str(&row.get::<String, _>("properties_json"))
                    .unwrap_or(json!({})),
            })
            .collect();

        let relationships = self.query_relationships(conversation_id, None).await?;

        Ok(Some(ConversationGraph {
            conversation_id: conversation_id.to_string(),
            nodes,
            relationships,
            metadata: json!({ "retrieved_at": Utc::now().to_rfc3339() }),
        }))
    }

    /// Edges for a conversation, optionally restricted to relationship
    /// types.
    pub async fn query_relationships(
        &self,
        conversation_id: &str,
        relationship_types: Option<&[RelationshipType]>,
    ) -> Result<Vec<GraphRelationship>> {
        let rows = sqlx::query(
            "SELECT from_node, to_node, rel_type, properties_json FROM graph_edges \
             WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        let mut relationships = Vec::new();
        for row in rows {
            let rel_name: String = row.get("rel_type");
            let Some(relationship_type) = RelationshipType::parse(&rel_name) else {
                tracing::warn!(rel_type = %rel_name, "Skipping unknown edge type");
                continue;
            };
            if let Some(wanted) = relationship_types {
                if !wanted.contains(&relationship_type) {
                    continue;
                }
            }
            relationships.push(GraphRelationship {
                from_node: row.get("from_node"),
                to_node: row.get("to_node"),
                relationship_type,
                properties: serde_json::from_str(&row.get::<String, _>("properties_json"))
                    .unwrap_or(json!({})),
            });
        }
        Ok(relationships)
    }

    /// Bounded-walk pattern detection over the conversation's typed edges.
    pub async fn detect_patterns(
        &self,
        conversation_id: &str,
        pattern_types: Option<&[PatternType]>,
    ) -> Result<Vec<PatternMatch>> {
        let relationships = self.query_relationships(conversation_id, None).await?;
        Ok(detect_patterns(&relationships, pattern_types))
    }

    /// Boundary-vs-repair aggregate over a time window.
    pub async fn temporal_evolution(
        &self,
        conversation_id: &str,
        time_window_days: u32,
    ) -> Result<TemporalEvolution> {
        let rows = sqlx::query(
            "SELECT timestamp, properties_json FROM graph_nodes \
             WHERE conversation_id = ? AND timestamp IS NOT NULL ORDER BY timestamp",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        let cutoff = Utc::now() - chrono::Duration::days(time_window_days as i64);
        let mut total_events = 0usize;
        let mut boundary_events = 0usize;
        let mut repair_attempts = 0usize;
        let mut label_frequency: BTreeMap<String, usize> = BTreeMap::new();

        for row in rows {
            let within_window = row
                .get::<Option<String>, _>("timestamp")
                .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
                .map(|t| t.with_timezone(&Utc) >= cutoff)
                .unwrap_or(true);
            if !within_window {
                continue;
            }

            let properties: serde_json::Value =
                serde_json::from_str(&row.get::<String, _>("properties_json"))
                    .unwrap_or(json!({}));

            total_events += 1;
            if properties["boundary_signal"].as_bool().unwrap_or(false) {
                boundary_events += 1;
            }
            if properties["repair_attempt"].as_bool().unwrap_or(false) {
                repair_attempts += 1;
            }
            if let Some(labels) = properties["labels_coarse"].as_array() {
                for label in labels.iter().filter_map(|l| l.as_str()) {
                    *label_frequency.entry(label.to_string()).or_default() += 1;
                }
            }
        }

        let pattern_stability = if label_frequency.len() < 3 {
            "stable"
        } else {
            "variable"
        };

        Ok(TemporalEvolution {
            conversation_id: conversation_id.to_string(),
            time_window_days,
            metrics: EvolutionMetrics {
                total_events,
                boundary_events,
                repair_attempts,
                boundary_to_repair_ratio: repair_attempts as f64 / boundary_events.max(1) as f64,
            },
            label_frequency,
            pattern_stability: pattern_stability.to_string(),
        })
    }

    pub fn pool_metrics(&self) -> PoolMetrics {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        let active = size.saturating_sub(idle);
        let acquisitions = self.acquisitions.load(Ordering::Relaxed);
        let avg_acquisition_ms = if acquisitions == 0 {
            0.0
        } else {
            self.acquisition_ns_total.load(Ordering::Relaxed) as f64
                / acquisitions as f64
                / 1_000_000.0
        };
        let errors = self.connection_errors.load(Ordering::Relaxed);
        let timeouts = self.acquisition_timeouts.load(Ordering::Relaxed);

        let utilization_percent = if size == 0 {
            0.0
        } else {
            active as f64 / size as f64 * 100.0
        };
        let error_penalty = (errors as f64 * 0.1).min(0.5);
        let timeout_penalty = (timeouts as f64 * 0.05).min(0.3);
        let utilization_score = 1.0 - (utilization_percent - 75.0).abs() / 100.0;
        let health_score = (utilization_score - error_penalty - timeout_penalty).max(0.0);

        PoolMetrics {
            active_connections: active,
            idle_connections: idle,
            total_connections: size,
            peak_connections: size,
            connection_errors: errors,
            acquisition_timeouts: timeouts,
            avg_acquisition_ms,
            utilization_percent,
            health_score,
        }
    }
}
