//! chatsift: local-first forensic chat analysis pipeline.
//!
//! Stages run as subcommands and exchange JSON artifacts; `pipeline` runs
//! the full chain for one source database. Exit code is nonzero when a
//! confirmed hard-fail triggered or the cloud preflight blocked.

use anyhow::{bail, Context, Result};
use chatsift_bridge::{HierarchicalContextBridge, WindowItem};
use chatsift_core::{
    CanonicalMessage, ChatsiftConfig, Chunk, ChunkMethod, EnrichmentRecord, LabelTaxonomy,
    PrivacyTier,
};
use chatsift_enrich::{ChatModel, MultiPassPipeline, OllamaClient};
use chatsift_extract::{ConversationChunker, Extractor, IMessageExtractor, MissingAttachmentsReport};
use chatsift_graph::SqliteGraphStore;
use chatsift_index::{Embedder, FastEmbedder, MultiVectorConfig, SqliteVectorStore};
use chatsift_query::RagEngine;
use chatsift_shield::PolicyShield;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatsift", about = "Local-first forensic chat analysis", version)]
struct Cli {
    /// Config file (TOML); defaults are used when absent.
    #[arg(long, default_value = "chatsift.toml", env = "CHATSIFT_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract canonical messages from an iMessage chat.db.
    Extract {
        db: PathBuf,
        #[arg(long, short)]
        out: PathBuf,
        #[arg(long)]
        contact: String,
    },
    /// Window extracted messages into chunks.
    Chunk {
        messages: PathBuf,
        #[arg(long, short)]
        out: PathBuf,
        #[arg(long)]
        contact: String,
        #[arg(long, default_value = "turns")]
        method: String,
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Redact chunks through the Policy Shield.
    Redact {
        chunks: PathBuf,
        #[arg(long, short)]
        out: PathBuf,
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Run the four-pass enrichment pipeline over redacted chunks.
    Enrich {
        chunks: PathBuf,
        #[arg(long, short)]
        out: PathBuf,
        #[arg(long)]
        records_out: PathBuf,
        #[arg(long)]
        contact: String,
        #[arg(long, default_value = "local_only")]
        tier: String,
    },
    /// Build hierarchical context bundles from enriched chunks.
    Bridge {
        chunks: PathBuf,
        records: PathBuf,
        #[arg(long, short)]
        out: PathBuf,
        #[arg(long)]
        cloud: bool,
    },
    /// Index enriched chunks into the multi-vector store.
    Index {
        chunks: PathBuf,
        #[arg(long)]
        contact: String,
    },
    /// Build the psychology relationship graph.
    Graph {
        chunks: PathBuf,
        records: PathBuf,
        #[arg(long)]
        conversation: String,
    },
    /// Ask a question against an indexed contact.
    Query {
        question: String,
        #[arg(long)]
        contact: String,
    },
    /// Report attachments referenced by the source but missing on disk.
    AttachmentsReport {
        messages: PathBuf,
        #[arg(long)]
        contact: String,
        #[arg(long, short)]
        out: PathBuf,
    },
    /// Full chain: extract → chunk → redact → enrich → index → graph.
    Pipeline {
        db: PathBuf,
        #[arg(long)]
        contact: String,
    },
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn parse_method(method: &str) -> Result<ChunkMethod> {
    match method {
        "turns" => Ok(ChunkMethod::Turns),
        "daily" => Ok(ChunkMethod::Daily),
        "fixed" => Ok(ChunkMethod::Fixed),
        "semantic" => Ok(ChunkMethod::Semantic),
        other => bail!("unknown chunk method: {other}"),
    }
}

fn build_shield(config: &ChatsiftConfig) -> Result<PolicyShield> {
    PolicyShield::new(config.policy.clone(), Some(&config.storage.salt_file))?
        .with_ledger_file(&config.storage.ledger_file)
}

async fn open_vector_store(config: &ChatsiftConfig) -> Result<SqliteVectorStore> {
    let embedder = Arc::new(FastEmbedder::new()?) as Arc<dyn Embedder>;
    SqliteVectorStore::open(
        &config.storage.vector_dir,
        embedder,
        Arc::new(LabelTaxonomy::builtin()),
        MultiVectorConfig::default(),
    )
    .await
}

fn graph_db_path(config: &ChatsiftConfig) -> PathBuf {
    PathBuf::from(
        config
            .storage
            .graph_uri
            .trim_start_matches("sqlite://")
            .to_string(),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ChatsiftConfig::load_or_default(&cli.config);
    let run_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(run_id, "chatsift starting");

    match cli.command {
        Command::Extract { db, out, contact } => {
            let mut extractor = IMessageExtractor::new(&db);
            let messages = extractor.extract().await?;
            let report = extractor.report();
            tracing::info!(
                messages = report.messages_extracted,
                reactions_folded = report.reactions_folded,
                unresolved_replies = report.unresolved_replies,
                contact,
                "Extraction complete"
            );
            write_json(&out, &messages)?;
        }

        Command::Chunk {
            messages,
            out,
            contact,
            method,
            run_id: explicit_run_id,
        } => {
            let messages: Vec<CanonicalMessage> = read_json(&messages)?;
            let chunker = ConversationChunker::new(explicit_run_id.or(Some(run_id)));
            let chunks = chunker.chunk_messages(&messages, parse_method(&method)?, &contact);
            tracing::info!(chunks = chunks.len(), "Chunking complete");
            write_json(&out, &chunks)?;
        }

        Command::Redact { chunks, out, report } => {
            let chunks: Vec<Chunk> = read_json(&chunks)?;
            let shield = build_shield(&config)?;
            let (redacted, redaction_report) = shield.redact_chunks(&chunks);
            write_json(&out, &redacted)?;

            let report_path = report.unwrap_or_else(|| {
                config.storage.report_dir.join(format!("redaction-{run_id}.json"))
            });
            redaction_report.save(&report_path)?;

            let (passed, issues) = shield.preflight_cloud_check(&redacted, &redaction_report);
            if redaction_report.hardfail_triggered {
                bail!("hard-fail content detected; see {}", report_path.display());
            }
            if !passed {
                bail!("preflight cloud check blocked: {issues:?}");
            }
        }

        Command::Enrich {
            chunks,
            out,
            records_out,
            contact,
            tier,
        } => {
            let mut chunk_list: Vec<Chunk> = read_json(&chunks)?;
            let tier: PrivacyTier = tier
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;

            let model = Arc::new(OllamaClient::new(
                config.model.clone(),
                &config.concurrency,
            )?) as Arc<dyn ChatModel>;
            let pipeline = MultiPassPipeline::new(Arc::new(LabelTaxonomy::builtin()), model)
                .with_sidecar_dir(config.storage.sidecar_dir.clone());

            let outcomes = pipeline.enrich_chunks(&mut chunk_list, &contact, tier).await;
            let records: Vec<&EnrichmentRecord> =
                outcomes.iter().map(|o| &o.record).collect();

            write_json(&out, &chunk_list)?;
            write_json(&records_out, &records)?;
        }

        Command::Bridge {
            chunks,
            records,
            out,
            cloud,
        } => {
            let chunk_list: Vec<Chunk> = read_json(&chunks)?;
            let records: Vec<EnrichmentRecord> = read_json(&records)?;
            let bridge =
                HierarchicalContextBridge::new(config.policy.dp_epsilon, true);

            let window: Vec<WindowItem> = chunk_list
                .iter()
                .zip(records.iter())
                .map(|(chunk, record)| WindowItem::from_record(record, chunk.meta.date_end))
                .collect();

            let mut bundles = Vec::with_capacity(records.len());
            for record in &records {
                bundles.push(bridge.create_hierarchical_context(record, &window, cloud)?);
            }
            write_json(&out, &bundles)?;
        }

        Command::Index { chunks, contact } => {
            let chunk_list: Vec<Chunk> = read_json(&chunks)?;
            let store = open_vector_store(&config).await?;
            let stats = store.index_chunks(&chunk_list, &contact).await?;
            tracing::info!(
                indexed = stats.total_indexed,
                errors = stats.total_errors,
                refused = stats.refused,
                "Indexing complete"
            );
        }

        Command::Graph {
            chunks,
            records,
            conversation,
        } => {
            let chunk_list: Vec<Chunk> = read_json(&chunks)?;
            let records: Vec<EnrichmentRecord> = read_json(&records)?;
            let store = SqliteGraphStore::open(graph_db_path(&config), &config.storage).await?;
            let graph = store.create_graph(&conversation, &chunk_list, &records).await?;
            tracing::info!(
                nodes = graph.nodes.len(),
                edges = graph.relationships.len(),
                "Graph built"
            );

            let patterns = store.detect_patterns(&conversation, None).await?;
            tracing::info!(patterns = patterns.len(), "Pattern detection complete");
        }

        Command::Query { question, contact } => {
            let store = Arc::new(open_vector_store(&config).await?);
            let model = Arc::new(OllamaClient::new(
                config.model.clone(),
                &config.concurrency,
            )?) as Arc<dyn ChatModel>;
            let engine = RagEngine::new(store, model);

            let response = engine.query(&question, &contact).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Command::AttachmentsReport {
            messages,
            contact,
            out,
        } => {
            let messages: Vec<CanonicalMessage> = read_json(&messages)?;
            let report = MissingAttachmentsReport::from_messages(&contact, &messages);
            report.write_json(&out)?;
            tracing::info!(missing = report.summary.total_missing, "Attachment report written");
        }

        Command::Pipeline { db, contact } => {
            // Extract.
            let mut extractor = IMessageExtractor::new(&db);
            let messages = extractor.extract().await?;
            tracing::info!(messages = messages.len(), "Extracted");

            // Chunk.
            let chunker = ConversationChunker::new(Some(run_id.clone()));
            let chunks = chunker.chunk_messages(&messages, ChunkMethod::Turns, &contact);
            tracing::info!(chunks = chunks.len(), "Chunked");

            // Redact.
            let shield = build_shield(&config)?;
            let (mut redacted, report) = shield.redact_chunks(&chunks);
            let report_path = config
                .storage
                .report_dir
                .join(format!("redaction-{run_id}.json"));
            report.save(&report_path)?;
            if report.hardfail_triggered {
                bail!("hard-fail content detected; aborting pipeline");
            }
            let (passed, issues) = shield.preflight_cloud_check(&redacted, &report);
            if !passed {
                bail!("preflight cloud check blocked: {issues:?}");
            }

            // Enrich.
            let model = Arc::new(OllamaClient::new(
                config.model.clone(),
                &config.concurrency,
            )?) as Arc<dyn ChatModel>;
            let pipeline =
                MultiPassPipeline::new(Arc::new(LabelTaxonomy::builtin()), model)
                    .with_sidecar_dir(config.storage.sidecar_dir.clone());
            let outcomes = pipeline
                .enrich_chunks(&mut redacted, &contact, PrivacyTier::LocalOnly)
                .await;
            let records: Vec<EnrichmentRecord> =
                outcomes.into_iter().map(|o| o.record).collect();

            // Index.
            let store = open_vector_store(&config).await?;
            let stats = store.index_chunks(&redacted, &contact).await?;
            tracing::info!(indexed = stats.total_indexed, "Indexed");

            // Graph.
            let graph_store =
                SqliteGraphStore::open(graph_db_path(&config), &config.storage).await?;
            for conv_id in redacted
                .iter()
                .map(|c| c.conv_id.clone())
                .collect::<std::collections::BTreeSet<_>>()
            {
                let conv_chunks: Vec<Chunk> = redacted
                    .iter()
                    .filter(|c| c.conv_id == conv_id)
                    .cloned()
                    .collect();
                graph_store
                    .create_graph(&conv_id, &conv_chunks, &records)
                    .await?;
            }
            tracing::info!("Pipeline complete");
        }
    }

    Ok(())
}
