//! The RAG engine. Failures surface inside the response rather than as
//! errors: a query always produces an answer object.

use crate::citations::{Citation, CitationManager};
use chatsift_enrich::{ChatModel, GenerateOptions};
use chatsift_index::{SearchResult, SqliteVectorStore};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Chunks to retrieve before context trimming.
    pub k: usize,
    pub min_score_threshold: f64,
    pub max_context_chunks: usize,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub include_timestamps: bool,
    pub include_platform_info: bool,
    pub snippet_length: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            k: 10,
            min_score_threshold: 0.1,
            max_context_chunks: 5,
            temperature: 0.3,
            max_output_tokens: 800,
            include_timestamps: true,
            include_platform_info: true,
            snippet_length: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub query: String,
    pub contact: String,
    pub retrieval_stats: serde_json::Value,
    pub llm_stats: serde_json::Value,
    pub processing_time_ms: f64,
    pub timestamp: chrono::DateTime<Utc>,
}

pub struct RagEngine {
    store: Arc<SqliteVectorStore>,
    model: Arc<dyn ChatModel>,
    config: QueryConfig,
}

impl RagEngine {
    pub fn new(store: Arc<SqliteVectorStore>, model: Arc<dyn ChatModel>) -> Self {
        Self {
            store,
            model,
            config: QueryConfig::default(),
        }
    }

    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn query(&self, question: &str, contact: &str) -> QueryResponse {
        let started = std::time::Instant::now();

        let results = match self.retrieve(question, contact).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!("Retrieval failed: {e}");
                return self.error_response(question, contact, started, &e.to_string());
            }
        };

        if results.is_empty() {
            return QueryResponse {
                answer: "I couldn't find any relevant information to answer your question."
                    .to_string(),
                citations: Vec::new(),
                query: question.to_string(),
                contact: contact.to_string(),
                retrieval_stats: json!({ "retrieved_chunks": 0 }),
                llm_stats: json!({}),
                processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                timestamp: Utc::now(),
            };
        }

        let mut citation_manager = CitationManager::new();
        for result in &results {
            citation_manager.add(result, self.config.snippet_length);
        }

        let (answer, llm_stats) = self.generate_answer(question, &results).await;

        let min_score = results
            .iter()
            .map(|r| r.combined_score)
            .fold(f64::INFINITY, f64::min);
        let max_score = results
            .iter()
            .map(|r| r.combined_score)
            .fold(f64::NEG_INFINITY, f64::max);

        QueryResponse {
            answer,
            citations: citation_manager.into_citations(),
            query: question.to_string(),
            contact: contact.to_string(),
            retrieval_stats: json!({
                "retrieved_chunks": results.len(),
                "min_score": min_score,
                "max_score": max_score,
            }),
            llm_stats,
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            timestamp: Utc::now(),
        }
    }

    async fn retrieve(&self, question: &str, contact: &str) -> anyhow::Result<Vec<SearchResult>> {
        let results = self
            .store
            .search(question, contact, self.config.k, None)
            .await?;

        let filtered: Vec<SearchResult> = results
            .into_iter()
            .filter(|r| r.combined_score >= self.config.min_score_threshold)
            .take(self.config.max_context_chunks)
            .collect();

        tracing::info!(count = filtered.len(), "Retrieved context chunks");
        Ok(filtered)
    }

    fn format_context(&self, results: &[SearchResult]) -> String {
        let mut parts = Vec::with_capacity(results.len());
        for (i, result) in results.iter().enumerate() {
            let timestamp = if self.config.include_timestamps {
                result
                    .date_start
                    .as_ref()
                    .map(|d| format!(" ({})", d.chars().take(10).collect::<String>()))
                    .unwrap_or_default()
            } else {
                String::new()
            };
            let platform = if self.config.include_platform_info {
                result
                    .platform
                    .as_ref()
                    .map(|p| format!(" [{p}]"))
                    .unwrap_or_default()
            } else {
                String::new()
            };
            parts.push(format!(
                "Context {}{platform}{timestamp}:\n{}\n",
                i + 1,
                result.text
            ));
        }
        parts.join("\n")
    }

    fn qa_prompt(&self, question: &str, context: &str) -> String {
        format!(
            "You are a helpful assistant that answers questions based on conversation history.\n\
             Use only the provided context to answer the question. If the context doesn't \
             contain relevant information, say so.\n\n\
             CONTEXT:\n{context}\n\n\
             QUESTION: {question}\n\n\
             INSTRUCTIONS:\n\
             - Answer based only on the provided context\n\
             - Be concise and specific\n\
             - If the context doesn't contain enough information, say \
             \"I don't have enough information to answer this question\"\n\
             - Reference specific details from the context when possible\n\n\
             ANSWER:"
        )
    }

    async fn generate_answer(
        &self,
        question: &str,
        results: &[SearchResult],
    ) -> (String, serde_json::Value) {
        let context = self.format_context(results);
        let prompt = self.qa_prompt(question, &context);

        let generation_started = std::time::Instant::now();
        match self
            .model
            .generate(
                &prompt,
                None,
                GenerateOptions {
                    temperature: self.config.temperature,
                    num_predict: self.config.max_output_tokens,
                },
            )
            .await
        {
            Ok(answer) => {
                let generation_ms = generation_started.elapsed().as_secs_f64() * 1000.0;
                let stats = json!({
                    "model": self.model.model_name(),
                    "generation_time_ms": generation_ms,
                    "input_tokens_approx": (prompt.split_whitespace().count() as f64 * 1.3) as u64,
                    "output_tokens_approx": (answer.split_whitespace().count() as f64 * 1.3) as u64,
                    "temperature": self.config.temperature,
                });
                (answer.trim().to_string(), stats)
            }
            Err(e) => {
                tracing::error!("Answer generation failed: {e}");
                (
                    format!("I encountered an error generating the answer: {e}"),
                    json!({}),
                )
            }
        }
    }

    fn error_response(
        &self,
        question: &str,
        contact: &str,
        started: std::time::Instant,
        error: &str,
    ) -> QueryResponse {
        QueryResponse {
            answer: format!("I encountered an error while processing your question: {error}"),
            citations: Vec::new(),
            query: question.to_string(),
            contact: contact.to_string(),
            retrieval_stats: json!({ "error": error }),
            llm_stats: json!({}),
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            timestamp: Utc::now(),
        }
    }
}
