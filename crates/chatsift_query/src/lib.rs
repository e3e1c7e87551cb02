//! Retrieval-augmented query: fused multi-vector retrieval, snippet
//! citations, answer generation through the local model.

pub mod citations;
pub mod engine;

pub use citations::{Citation, CitationManager};
pub use engine::{QueryConfig, QueryResponse, RagEngine};
