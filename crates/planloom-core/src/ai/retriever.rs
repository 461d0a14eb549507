//! The `Retriever` trait -- interface to the embedding/similarity store.
//!
//! The store itself (indexing, embeddings, persistence) is an external
//! collaborator; the core only consumes ranked chunks for prompt assembly.
//! Retrieval failures are treated as "no context" by callers, so the trait
//! uses `anyhow::Result` rather than a dedicated error domain.

use anyhow::Result;
use async_trait::async_trait;

/// A ranked chunk returned from the similarity store.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    /// The chunk text.
    pub page_content: String,
    /// Path of the file the chunk came from.
    pub path: String,
}

/// Adapter interface to the vector-similarity store.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return up to `k` chunks relevant to `query` for one session's corpus.
    async fn retrieve(
        &self,
        query: &str,
        session_id: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>>;
}

/// Retriever that never returns context. Used when no store is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRetriever;

#[async_trait]
impl Retriever for NullRetriever {
    async fn retrieve(
        &self,
        _query: &str,
        _session_id: &str,
        _k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        Ok(Vec::new())
    }
}
