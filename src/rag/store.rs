//! VectorStore trait — abstract interface for chunk storage backends.
//!
//! Keeps exhaustive-scan retrieval behind a trait so a future ANN-backed
//! implementation can slot in without touching the retriever or the prompt
//! builder.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::EngineError;

/// Default bound on retained chunks before FIFO eviction kicks in.
pub const DEFAULT_MAX_CHUNKS: usize = 10_000;

/// A stored chunk: a bounded slice of document text plus its embedding.
///
/// Immutable once stored. Embedding dimensionality is fixed by the embedding
/// model and must agree across every chunk scanned in one search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk identifier.
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// Embedding vector for the text.
    pub embedding: Vec<f32>,
    /// Document this chunk was cut from.
    pub document_id: String,
    /// Display name of the source document.
    pub document_name: String,
    /// Folder the document lives in, if any.
    pub folder_id: Option<String>,
    /// 1-based page the chunk starts on, when the source format has pages.
    pub page_number: Option<u32>,
    /// Optional metadata (JSON).
    pub metadata: Option<serde_json::Value>,
}

/// Result of a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    /// Cosine similarity in [-1, 1]; higher is more relevant.
    pub score: f32,
}

/// Aggregate counts surfaced to the shell.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_chunks: usize,
    pub total_documents: usize,
    pub chunks_per_document: HashMap<String, usize>,
}

/// Abstract trait for chunk storage backends.
///
/// Implementations must keep search deterministic: stable descending order
/// by score with ties resolved by insertion order.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Append chunks, evicting the oldest ones once the retained-chunk
    /// bound is exceeded.
    async fn store(&self, chunks: Vec<Chunk>) -> Result<(), EngineError>;

    /// Exhaustive cosine scan against every stored chunk, optionally
    /// restricted to folders in `folder_filter`, truncated to `top_k`.
    ///
    /// Fails with `DimensionMismatch` if any scanned chunk's embedding
    /// length differs from the query's.
    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        folder_filter: Option<&[String]>,
    ) -> Result<Vec<SearchResult>, EngineError>;

    /// Total number of retained chunks.
    async fn count(&self) -> Result<usize, EngineError>;

    /// Chunk counts overall and per document.
    async fn stats(&self) -> Result<StoreStats, EngineError>;

    /// Remove every chunk of a document; returns how many were dropped.
    async fn remove_document(&self, document_id: &str) -> Result<usize, EngineError>;

    /// Drop all chunks. Used when the embedding model changes and stored
    /// vectors are invalidated.
    async fn clear(&self) -> Result<(), EngineError>;
}
