//! Query-side retrieval: embed the query once, then scan the store.

use std::sync::Arc;

use crate::core::errors::EngineError;
use crate::embed::EmbeddingProvider;
use crate::rag::store::{SearchResult, VectorStore};

/// Default number of chunks handed to the prompt builder.
pub const DEFAULT_TOP_K: usize = 5;

pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// Rank stored chunks against `query`.
    ///
    /// An unavailable embedding provider (or one that returns no vector)
    /// yields an empty result set, never an error: callers answer without
    /// document context in that case. Store-side failures such as a
    /// dimension mismatch still propagate.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        folder_filter: Option<&[String]>,
    ) -> Result<Vec<SearchResult>, EngineError> {
        let embeddings = match self.embedder.embed(&[query.to_string()]).await {
            Ok(vectors) => vectors,
            Err(err) => {
                tracing::warn!("query embedding unavailable: {}", err);
                return Ok(Vec::new());
            }
        };

        let Some(query_embedding) = embeddings.into_iter().next().filter(|v| !v.is_empty())
        else {
            tracing::warn!("embedding provider returned no vector for the query");
            return Ok(Vec::new());
        };

        self.store
            .search(&query_embedding, top_k, folder_filter)
            .await
    }
}
