//! In-memory VectorStore with FIFO eviction.
//!
//! The chunk list only grows at the back and evicts from the front, which is
//! what makes the append/scan concurrency model safe: readers scan a
//! snapshot behind the lock, the single writer appends atomically.

use std::cmp::Ordering;
use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::errors::EngineError;
use crate::rag::store::{Chunk, SearchResult, StoreStats, VectorStore, DEFAULT_MAX_CHUNKS};
use crate::vector::cosine_similarity;

pub struct MemoryVectorStore {
    chunks: RwLock<VecDeque<Chunk>>,
    max_chunks: usize,
}

impl MemoryVectorStore {
    pub fn new(max_chunks: usize) -> Self {
        Self {
            chunks: RwLock::new(VecDeque::new()),
            max_chunks: max_chunks.max(1),
        }
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNKS)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn store(&self, chunks: Vec<Chunk>) -> Result<(), EngineError> {
        let mut retained = self.chunks.write().await;
        retained.extend(chunks);

        let mut evicted = 0usize;
        while retained.len() > self.max_chunks {
            retained.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!("evicted {} oldest chunks (limit {})", evicted, self.max_chunks);
        }

        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        folder_filter: Option<&[String]>,
    ) -> Result<Vec<SearchResult>, EngineError> {
        let retained = self.chunks.read().await;

        let mut results = Vec::new();
        for chunk in retained.iter() {
            if let Some(folders) = folder_filter {
                match &chunk.folder_id {
                    Some(folder) if folders.contains(folder) => {}
                    _ => continue,
                }
            }
            let score = cosine_similarity(query_embedding, &chunk.embedding)?;
            results.push(SearchResult {
                chunk: chunk.clone(),
                score,
            });
        }

        // sort_by is stable, so equal scores keep insertion order
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        results.truncate(top_k);

        Ok(results)
    }

    async fn count(&self) -> Result<usize, EngineError> {
        Ok(self.chunks.read().await.len())
    }

    async fn stats(&self) -> Result<StoreStats, EngineError> {
        let retained = self.chunks.read().await;
        let mut stats = StoreStats {
            total_chunks: retained.len(),
            ..Default::default()
        };
        for chunk in retained.iter() {
            *stats
                .chunks_per_document
                .entry(chunk.document_id.clone())
                .or_insert(0) += 1;
        }
        stats.total_documents = stats.chunks_per_document.len();
        Ok(stats)
    }

    async fn remove_document(&self, document_id: &str) -> Result<usize, EngineError> {
        let mut retained = self.chunks.write().await;
        let before = retained.len();
        retained.retain(|chunk| chunk.document_id != document_id);
        Ok(before - retained.len())
    }

    async fn clear(&self) -> Result<(), EngineError> {
        self.chunks.write().await.clear();
        Ok(())
    }
}
