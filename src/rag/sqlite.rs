//! SQLite-backed VectorStore implementation.
//!
//! Metadata lives in SQLite, embeddings as little-endian f32 blobs, and
//! search is the same brute-force cosine scan as the in-memory store. Rowid
//! order is insertion order, which drives both FIFO eviction and tie
//! breaking.

use std::cmp::Ordering;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::store::{Chunk, SearchResult, StoreStats, VectorStore, DEFAULT_MAX_CHUNKS};
use crate::core::config::AppPaths;
use crate::core::errors::EngineError;
use crate::vector::cosine_similarity;

pub struct SqliteVectorStore {
    pool: SqlitePool,
    max_chunks: usize,
    #[allow(dead_code)]
    db_path: PathBuf,
}

impl SqliteVectorStore {
    pub async fn new(paths: &AppPaths) -> Result<Self, EngineError> {
        Self::with_path(paths.db_path.clone(), DEFAULT_MAX_CHUNKS).await
    }

    pub async fn with_path(db_path: PathBuf, max_chunks: usize) -> Result<Self, EngineError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            max_chunks: max_chunks.max(1),
            db_path,
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), EngineError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                document_id TEXT NOT NULL,
                document_name TEXT NOT NULL DEFAULT '',
                folder_id TEXT,
                page_number INTEGER,
                metadata TEXT DEFAULT '{}',
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Chunk {
        let metadata_str: String = row.get("metadata");
        let metadata = serde_json::from_str::<Value>(&metadata_str).ok();
        let page_number: Option<i64> = row.get("page_number");

        Chunk {
            id: row.get("chunk_id"),
            text: row.get("content"),
            embedding: Self::deserialize_embedding(row.get("embedding")),
            document_id: row.get("document_id"),
            document_name: row.get("document_name"),
            folder_id: row.get("folder_id"),
            page_number: page_number.map(|p| p as u32),
            metadata,
        }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn store(&self, chunks: Vec<Chunk>) -> Result<(), EngineError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for chunk in &chunks {
            let blob = Self::serialize_embedding(&chunk.embedding);
            let metadata_str = chunk
                .metadata
                .as_ref()
                .map(|m| serde_json::to_string(m).unwrap_or_default())
                .unwrap_or_else(|| "{}".to_string());

            sqlx::query(
                "INSERT OR REPLACE INTO chunks
                    (chunk_id, content, document_id, document_name, folder_id, page_number, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .bind(&chunk.id)
            .bind(&chunk.text)
            .bind(&chunk.document_id)
            .bind(&chunk.document_name)
            .bind(&chunk.folder_id)
            .bind(chunk.page_number.map(|p| p as i64))
            .bind(&metadata_str)
            .bind(&blob)
            .execute(&mut *tx)
            .await?;
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&mut *tx)
            .await?;
        let excess = (count as usize).saturating_sub(self.max_chunks);
        if excess > 0 {
            sqlx::query(
                "DELETE FROM chunks WHERE rowid IN
                    (SELECT rowid FROM chunks ORDER BY rowid ASC LIMIT ?1)",
            )
            .bind(excess as i64)
            .execute(&mut *tx)
            .await?;
            tracing::debug!("evicted {} oldest chunks (limit {})", excess, self.max_chunks);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        folder_filter: Option<&[String]>,
    ) -> Result<Vec<SearchResult>, EngineError> {
        let rows = sqlx::query(
            "SELECT chunk_id, content, document_id, document_name, folder_id, page_number, metadata, embedding
             FROM chunks
             ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::new();
        for row in &rows {
            let chunk = Self::row_to_chunk(row);
            if let Some(folders) = folder_filter {
                match &chunk.folder_id {
                    Some(folder) if folders.contains(folder) => {}
                    _ => continue,
                }
            }
            let score = cosine_similarity(query_embedding, &chunk.embedding)?;
            scored.push(SearchResult { chunk, score });
        }

        // stable sort over rowid order keeps ties deterministic
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored)
    }

    async fn count(&self) -> Result<usize, EngineError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn stats(&self) -> Result<StoreStats, EngineError> {
        let rows = sqlx::query(
            "SELECT document_id, COUNT(*) AS chunk_count FROM chunks GROUP BY document_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = StoreStats::default();
        for row in &rows {
            let document_id: String = row.get("document_id");
            let chunk_count: i64 = row.get("chunk_count");
            stats.total_chunks += chunk_count as usize;
            stats
                .chunks_per_document
                .insert(document_id, chunk_count as usize);
        }
        stats.total_documents = stats.chunks_per_document.len();
        Ok(stats)
    }

    async fn remove_document(&self, document_id: &str) -> Result<usize, EngineError> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn clear(&self) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM chunks").execute(&self.pool).await?;
        Ok(())
    }
}
