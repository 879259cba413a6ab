//! Document-store collaborator.
//!
//! The document catalogue itself (files, folders, review state) lives in
//! the desktop shell's own database. The engine reaches it through
//! [`DocumentStore`] and only ever appends analysis results to it. The
//! in-memory implementation backs tests and lets the engine run before a
//! real store is wired up.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::errors::EngineError;
use crate::organize::types::{DocumentSummary, DuplicateRecord, FolderSuggestion};

/// One document as the external metadata store sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub size: u64,
    pub date_added: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    /// SHA-256 of the raw bytes, once computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
}

/// Document content handed to summarization and similarity checks.
#[derive(Debug, Clone, Default)]
pub struct DocumentContent {
    pub text: String,
    /// Document-level embedding when the store already has one.
    pub embedding: Option<Vec<f32>>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, id: &str) -> Result<DocumentContent, EngineError>;

    /// Lists documents, optionally restricted to one folder, ordered by
    /// ingestion time (oldest first).
    async fn list_documents(
        &self,
        folder_id: Option<&str>,
    ) -> Result<Vec<DocumentRecord>, EngineError>;

    /// Replaces any existing summary for the same document.
    async fn save_summary(&self, summary: DocumentSummary) -> Result<(), EngineError>;

    async fn get_summary(&self, document_id: &str)
        -> Result<Option<DocumentSummary>, EngineError>;

    /// Upserts by unordered document pair, so re-running a scan never
    /// stores the same pair twice.
    async fn save_duplicate_record(&self, record: DuplicateRecord) -> Result<(), EngineError>;

    async fn save_folder_suggestion(
        &self,
        suggestion: FolderSuggestion,
    ) -> Result<(), EngineError>;

    /// Records the computed file hash so later scans can skip re-hashing.
    async fn update_file_hash(&self, document_id: &str, hash: &str) -> Result<(), EngineError>;
}

#[derive(Default)]
struct MemoryInner {
    records: Vec<DocumentRecord>,
    contents: HashMap<String, DocumentContent>,
    summaries: HashMap<String, DocumentSummary>,
    duplicates: Vec<DuplicateRecord>,
    suggestions: Vec<FolderSuggestion>,
}

/// In-memory [`DocumentStore`].
#[derive(Default)]
pub struct MemoryDocumentStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_document(&self, record: DocumentRecord, content: DocumentContent) {
        let mut inner = self.inner.write().await;
        inner.records.retain(|existing| existing.id != record.id);
        inner.contents.insert(record.id.clone(), content);
        inner.records.push(record);
    }

    pub async fn duplicate_records(&self) -> Vec<DuplicateRecord> {
        self.inner.read().await.duplicates.clone()
    }

    pub async fn folder_suggestions(&self) -> Vec<FolderSuggestion> {
        self.inner.read().await.suggestions.clone()
    }

    pub async fn summary_count(&self) -> usize {
        self.inner.read().await.summaries.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_document(&self, id: &str) -> Result<DocumentContent, EngineError> {
        self.inner
            .read()
            .await
            .contents
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::Storage(format!("unknown document: {id}")))
    }

    async fn list_documents(
        &self,
        folder_id: Option<&str>,
    ) -> Result<Vec<DocumentRecord>, EngineError> {
        let inner = self.inner.read().await;
        let mut records: Vec<DocumentRecord> = inner
            .records
            .iter()
            .filter(|record| match folder_id {
                Some(folder) => record.folder_id.as_deref() == Some(folder),
                None => true,
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| a.date_added.cmp(&b.date_added).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn save_summary(&self, summary: DocumentSummary) -> Result<(), EngineError> {
        self.inner
            .write()
            .await
            .summaries
            .insert(summary.document_id.clone(), summary);
        Ok(())
    }

    async fn get_summary(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentSummary>, EngineError> {
        Ok(self.inner.read().await.summaries.get(document_id).cloned())
    }

    async fn save_duplicate_record(&self, record: DuplicateRecord) -> Result<(), EngineError> {
        let mut inner = self.inner.write().await;
        let same_pair = |existing: &DuplicateRecord| {
            (existing.original_id == record.original_id
                && existing.duplicate_id == record.duplicate_id)
                || (existing.original_id == record.duplicate_id
                    && existing.duplicate_id == record.original_id)
        };
        match inner.duplicates.iter_mut().find(|existing| same_pair(existing)) {
            Some(existing) => *existing = record,
            None => inner.duplicates.push(record),
        }
        Ok(())
    }

    async fn save_folder_suggestion(
        &self,
        suggestion: FolderSuggestion,
    ) -> Result<(), EngineError> {
        self.inner.write().await.suggestions.push(suggestion);
        Ok(())
    }

    async fn update_file_hash(&self, document_id: &str, hash: &str) -> Result<(), EngineError> {
        let mut inner = self.inner.write().await;
        match inner
            .records
            .iter_mut()
            .find(|record| record.id == document_id)
        {
            Some(record) => {
                record.file_hash = Some(hash.to_string());
                Ok(())
            }
            None => Err(EngineError::Storage(format!(
                "unknown document: {document_id}"
            ))),
        }
    }
}
