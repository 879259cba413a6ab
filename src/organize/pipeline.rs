//! Batch runner for the organization features.
//!
//! Runs summarization, duplicate scans and folder suggestions over the
//! whole catalogue. Every run honors a cancellation flag between
//! documents, skips work that already has a stored result, and reports
//! what it processed, skipped and failed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::core::errors::EngineError;
use crate::docstore::{DocumentRecord, DocumentStore};
use crate::embed::EmbeddingProvider;
use crate::organize::duplicates::{DocumentInput, DuplicateDetector, DuplicateScan};
use crate::organize::folders::FolderSuggester;
use crate::organize::summary::{Completer, SummaryService};
use crate::organize::types::FolderSuggestion;
use crate::rag::chunker::{chunk_text, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use crate::vector::mean_pool;

pub const DEFAULT_WORKER_LIMIT: usize = 2;

/// What one batch run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Result of one duplicate scan: the detection output plus the hashing
/// bookkeeping that produced it.
#[derive(Debug, Clone, Default)]
pub struct DuplicateScanOutcome {
    pub scan: DuplicateScan,
    pub report: BatchReport,
}

pub struct OrganizePipeline {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    summaries: Arc<SummaryService>,
    suggester: FolderSuggester,
    detector: DuplicateDetector,
    worker_limit: usize,
}

impl OrganizePipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn Completer>,
    ) -> Self {
        Self {
            summaries: Arc::new(SummaryService::new(Arc::clone(&completer))),
            suggester: FolderSuggester::new(completer),
            detector: DuplicateDetector::new(),
            store,
            embedder,
            worker_limit: DEFAULT_WORKER_LIMIT,
        }
    }

    pub fn with_worker_limit(mut self, limit: usize) -> Self {
        self.worker_limit = limit.max(1);
        self
    }

    pub fn with_detector(mut self, detector: DuplicateDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_summary_service(mut self, service: SummaryService) -> Self {
        self.summaries = Arc::new(service);
        self
    }

    /// Summarizes every document that does not have a summary yet, up to
    /// `worker_limit` documents concurrently.
    pub async fn summarize_all(&self, cancel: &AtomicBool) -> Result<BatchReport, EngineError> {
        let documents = self.store.list_documents(None).await?;
        let mut report = BatchReport::default();
        let semaphore = Arc::new(Semaphore::new(self.worker_limit));
        let mut handles = Vec::new();

        for document in documents {
            if cancel.load(Ordering::Relaxed) {
                tracing::info!("summary batch cancelled");
                report.cancelled = true;
                break;
            }
            if self.store.get_summary(&document.id).await?.is_some() {
                report.skipped += 1;
                continue;
            }
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(EngineError::internal)?;
            let store = Arc::clone(&self.store);
            let service = Arc::clone(&self.summaries);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let outcome: Result<(), EngineError> = async {
                    let content = store.get_document(&document.id).await?;
                    let summary = service.summarize(&document, &content.text).await;
                    store.save_summary(summary).await
                }
                .await;
                if let Err(err) = &outcome {
                    tracing::warn!(document = %document.id, "summarization failed: {err}");
                }
                outcome.is_ok()
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(true) => report.processed += 1,
                Ok(false) => report.failed += 1,
                Err(err) => {
                    tracing::warn!("summary worker crashed: {err}");
                    report.failed += 1;
                }
            }
        }
        tracing::info!(
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            "summary batch finished"
        );
        Ok(report)
    }

    /// Hashes what needs hashing, runs detection, and persists the pair
    /// records.
    ///
    /// Hashing runs sequentially to bound file I/O. Hashes persisted
    /// before a cancellation are kept, so a re-run resumes where this one
    /// stopped instead of re-reading every file.
    pub async fn scan_duplicates(
        &self,
        cancel: &AtomicBool,
    ) -> Result<DuplicateScanOutcome, EngineError> {
        let documents = self.store.list_documents(None).await?;
        let mut report = BatchReport::default();
        let mut inputs = Vec::with_capacity(documents.len());

        for mut document in documents {
            if cancel.load(Ordering::Relaxed) {
                tracing::info!("duplicate scan cancelled");
                report.cancelled = true;
                return Ok(DuplicateScanOutcome {
                    scan: DuplicateScan::default(),
                    report,
                });
            }
            if document.file_hash.is_some() {
                report.skipped += 1;
            } else if let Some(path) = document.path.clone() {
                match DuplicateDetector::hash_file(&path).await {
                    Ok(hash) => {
                        if let Err(err) = self.store.update_file_hash(&document.id, &hash).await {
                            tracing::warn!(
                                document = %document.id,
                                "could not persist file hash: {err}"
                            );
                        }
                        document.file_hash = Some(hash);
                        report.processed += 1;
                    }
                    Err(err) => {
                        tracing::warn!(
                            document = %document.id,
                            "hashing failed, file skipped: {err}"
                        );
                        report.failed += 1;
                    }
                }
            }
            let embedding = self.document_embedding(&document).await;
            inputs.push(DocumentInput {
                record: document,
                embedding,
            });
        }

        let scan = self.detector.detect(&inputs);
        for record in &scan.records {
            self.store.save_duplicate_record(record.clone()).await?;
        }
        tracing::info!(
            groups = scan.groups.len(),
            records = scan.records.len(),
            "duplicate scan finished"
        );
        Ok(DuplicateScanOutcome { scan, report })
    }

    /// Proposes folders from every stored summary and persists the
    /// accepted-for-review suggestions.
    pub async fn suggest_folders(&self) -> Result<Vec<FolderSuggestion>, EngineError> {
        let documents = self.store.list_documents(None).await?;
        let mut summaries = Vec::new();
        for document in &documents {
            if let Some(summary) = self.store.get_summary(&document.id).await? {
                summaries.push(summary);
            }
        }
        let suggestions = self.suggester.suggest(&summaries).await;
        for suggestion in &suggestions {
            self.store.save_folder_suggestion(suggestion.clone()).await?;
        }
        if !suggestions.is_empty() {
            tracing::info!("saved {} folder suggestions", suggestions.len());
        }
        Ok(suggestions)
    }

    /// Best-effort document embedding for the content tier: the stored one
    /// when present, otherwise mean-pooled chunk embeddings. `None` keeps
    /// the document in the hash tier only.
    async fn document_embedding(&self, document: &DocumentRecord) -> Option<Vec<f32>> {
        let content = match self.store.get_document(&document.id).await {
            Ok(content) => content,
            Err(err) => {
                tracing::debug!(document = %document.id, "content unavailable: {err}");
                return None;
            }
        };
        if let Some(embedding) = content.embedding {
            return Some(embedding);
        }
        if content.text.trim().is_empty() {
            return None;
        }
        let chunks = match chunk_text(&content.text, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP) {
            Ok(chunks) if !chunks.is_empty() => chunks,
            _ => return None,
        };
        match self.embedder.embed(&chunks).await {
            Ok(vectors) if !vectors.is_empty() => match mean_pool(&vectors) {
                Ok(pooled) => Some(pooled),
                Err(err) => {
                    tracing::warn!(document = %document.id, "mean pooling failed: {err}");
                    None
                }
            },
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(document = %document.id, "document embedding failed: {err}");
                None
            }
        }
    }
}
