//! Engine facade.
//!
//! Owns the wiring between configuration and the working parts: chunk
//! storage, the embedding client, the chat client, the conversion bridge,
//! and the batch organization pipeline. A shell embedding this crate talks
//! to [`Engine`] and to nothing below it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::convert::Converter;
use crate::core::config::{AppPaths, EngineConfig};
use crate::core::errors::EngineError;
use crate::docstore::DocumentStore;
use crate::embed::{EmbeddingProvider, HttpEmbedder};
use crate::llm::{collect_answer, LlmClient, StreamEvent};
use crate::organize::{
    Completer, ConfiguredCompleter, DuplicateDetector, OrganizePipeline, SummaryService,
};
use crate::rag::chunker::chunk_text;
use crate::rag::prompt::build_prompt;
use crate::rag::{
    extract_citations, Chunk, Citation, MemoryVectorStore, Retriever, SearchResult,
    SqliteVectorStore, StoreStats, VectorStore,
};

/// Events for one in-flight answer, in arrival order. The channel closes
/// after the terminator event; dropping the receiver cancels the request.
pub type AnswerStream = mpsc::Receiver<Result<StreamEvent, EngineError>>;

/// Identity of a document being ingested.
#[derive(Debug, Clone)]
pub struct IngestMeta {
    pub document_id: String,
    pub name: String,
    pub folder_id: Option<String>,
}

impl IngestMeta {
    pub fn new(document_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            name: name.into(),
            folder_id: None,
        }
    }

    pub fn with_folder(mut self, folder_id: impl Into<String>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }
}

/// Per-question knobs; unset fields fall back to the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    pub top_k: Option<usize>,
    /// Restrict retrieval to chunks filed under these folders.
    pub folder_filter: Option<Vec<String>>,
}

/// Final answer with resolved citations.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    /// False when the stream ended before its terminator frame.
    pub complete: bool,
    /// How many context chunks backed the prompt.
    pub context_used: usize,
}

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    client: LlmClient,
    script_path: PathBuf,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("client", &self.client)
            .field("script_path", &self.script_path)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Builds an engine from explicit parts. Shells that manage their own
    /// store or embedding backend wire it up here.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let script_path = PathBuf::from(&config.convert.script_path);
        Self {
            store,
            embedder,
            client: LlmClient::new(),
            script_path,
            config,
        }
    }

    /// Builds an engine from validated configuration: a SQLite chunk store
    /// under the data directory when `rag.persistent` is set, the
    /// in-memory store otherwise, and an HTTP embedding client either way.
    pub async fn from_config(config: EngineConfig, paths: &AppPaths) -> Result<Self, EngineError> {
        config.validate()?;

        let embedding = &config.embedding;
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HttpEmbedder::new(
            &embedding.base_url,
            &embedding.model,
            embedding.api_key.clone(),
            embedding.timeout_secs,
        )?);

        let store: Arc<dyn VectorStore> = if config.rag.persistent {
            tracing::info!(path = %paths.db_path.display(), "opening persistent chunk store");
            Arc::new(
                SqliteVectorStore::with_path(paths.db_path.clone(), config.rag.max_chunks).await?,
            )
        } else {
            Arc::new(MemoryVectorStore::new(config.rag.max_chunks))
        };

        let script_path = resolve_script_path(&config.convert.script_path, &paths.project_root);
        Ok(Self {
            store,
            embedder,
            client: LlmClient::new(),
            script_path,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Chunks `text`, embeds the chunks in one batch, and appends them to
    /// the store. Returns how many chunks were stored.
    ///
    /// Chunk ids are `<document id>:<index>`; chunks from an earlier
    /// ingest of the same document are removed first, so re-ingesting is
    /// a replace.
    pub async fn ingest_text(&self, meta: &IngestMeta, text: &str) -> Result<usize, EngineError> {
        let rag = &self.config.rag;
        let chunks = chunk_text(text, rag.chunk_size, rag.chunk_overlap)?;
        if chunks.is_empty() {
            tracing::debug!(document = %meta.document_id, "no chunkable text, nothing stored");
            return Ok(0);
        }

        let embeddings = self.embedder.embed(&chunks).await?;
        if embeddings.len() != chunks.len() {
            return Err(EngineError::ProviderUnavailable(format!(
                "embedding service returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let dropped = self.store.remove_document(&meta.document_id).await?;
        if dropped > 0 {
            tracing::debug!(document = %meta.document_id, dropped, "replacing earlier chunks");
        }

        let stored: Vec<Chunk> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (text, embedding))| Chunk {
                id: format!("{}:{}", meta.document_id, index),
                text,
                embedding,
                document_id: meta.document_id.clone(),
                document_name: meta.name.clone(),
                folder_id: meta.folder_id.clone(),
                page_number: None,
                metadata: None,
            })
            .collect();
        let count = stored.len();
        self.store.store(stored).await?;
        tracing::info!(document = %meta.document_id, chunks = count, "document indexed");
        Ok(count)
    }

    /// Ingests a file from disk. Plain-text formats are read directly;
    /// everything else goes through the conversion bridge, with extracted
    /// tables contributing additional markdown.
    pub async fn ingest_file(&self, meta: &IngestMeta, path: &Path) -> Result<usize, EngineError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let text = match extension.as_deref() {
            Some("txt") | Some("md") | Some("markdown") => {
                tokio::fs::read_to_string(path).await.map_err(|err| {
                    EngineError::Storage(format!("cannot read {}: {err}", path.display()))
                })?
            }
            _ => self.converter()?.convert(path).await?.document_text(),
        };
        self.ingest_text(meta, &text).await
    }

    /// Retrieves context for `question` and opens a streaming answer.
    ///
    /// Returns the ranked context alongside the event channel, so a caller
    /// can render sources while tokens arrive. An unreachable embedding
    /// service degrades to an empty context; the model is still asked,
    /// with a prompt that says no material was found.
    pub async fn ask(
        &self,
        question: &str,
        options: &AskOptions,
    ) -> Result<(Vec<SearchResult>, AnswerStream), EngineError> {
        let top_k = options.top_k.unwrap_or(self.config.rag.top_k);
        let retriever = Retriever::new(Arc::clone(&self.store), Arc::clone(&self.embedder));
        let results = retriever
            .retrieve(question, top_k, options.folder_filter.as_deref())
            .await?;

        let prompt = build_prompt(question, &results);
        tracing::debug!(context = results.len(), top_k, "dispatching question");
        let stream = self.client.stream(&prompt, &self.config.llm).await?;
        Ok((results, stream))
    }

    /// [`ask`](Self::ask) drained to completion, with citation markers
    /// resolved against the retrieved context.
    pub async fn ask_collect(
        &self,
        question: &str,
        options: &AskOptions,
    ) -> Result<Answer, EngineError> {
        let (results, stream) = self.ask(question, options).await?;
        let collected = collect_answer(stream).await?;
        let citations = extract_citations(&collected.text, &results);
        Ok(Answer {
            text: collected.text,
            citations,
            complete: collected.complete,
            context_used: results.len(),
        })
    }

    /// Drops every chunk of a document; returns how many were removed.
    pub async fn remove_document(&self, document_id: &str) -> Result<usize, EngineError> {
        let dropped = self.store.remove_document(document_id).await?;
        tracing::info!(document = %document_id, dropped, "document removed from index");
        Ok(dropped)
    }

    pub async fn stats(&self) -> Result<StoreStats, EngineError> {
        self.store.stats().await
    }

    /// Drops all chunks. Run this when the embedding model changes, since
    /// stored vectors are not comparable across models.
    pub async fn clear_index(&self) -> Result<(), EngineError> {
        self.store.clear().await?;
        tracing::info!("chunk store cleared");
        Ok(())
    }

    /// Conversion bridge configured for this engine.
    pub fn converter(&self) -> Result<Converter, EngineError> {
        let section = &self.config.convert;
        let python = section.python_path.clone().map(PathBuf::from);
        Ok(Converter::new(self.script_path.clone(), python)?
            .with_timeout(Duration::from_secs(section.timeout_secs))
            .with_ocr(section.enable_ocr, &section.ocr_languages))
    }

    /// Batch organization pipeline bound to an external document store.
    pub fn organizer(
        &self,
        documents: Arc<dyn DocumentStore>,
    ) -> Result<OrganizePipeline, EngineError> {
        let section = &self.config.organize;
        let completer: Arc<dyn Completer> =
            Arc::new(ConfiguredCompleter::new(self.client, self.config.llm.clone()));
        let summaries = SummaryService::new(Arc::clone(&completer))
            .with_content_budget(section.summary_content_budget);
        let detector = DuplicateDetector::with_threshold(section.similarity_threshold)?;

        Ok(
            OrganizePipeline::new(documents, Arc::clone(&self.embedder), completer)
                .with_worker_limit(section.worker_limit)
                .with_detector(detector)
                .with_summary_service(summaries),
        )
    }
}

fn resolve_script_path(configured: &str, project_root: &Path) -> PathBuf {
    let path = PathBuf::from(configured);
    if path.is_absolute() {
        path
    } else {
        project_root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::routing::post;
    use axum::Router;

    use super::*;
    use crate::docstore::MemoryDocumentStore;
    use crate::organize::BatchReport;

    /// Deterministic word-count embedder, same scheme as the retriever
    /// tests: shared vocabulary means high cosine similarity.
    struct BucketEmbedder {
        calls: AtomicUsize,
    }

    impl BucketEmbedder {
        fn shared() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    fn bucket_embed(text: &str) -> Vec<f32> {
        let mut buckets = vec![0.0f32; 64];
        for word in text.to_lowercase().split_whitespace() {
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in word.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            buckets[(hash % 64) as usize] += 1.0;
        }
        buckets
    }

    #[async_trait]
    impl EmbeddingProvider for BucketEmbedder {
        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(inputs.iter().map(|text| bucket_embed(text)).collect())
        }
    }

    fn engine_with(config: EngineConfig, embedder: Arc<dyn EmbeddingProvider>) -> Engine {
        Engine::new(config, Arc::new(MemoryVectorStore::default()), embedder)
    }

    #[tokio::test]
    async fn ingest_text_numbers_chunks_per_document() {
        let mut config = EngineConfig::default();
        config.rag.chunk_size = 4;
        config.rag.chunk_overlap = 1;
        let engine = engine_with(config, BucketEmbedder::shared());

        let meta = IngestMeta::new("doc-9", "phap-lenh.txt").with_folder("legal");
        let text = "một hai ba bốn năm sáu bảy tám chín mười";
        let count = engine
            .ingest_text(&meta, text)
            .await
            .expect("ingest should work");
        assert_eq!(count, 4);

        let stats = engine.stats().await.expect("stats should work");
        assert_eq!(stats.total_chunks, 4);
        assert_eq!(stats.chunks_per_document.get("doc-9"), Some(&4));

        let filter = vec!["legal".to_string()];
        let results = engine
            .store
            .search(&bucket_embed("một hai ba bốn"), 10, Some(&filter))
            .await
            .expect("search should work");
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].chunk.id, "doc-9:0");
        assert_eq!(results[0].chunk.document_name, "phap-lenh.txt");
        assert_eq!(results[0].chunk.folder_id.as_deref(), Some("legal"));
    }

    #[tokio::test]
    async fn reingesting_a_document_replaces_its_chunks() {
        let mut config = EngineConfig::default();
        config.rag.chunk_size = 4;
        config.rag.chunk_overlap = 0;
        let engine = engine_with(config, BucketEmbedder::shared());

        let meta = IngestMeta::new("doc-1", "notes.txt");
        engine
            .ingest_text(&meta, "one two three four five six")
            .await
            .expect("first ingest should work");
        let count = engine
            .ingest_text(&meta, "seven eight")
            .await
            .expect("second ingest should work");

        assert_eq!(count, 1);
        let stats = engine.stats().await.expect("stats should work");
        assert_eq!(stats.total_chunks, 1);
    }

    #[tokio::test]
    async fn blank_text_stores_nothing_and_skips_the_embedder() {
        let embedder = BucketEmbedder::shared();
        let engine = engine_with(
            EngineConfig::default(),
            Arc::clone(&embedder) as Arc<dyn EmbeddingProvider>,
        );

        let meta = IngestMeta::new("doc-2", "empty.txt");
        let count = engine
            .ingest_text(&meta, "  \n\t  ")
            .await
            .expect("ingest should work");

        assert_eq!(count, 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        let stats = engine.stats().await.expect("stats should work");
        assert_eq!(stats.total_chunks, 0);
    }

    #[tokio::test]
    async fn markdown_files_are_read_without_the_converter() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = dir.path().join("huong-dan.md");
        tokio::fs::write(&path, "# Hướng dẫn\n\nnội dung chính của tài liệu")
            .await
            .expect("file should write");

        let engine = engine_with(EngineConfig::default(), BucketEmbedder::shared());
        let meta = IngestMeta::new("doc-3", "huong-dan.md");
        let count = engine
            .ingest_file(&meta, &path)
            .await
            .expect("ingest should work");
        assert_eq!(count, 1);
    }

    const ANSWER_BODY: &str = r#"data: {"choices":[{"delta":{"content":"Dựa trên "}}]}

data: {"choices":[{"delta":{"content":"[1], cần khảo sát địa chất."}}]}

data: [DONE]

"#;

    async fn spawn_llm_stub() -> String {
        let app = Router::new().route("/v1/chat/completions", post(|| async { ANSWER_BODY }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("stub listener should bind");
        let addr = listener.local_addr().expect("stub addr should resolve");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("stub server should run");
        });
        format!("http://{addr}/v1/chat/completions")
    }

    #[tokio::test]
    async fn ask_collect_streams_an_answer_and_resolves_citations() {
        let mut config = EngineConfig::default();
        config.llm.endpoint = Some(spawn_llm_stub().await);
        let engine = engine_with(config, BucketEmbedder::shared());

        let meta = IngestMeta::new("doc-4", "tieu-chuan-mong-coc.pdf");
        engine
            .ingest_text(
                &meta,
                "tiêu chuẩn xây dựng móng cọc bê tông yêu cầu khảo sát địa chất",
            )
            .await
            .expect("ingest should work");

        let answer = engine
            .ask_collect("móng cọc bê tông cần gì?", &AskOptions::default())
            .await
            .expect("ask should work");

        assert_eq!(answer.text, "Dựa trên [1], cần khảo sát địa chất.");
        assert!(answer.complete);
        assert_eq!(answer.context_used, 1);
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].number, 1);
        assert_eq!(answer.citations[0].source, "tieu-chuan-mong-coc.pdf");
        assert_eq!(answer.citations[0].chunk_id, "doc-4:0");
    }

    #[tokio::test]
    async fn questions_without_context_still_get_an_answer() {
        let mut config = EngineConfig::default();
        config.llm.endpoint = Some(spawn_llm_stub().await);
        let engine = engine_with(config, BucketEmbedder::shared());

        let (results, stream) = engine
            .ask("có tài liệu nào không?", &AskOptions::default())
            .await
            .expect("ask should work");
        assert!(results.is_empty());

        let collected = collect_answer(stream).await.expect("stream should drain");
        assert!(collected.complete);
        assert!(!collected.text.is_empty());
    }

    fn temp_paths(dir: &tempfile::TempDir) -> AppPaths {
        AppPaths {
            project_root: dir.path().to_path_buf(),
            user_data_dir: dir.path().to_path_buf(),
            log_dir: dir.path().join("logs"),
            db_path: dir.path().join("chunks.db"),
        }
    }

    #[tokio::test]
    async fn from_config_picks_the_store_backend() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let paths = temp_paths(&dir);

        let mut config = EngineConfig::default();
        config.rag.persistent = false;
        let engine = Engine::from_config(config, &paths)
            .await
            .expect("engine should build");
        let stats = engine.stats().await.expect("stats should work");
        assert_eq!(stats.total_chunks, 0);
        assert!(!paths.db_path.exists());

        let mut config = EngineConfig::default();
        config.rag.persistent = true;
        let engine = Engine::from_config(config, &paths)
            .await
            .expect("engine should build");
        let stats = engine.stats().await.expect("stats should work");
        assert_eq!(stats.total_chunks, 0);
        assert!(paths.db_path.exists());
    }

    #[tokio::test]
    async fn from_config_rejects_invalid_settings() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let paths = temp_paths(&dir);

        let mut config = EngineConfig::default();
        config.rag.chunk_overlap = config.rag.chunk_size;
        let err = Engine::from_config(config, &paths).await.unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));
    }

    #[tokio::test]
    async fn organizer_runs_an_empty_batch() {
        let mut config = EngineConfig::default();
        config.organize.similarity_threshold = 0.9;
        let engine = engine_with(config, BucketEmbedder::shared());

        let organizer = engine
            .organizer(Arc::new(MemoryDocumentStore::new()))
            .expect("organizer should build");
        let report = organizer
            .summarize_all(&AtomicBool::new(false))
            .await
            .expect("empty batch should run");
        assert_eq!(report, BatchReport::default());
    }
}
