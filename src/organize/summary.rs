//! Document summarization.
//!
//! Summaries are advisory: the service always produces one. The model path
//! asks for a structured JSON reply; any failure along the way (call,
//! extraction, parse) degrades to a plain extractive summary instead of
//! propagating.

use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::core::errors::EngineError;
use crate::docstore::DocumentRecord;
use crate::llm::{LlmClient, LlmConfig};
use crate::organize::types::DocumentSummary;

/// Character budget for document content inside the summary prompt.
pub const DEFAULT_CONTENT_BUDGET: usize = 8000;

const FALLBACK_SHORT_WORDS: usize = 25;
const FALLBACK_FULL_WORDS: usize = 100;

/// One-shot completion seam, so batch features can run against any backend
/// and against scripted fakes in tests.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, EngineError>;
}

/// Bridges the chat client's non-streaming mode into the [`Completer`]
/// seam with a fixed provider configuration.
pub struct ConfiguredCompleter {
    client: LlmClient,
    config: LlmConfig,
}

impl ConfiguredCompleter {
    pub fn new(client: LlmClient, config: LlmConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Completer for ConfiguredCompleter {
    async fn complete(&self, prompt: &str) -> Result<String, EngineError> {
        self.client.complete(prompt, &self.config).await
    }
}

pub struct SummaryService {
    completer: Arc<dyn Completer>,
    content_budget: usize,
}

impl SummaryService {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self {
            completer,
            content_budget: DEFAULT_CONTENT_BUDGET,
        }
    }

    pub fn with_content_budget(mut self, budget: usize) -> Self {
        self.content_budget = budget.max(1);
        self
    }

    /// Always yields a summary; never propagates model failures.
    pub async fn summarize(&self, document: &DocumentRecord, content: &str) -> DocumentSummary {
        match self.summarize_with_model(document, content).await {
            Ok(summary) => summary,
            Err(err) => {
                tracing::warn!(
                    document = %document.id,
                    "summary degraded to extractive fallback: {err}"
                );
                extractive_summary(document, content)
            }
        }
    }

    async fn summarize_with_model(
        &self,
        document: &DocumentRecord,
        content: &str,
    ) -> Result<DocumentSummary, EngineError> {
        let prompt = summary_prompt(&document.name, content, self.content_budget);
        let reply = self.completer.complete(&prompt).await?;
        parse_summary_reply(document, &reply)
    }
}

fn summary_prompt(file_name: &str, content: &str, budget: usize) -> String {
    let excerpt = truncate_chars(content, budget);
    format!(
        "Analyze the document below and reply with a single JSON object, nothing else, \
using exactly these keys:\n\
{{\"short_summary\": \"...\", \"full_summary\": \"...\", \"keywords\": [], \"topics\": [], \"language\": \"...\"}}\n\n\
- short_summary: 1-2 sentences.\n\
- full_summary: one paragraph.\n\
- keywords: up to 8 specific terms from the document.\n\
- topics: up to 5 broad subject areas.\n\
- language: ISO 639-1 code of the document's language.\n\n\
Document: {file_name}\n---\n{excerpt}"
    )
}

/// Cuts at a character boundary, never mid code point.
fn truncate_chars(text: &str, budget: usize) -> &str {
    match text.char_indices().nth(budget) {
        Some((pos, _)) => &text[..pos],
        None => text,
    }
}

fn json_block_regex() -> &'static Regex {
    static JSON_BLOCK: OnceLock<Regex> = OnceLock::new();
    // Greedy: first `{` to last `}`, so fenced or prose-wrapped replies
    // still yield the object.
    JSON_BLOCK.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("json block pattern compiles"))
}

#[derive(Deserialize)]
struct SummaryReply {
    #[serde(default)]
    short_summary: String,
    #[serde(default)]
    full_summary: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    language: String,
}

fn parse_summary_reply(
    document: &DocumentRecord,
    reply: &str,
) -> Result<DocumentSummary, EngineError> {
    let block = json_block_regex()
        .find(reply)
        .ok_or_else(|| EngineError::Internal("no JSON object in summary reply".to_string()))?;
    let parsed: SummaryReply = serde_json::from_str(block.as_str())
        .map_err(|err| EngineError::Internal(format!("summary reply not valid JSON: {err}")))?;
    Ok(DocumentSummary {
        document_id: document.id.clone(),
        file_name: document.name.clone(),
        short_summary: parsed.short_summary,
        full_summary: parsed.full_summary,
        keywords: parsed.keywords,
        topics: parsed.topics,
        language: parsed.language,
    })
}

fn extractive_summary(document: &DocumentRecord, content: &str) -> DocumentSummary {
    DocumentSummary {
        document_id: document.id.clone(),
        file_name: document.name.clone(),
        short_summary: leading_words(content, FALLBACK_SHORT_WORDS),
        full_summary: leading_words(content, FALLBACK_FULL_WORDS),
        keywords: Vec::new(),
        topics: Vec::new(),
        language: "unknown".to_string(),
    }
}

fn leading_words(text: &str, count: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().take(count).collect();
    let mut extract = words.join(" ");
    if text.split_whitespace().nth(count).is_some() {
        extract.push_str("...");
    }
    extract
}
