//! Typed view of the engine configuration.
//!
//! The file on disk is free-form YAML; this is the shape the engine
//! actually consumes. Every section and every field is optional, with
//! defaults taken from the module that owns the behavior.

use serde::{Deserialize, Serialize};

use crate::convert;
use crate::core::errors::EngineError;
use crate::llm::LlmConfig;
use crate::organize::duplicates::DEFAULT_SIMILARITY_THRESHOLD;
use crate::organize::pipeline::DEFAULT_WORKER_LIMIT;
use crate::organize::summary::DEFAULT_CONTENT_BUDGET;
use crate::rag::chunker::{DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use crate::rag::retriever::DEFAULT_TOP_K;
use crate::rag::store::DEFAULT_MAX_CHUNKS;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rag: RagSection,
    pub embedding: EmbeddingSection,
    pub llm: LlmConfig,
    pub organize: OrganizeSection,
    pub convert: ConvertSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSection {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub max_chunks: usize,
    /// Keep chunks in SQLite across restarts instead of in memory.
    pub persistent: bool,
}

impl Default for RagSection {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_OVERLAP,
            top_k: DEFAULT_TOP_K,
            max_chunks: DEFAULT_MAX_CHUNKS,
            persistent: true,
        }
    }
}

/// OpenAI-compatible embedding endpoint, LM Studio by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234".to_string(),
            model: "text-embedding-nomic-embed-text-v1.5".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizeSection {
    pub similarity_threshold: f32,
    pub worker_limit: usize,
    pub summary_content_budget: usize,
}

impl Default for OrganizeSection {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            worker_limit: DEFAULT_WORKER_LIMIT,
            summary_content_budget: DEFAULT_CONTENT_BUDGET,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertSection {
    pub script_path: String,
    /// Explicit interpreter; PATH discovery when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_path: Option<String>,
    pub timeout_secs: u64,
    pub enable_ocr: bool,
    /// Comma-separated language codes handed to the OCR engine.
    pub ocr_languages: String,
}

impl Default for ConvertSection {
    fn default() -> Self {
        Self {
            script_path: "python/convert_document.py".to_string(),
            python_path: None,
            timeout_secs: convert::DEFAULT_TIMEOUT_SECS,
            enable_ocr: false,
            ocr_languages: convert::DEFAULT_OCR_LANGUAGES.to_string(),
        }
    }
}

impl EngineConfig {
    /// Cross-field rules the per-field walker in `validation` cannot see.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.rag.chunk_size == 0 {
            return Err(bad("rag.chunk_size must be at least 1"));
        }
        if self.rag.chunk_overlap >= self.rag.chunk_size {
            return Err(bad("rag.chunk_overlap must be smaller than rag.chunk_size"));
        }
        if self.rag.top_k == 0 {
            return Err(bad("rag.top_k must be at least 1"));
        }
        if self.rag.max_chunks == 0 {
            return Err(bad("rag.max_chunks must be at least 1"));
        }
        if self.embedding.base_url.trim().is_empty() {
            return Err(bad("embedding.base_url cannot be empty"));
        }
        if self.embedding.timeout_secs == 0 {
            return Err(bad("embedding.timeout_secs must be at least 1"));
        }
        if self.llm.model.trim().is_empty() {
            return Err(bad("llm.model cannot be empty"));
        }
        if self.llm.connect_timeout_secs == 0 || self.llm.request_timeout_secs == 0 {
            return Err(bad("llm timeouts must be at least 1 second"));
        }
        if !(0.0..=1.0).contains(&self.organize.similarity_threshold) {
            return Err(bad(
                "organize.similarity_threshold must be between 0.0 and 1.0",
            ));
        }
        if self.organize.worker_limit == 0 {
            return Err(bad("organize.worker_limit must be at least 1"));
        }
        if self.convert.script_path.trim().is_empty() {
            return Err(bad("convert.script_path cannot be empty"));
        }
        if self.convert.timeout_secs == 0 {
            return Err(bad("convert.timeout_secs must be at least 1"));
        }
        Ok(())
    }
}

fn bad(message: &str) -> EngineError {
    EngineError::BadRequest(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;

    #[test]
    fn defaults_are_valid_and_carry_the_module_constants() {
        let config = EngineConfig::default();
        config.validate().expect("defaults should validate");
        assert_eq!(config.rag.chunk_size, 512);
        assert_eq!(config.rag.chunk_overlap, 50);
        assert_eq!(config.rag.top_k, 5);
        assert_eq!(config.rag.max_chunks, 10_000);
        assert!(config.rag.persistent);
        assert_eq!(config.llm.provider, Provider::LmStudio);
        assert!((config.organize.similarity_threshold - 0.85).abs() < f32::EPSILON);
        assert_eq!(config.organize.worker_limit, 2);
        assert_eq!(config.convert.ocr_languages, "en,vi");
    }

    #[test]
    fn partial_yaml_fills_the_rest_from_defaults() {
        let yaml = "rag:\n  chunk_size: 256\nllm:\n  provider: ollama\n  model: qwen2.5:7b\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).expect("parse should work");
        assert_eq!(config.rag.chunk_size, 256);
        assert_eq!(config.rag.chunk_overlap, 50);
        assert_eq!(config.llm.provider, Provider::Ollama);
        assert_eq!(config.embedding.base_url, "http://localhost:1234");
    }

    #[test]
    fn overlap_must_stay_below_chunk_size() {
        let mut config = EngineConfig::default();
        config.rag.chunk_overlap = config.rag.chunk_size;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));
    }

    #[test]
    fn similarity_threshold_is_range_checked() {
        let mut config = EngineConfig::default();
        config.organize.similarity_threshold = 1.2;
        assert!(config.validate().is_err());
        config.organize.similarity_threshold = -0.1;
        assert!(config.validate().is_err());
        config.organize.similarity_threshold = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_worker_limit_is_rejected() {
        let mut config = EngineConfig::default();
        config.organize.worker_limit = 0;
        assert!(config.validate().is_err());
    }
}
