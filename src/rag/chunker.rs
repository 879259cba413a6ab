//! Word-window chunking for document ingestion.
//!
//! Splitting is pure and deterministic: the same text, window size and
//! overlap always produce the same chunk boundaries, which keeps re-chunking
//! idempotent and testable.

use crate::core::errors::EngineError;

/// Default window size in words.
pub const DEFAULT_CHUNK_SIZE: usize = 512;
/// Default overlap between consecutive windows, in words.
pub const DEFAULT_OVERLAP: usize = 50;

/// Split `text` into overlapping word windows.
///
/// Windows advance by `chunk_size - overlap` words. Requires
/// `0 <= overlap < chunk_size`; whitespace-only windows are dropped.
pub fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<String>, EngineError> {
    if chunk_size == 0 {
        return Err(EngineError::BadRequest(
            "chunk_size must be at least 1 word".to_string(),
        ));
    }
    if overlap >= chunk_size {
        return Err(EngineError::BadRequest(format!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Ok(Vec::new());
    }

    let step = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        let window = words[start..end].join(" ");
        if !window.trim().is_empty() {
            chunks.push(window);
        }
        start += step;
    }

    Ok(chunks)
}
