//! Citation extraction from generated answers.
//!
//! Citations are advisory UI annotations. Anything that does not resolve
//! cleanly against the context a prompt was built from is dropped, never an
//! error.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::rag::store::SearchResult;

/// Upper bound on the quoted excerpt carried by a citation, in characters.
const SNIPPET_CHARS: usize = 160;

/// Back-reference from answer text to the chunk supporting it. `number` is
/// the 1-based context-block position, not a database id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub number: usize,
    pub source: String,
    pub page: Option<u32>,
    pub text: String,
    pub chunk_id: String,
}

fn marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("marker pattern compiles"))
}

/// Scan `answer` left to right for `[n]` markers and resolve each against
/// the result list the prompt was built from. Repeated numbers collapse to
/// one citation; out-of-range numbers are dropped; output is ascending.
pub fn extract_citations(answer: &str, results: &[SearchResult]) -> Vec<Citation> {
    let mut seen = HashSet::new();
    let mut citations = Vec::new();

    for caps in marker_regex().captures_iter(answer) {
        let Ok(number) = caps[1].parse::<usize>() else {
            continue;
        };
        if number == 0 || number > results.len() {
            continue;
        }
        if !seen.insert(number) {
            continue;
        }

        let result = &results[number - 1];
        citations.push(Citation {
            number,
            source: result.chunk.document_name.clone(),
            page: result.chunk.page_number,
            text: snippet(&result.chunk.text),
            chunk_id: result.chunk.id.clone(),
        });
    }

    citations.sort_by_key(|c| c.number);
    citations
}

fn snippet(text: &str) -> String {
    let mut out: String = text.chars().take(SNIPPET_CHARS).collect();
    if out.len() < text.len() {
        out = format!("{}...", out.trim_end());
    }
    out
}
