//! Folder suggestions.
//!
//! One prompt covers the whole summary batch and asks the model for a JSON
//! array of folder proposals. Parsing is strict per record: a proposal
//! missing a field or carrying an out-of-range confidence is discarded,
//! never patched up. A failed model call degrades to zero suggestions.

use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use uuid::Uuid;

use crate::organize::summary::Completer;
use crate::organize::types::{DocumentSummary, FolderSuggestion, SuggestionStatus};

const MIN_PROPOSALS: usize = 3;
const MAX_PROPOSALS: usize = 7;

pub struct FolderSuggester {
    completer: Arc<dyn Completer>,
}

impl FolderSuggester {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self { completer }
    }

    /// Proposes folders for the given summaries. Empty input and failed
    /// model calls both yield an empty list.
    pub async fn suggest(&self, summaries: &[DocumentSummary]) -> Vec<FolderSuggestion> {
        if summaries.is_empty() {
            return Vec::new();
        }
        let prompt = suggestion_prompt(summaries);
        let reply = match self.completer.complete(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!("folder suggestion call failed, returning none: {err}");
                return Vec::new();
            }
        };
        parse_suggestions(&reply)
    }
}

fn suggestion_prompt(summaries: &[DocumentSummary]) -> String {
    let mut listing = String::new();
    for summary in summaries {
        listing.push_str("- ");
        listing.push_str(&summary.file_name);
        listing.push_str(": ");
        listing.push_str(&summary.short_summary);
        if !summary.topics.is_empty() {
            listing.push_str(" (Topics: ");
            listing.push_str(&summary.topics.join(", "));
            listing.push(')');
        }
        listing.push('\n');
    }
    format!(
        "You are organizing a document library. Based on the documents below, propose between \
{MIN_PROPOSALS} and {MAX_PROPOSALS} folders that would group them sensibly.\n\
Reply with a JSON array only, one object per folder, using exactly these keys:\n\
[{{\"folder_name\": \"...\", \"description\": \"...\", \"category\": \"...\", \
\"confidence\": 0.0, \"estimated_docs\": 0}}]\n\n\
Documents:\n{listing}"
    )
}

fn json_array_regex() -> &'static Regex {
    static JSON_ARRAY: OnceLock<Regex> = OnceLock::new();
    JSON_ARRAY.get_or_init(|| Regex::new(r"(?s)\[.*\]").expect("json array pattern compiles"))
}

#[derive(Deserialize)]
struct RawProposal {
    folder_name: String,
    description: String,
    category: String,
    confidence: f32,
    estimated_docs: u32,
}

fn parse_suggestions(reply: &str) -> Vec<FolderSuggestion> {
    let Some(block) = json_array_regex().find(reply) else {
        tracing::warn!("folder suggestion reply carried no JSON array");
        return Vec::new();
    };
    let items: Vec<serde_json::Value> = match serde_json::from_str(block.as_str()) {
        Ok(items) => items,
        Err(err) => {
            tracing::warn!("folder suggestion reply not valid JSON: {err}");
            return Vec::new();
        }
    };

    let mut suggestions = Vec::new();
    for item in items {
        let proposal: RawProposal = match serde_json::from_value(item) {
            Ok(proposal) => proposal,
            Err(err) => {
                tracing::debug!("discarding malformed folder proposal: {err}");
                continue;
            }
        };
        if proposal.folder_name.trim().is_empty() {
            tracing::debug!("discarding folder proposal with empty name");
            continue;
        }
        if !(0.0..=1.0).contains(&proposal.confidence) {
            tracing::debug!(
                folder = %proposal.folder_name,
                "discarding folder proposal with confidence {}",
                proposal.confidence
            );
            continue;
        }
        suggestions.push(FolderSuggestion {
            id: Uuid::new_v4().to_string(),
            folder_name: proposal.folder_name,
            description: proposal.description,
            category: proposal.category,
            confidence: proposal.confidence,
            document_count: proposal.estimated_docs,
            status: SuggestionStatus::Suggested,
        });
    }
    suggestions
}
