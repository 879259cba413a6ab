//! Records produced by the organization features and persisted through the
//! document-store collaborator.

use serde::{Deserialize, Serialize};

/// How a duplicate pair was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionType {
    /// Byte-identical files (same SHA-256).
    Hash,
    /// Document embeddings above the similarity threshold.
    Content,
    /// Kept for records written by older shells; never produced here.
    Fuzzy,
}

/// Review state of a duplicate record. Anything beyond `Pending` is set by
/// explicit user action in the shell, never by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateStatus {
    Pending,
    Deleted,
    Ignored,
}

/// Review state of a folder suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    Suggested,
    Accepted,
    Rejected,
}

/// Per-document summary, written once and replaced wholesale when the
/// document content changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub file_name: String,
    pub short_summary: String,
    pub full_summary: String,
    pub keywords: Vec<String>,
    pub topics: Vec<String>,
    pub language: String,
}

/// One detected duplicate pair. Emitted exactly once per unordered pair;
/// `original_id` is always the earlier-ingested endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub original_id: String,
    pub duplicate_id: String,
    pub detection_type: DetectionType,
    pub similarity_score: f32,
    pub hash_match: bool,
    pub content_match: bool,
    /// Absolute difference of the two file sizes in bytes.
    pub size_diff: u64,
    pub status: DuplicateStatus,
}

/// One proposed folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderSuggestion {
    pub id: String,
    pub folder_name: String,
    pub description: String,
    pub category: String,
    pub confidence: f32,
    pub document_count: u32,
    pub status: SuggestionStatus,
}

/// A cluster of equivalent documents, anchored by its earliest-ingested
/// member. This grouping, not the pairwise records, is what the shell
/// presents for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub original_id: String,
    pub members: Vec<GroupMember>,
}

/// A non-anchor member of a duplicate group, tagged with the strongest
/// evidence that placed it there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub document_id: String,
    pub detection_type: DetectionType,
    pub similarity_score: f32,
}
