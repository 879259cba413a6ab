//! Duplicate detection.
//!
//! Two tiers run over one document set: byte-identical files share a
//! SHA-256, and near-duplicates score above a cosine threshold on their
//! document embeddings. Pairs merge transitively into clusters anchored by
//! the earliest-ingested member. Trouble with one document (unreadable
//! file, mismatched embedding) is logged and skipped; a scan never aborts
//! over a single bad input.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use petgraph::unionfind::UnionFind;
use sha2::{Digest, Sha256};

use crate::core::errors::EngineError;
use crate::docstore::DocumentRecord;
use crate::organize::types::{
    DetectionType, DuplicateGroup, DuplicateRecord, DuplicateStatus, GroupMember,
};
use crate::vector::cosine_similarity;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.85;

/// One document prepared for detection: its record (with any known hash)
/// plus an optional document-level embedding for the content tier.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub record: DocumentRecord,
    pub embedding: Option<Vec<f32>>,
}

/// Everything one detection run produced.
#[derive(Debug, Clone, Default)]
pub struct DuplicateScan {
    pub groups: Vec<DuplicateGroup>,
    pub records: Vec<DuplicateRecord>,
}

pub struct DuplicateDetector {
    threshold: f32,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DuplicateDetector {
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }

    pub fn with_threshold(threshold: f32) -> Result<Self, EngineError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(EngineError::BadRequest(format!(
                "similarity threshold must be within [0, 1], got {threshold}"
            )));
        }
        Ok(Self { threshold })
    }

    /// SHA-256 of a file's raw bytes as lowercase hex.
    pub async fn hash_file(path: &Path) -> Result<String, EngineError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| EngineError::Storage(format!("cannot read {}: {err}", path.display())))?;
        Ok(Self::hash_bytes(&bytes))
    }

    pub fn hash_bytes(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Runs both tiers and merges the evidence into clusters.
    pub fn detect(&self, documents: &[DocumentInput]) -> DuplicateScan {
        let count = documents.len();
        if count < 2 {
            return DuplicateScan::default();
        }
        let mut components: UnionFind<usize> = UnionFind::new(count);
        // Evidence keyed by (low, high) index; the BTreeMap keeps record
        // output deterministic for a given input order.
        let mut pairs: BTreeMap<(usize, usize), (DetectionType, f32)> = BTreeMap::new();

        // Hash tier: group by hash value, then pair the anchor with every
        // other member instead of emitting the quadratic pair set.
        let mut by_hash: HashMap<&str, Vec<usize>> = HashMap::new();
        for (index, doc) in documents.iter().enumerate() {
            if let Some(hash) = doc.record.file_hash.as_deref() {
                by_hash.entry(hash).or_default().push(index);
            }
        }
        for mut members in by_hash.into_values() {
            if members.len() < 2 {
                continue;
            }
            members.sort_by(|&a, &b| ingest_order(&documents[a].record, &documents[b].record));
            let anchor = members[0];
            for &member in &members[1..] {
                components.union(anchor, member);
                pairs.insert(ordered(anchor, member), (DetectionType::Hash, 1.0));
            }
        }

        // Content tier: pairwise over available embeddings, skipping any
        // pair the hash tier already established.
        for i in 0..count {
            let Some(a) = documents[i].embedding.as_deref() else {
                continue;
            };
            for j in (i + 1)..count {
                let Some(b) = documents[j].embedding.as_deref() else {
                    continue;
                };
                if same_hash(&documents[i].record, &documents[j].record) {
                    continue;
                }
                let score = match cosine_similarity(a, b) {
                    Ok(score) => score,
                    Err(err) => {
                        tracing::warn!(
                            left = %documents[i].record.id,
                            right = %documents[j].record.id,
                            "similarity check skipped: {err}"
                        );
                        continue;
                    }
                };
                if score >= self.threshold {
                    components.union(i, j);
                    pairs.insert(ordered(i, j), (DetectionType::Content, score));
                }
            }
        }

        assemble(documents, &components, pairs)
    }
}

fn assemble(
    documents: &[DocumentInput],
    components: &UnionFind<usize>,
    pairs: BTreeMap<(usize, usize), (DetectionType, f32)>,
) -> DuplicateScan {
    // Strongest evidence per document, for the group listing.
    let mut best: HashMap<usize, (DetectionType, f32)> = HashMap::new();
    for (&(i, j), &evidence) in &pairs {
        for index in [i, j] {
            let entry = best.entry(index).or_insert(evidence);
            if stronger(evidence, *entry) {
                *entry = evidence;
            }
        }
    }

    let mut clusters: HashMap<usize, Vec<usize>> = HashMap::new();
    for index in 0..documents.len() {
        clusters.entry(components.find(index)).or_default().push(index);
    }

    let mut anchored: Vec<(usize, DuplicateGroup)> = Vec::new();
    for mut members in clusters.into_values() {
        if members.len() < 2 {
            continue;
        }
        members.sort_by(|&a, &b| ingest_order(&documents[a].record, &documents[b].record));
        let anchor = members[0];
        let group_members = members[1..]
            .iter()
            .map(|&member| {
                let (detection_type, similarity_score) = best
                    .get(&member)
                    .copied()
                    .unwrap_or((DetectionType::Content, 0.0));
                GroupMember {
                    document_id: documents[member].record.id.clone(),
                    detection_type,
                    similarity_score,
                }
            })
            .collect();
        anchored.push((
            anchor,
            DuplicateGroup {
                original_id: documents[anchor].record.id.clone(),
                members: group_members,
            },
        ));
    }
    anchored.sort_by(|a, b| ingest_order(&documents[a.0].record, &documents[b.0].record));
    let groups = anchored.into_iter().map(|(_, group)| group).collect();

    let records = pairs
        .into_iter()
        .map(|((i, j), (detection_type, similarity_score))| {
            let (a, b) = (&documents[i].record, &documents[j].record);
            let (original, duplicate) = match ingest_order(a, b) {
                Ordering::Greater => (b, a),
                _ => (a, b),
            };
            DuplicateRecord {
                original_id: original.id.clone(),
                duplicate_id: duplicate.id.clone(),
                detection_type,
                similarity_score,
                hash_match: detection_type == DetectionType::Hash,
                content_match: detection_type == DetectionType::Content,
                size_diff: a.size.abs_diff(b.size),
                status: DuplicateStatus::Pending,
            }
        })
        .collect();

    DuplicateScan { groups, records }
}

/// Earliest ingestion wins; document id breaks exact timestamp ties.
fn ingest_order(a: &DocumentRecord, b: &DocumentRecord) -> Ordering {
    a.date_added
        .cmp(&b.date_added)
        .then_with(|| a.id.cmp(&b.id))
}

fn ordered(a: usize, b: usize) -> (usize, usize) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn same_hash(a: &DocumentRecord, b: &DocumentRecord) -> bool {
    matches!((&a.file_hash, &b.file_hash), (Some(left), Some(right)) if left == right)
}

fn rank(detection: DetectionType) -> u8 {
    match detection {
        DetectionType::Hash => 2,
        DetectionType::Content => 1,
        DetectionType::Fuzzy => 0,
    }
}

fn stronger(candidate: (DetectionType, f32), current: (DetectionType, f32)) -> bool {
    (rank(candidate.0), candidate.1) > (rank(current.0), current.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(id: &str, day: u32, size: u64, hash: Option<&str>) -> DocumentRecord {
        DocumentRecord {
            id: id.to_string(),
            name: format!("{id}.pdf"),
            path: None,
            size,
            date_added: Utc.with_ymd_and_hms(2024, 3, day, 8, 0, 0).unwrap(),
            folder_id: None,
            file_hash: hash.map(str::to_string),
        }
    }

    fn input(record: DocumentRecord, embedding: Option<Vec<f32>>) -> DocumentInput {
        DocumentInput { record, embedding }
    }

    #[test]
    fn identical_hashes_form_one_group_with_one_record() {
        let detector = DuplicateDetector::new();
        let docs = vec![
            input(record("late", 5, 100, Some("aa")), None),
            input(record("early", 1, 120, Some("aa")), None),
        ];
        let scan = detector.detect(&docs);

        assert_eq!(scan.groups.len(), 1);
        assert_eq!(scan.groups[0].original_id, "early");
        assert_eq!(scan.groups[0].members.len(), 1);
        assert_eq!(scan.groups[0].members[0].document_id, "late");
        assert_eq!(
            scan.groups[0].members[0].detection_type,
            DetectionType::Hash
        );

        assert_eq!(scan.records.len(), 1);
        let found = &scan.records[0];
        assert_eq!(found.original_id, "early");
        assert_eq!(found.duplicate_id, "late");
        assert!((found.similarity_score - 1.0).abs() < f32::EPSILON);
        assert!(found.hash_match);
        assert!(!found.content_match);
        assert_eq!(found.size_diff, 20);
        assert_eq!(found.status, DuplicateStatus::Pending);
    }

    #[test]
    fn earliest_ingested_wins_as_original_regardless_of_input_order() {
        let detector = DuplicateDetector::new();
        let forward = vec![
            input(record("early", 1, 100, Some("aa")), None),
            input(record("late", 5, 100, Some("aa")), None),
        ];
        let backward: Vec<DocumentInput> = forward.iter().rev().cloned().collect();

        let a = detector.detect(&forward);
        let b = detector.detect(&backward);
        assert_eq!(a.groups[0].original_id, "early");
        assert_eq!(b.groups[0].original_id, "early");
        assert_eq!(a.records[0].original_id, "early");
        assert_eq!(b.records[0].original_id, "early");
    }

    #[test]
    fn hash_groups_grow_transitively_without_quadratic_records() {
        let detector = DuplicateDetector::new();
        let docs = vec![
            input(record("a", 1, 100, Some("xx")), None),
            input(record("b", 2, 100, Some("xx")), None),
            input(record("c", 3, 100, Some("xx")), None),
        ];
        let scan = detector.detect(&docs);

        assert_eq!(scan.groups.len(), 1);
        assert_eq!(scan.groups[0].original_id, "a");
        assert_eq!(scan.groups[0].members.len(), 2);
        // Anchor pairs only: a-b and a-c, never b-c.
        assert_eq!(scan.records.len(), 2);
        assert!(scan.records.iter().all(|found| found.original_id == "a"));
    }

    #[test]
    fn similar_embeddings_flag_a_content_pair() {
        let detector = DuplicateDetector::new();
        let docs = vec![
            input(record("a", 1, 100, None), Some(vec![1.0, 0.0, 0.0])),
            input(record("b", 2, 100, None), Some(vec![0.98, 0.2, 0.0])),
            input(record("c", 3, 100, None), Some(vec![0.0, 0.0, 1.0])),
        ];
        let scan = detector.detect(&docs);

        assert_eq!(scan.records.len(), 1);
        let found = &scan.records[0];
        assert_eq!(found.detection_type, DetectionType::Content);
        assert_eq!(
            (found.original_id.as_str(), found.duplicate_id.as_str()),
            ("a", "b")
        );
        assert!(found.similarity_score >= DEFAULT_SIMILARITY_THRESHOLD);
        assert!(found.content_match && !found.hash_match);
    }

    #[test]
    fn hash_pairs_are_skipped_by_the_content_tier() {
        // Identical files that also embed identically: exactly one record.
        let detector = DuplicateDetector::new();
        let docs = vec![
            input(record("a", 1, 100, Some("same")), Some(vec![1.0, 0.0])),
            input(record("b", 2, 100, Some("same")), Some(vec![1.0, 0.0])),
        ];
        let scan = detector.detect(&docs);
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].detection_type, DetectionType::Hash);
    }

    #[test]
    fn content_bridge_merges_hash_group_into_one_cluster() {
        let detector = DuplicateDetector::new();
        let docs = vec![
            input(record("bridge", 1, 100, None), Some(vec![1.0, 0.0])),
            input(record("copy1", 2, 100, Some("dup")), Some(vec![0.97, 0.1])),
            input(record("copy2", 3, 100, Some("dup")), None),
        ];
        let scan = detector.detect(&docs);

        assert_eq!(scan.groups.len(), 1);
        let group = &scan.groups[0];
        assert_eq!(group.original_id, "bridge");
        assert_eq!(group.members.len(), 2);
        // copy1 has both a content pair and a hash pair; the hash evidence
        // labels it.
        let copy1 = group
            .members
            .iter()
            .find(|member| member.document_id == "copy1")
            .expect("copy1 should be in the group");
        assert_eq!(copy1.detection_type, DetectionType::Hash);
        assert_eq!(scan.records.len(), 2);
    }

    #[test]
    fn mismatched_embedding_dimensions_skip_the_pair() {
        let detector = DuplicateDetector::new();
        let docs = vec![
            input(record("a", 1, 100, None), Some(vec![1.0, 0.0])),
            input(record("b", 2, 100, None), Some(vec![1.0, 0.0, 0.0])),
        ];
        let scan = detector.detect(&docs);
        assert!(scan.groups.is_empty());
        assert!(scan.records.is_empty());
    }

    #[test]
    fn threshold_validation_rejects_out_of_range() {
        assert!(DuplicateDetector::with_threshold(1.2).is_err());
        assert!(DuplicateDetector::with_threshold(-0.1).is_err());
        assert!(DuplicateDetector::with_threshold(0.5).is_ok());
    }

    #[test]
    fn hash_bytes_matches_known_digest() {
        assert_eq!(
            DuplicateDetector::hash_bytes(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn hash_file_reads_bytes_and_missing_file_errors() {
        let dir = tempfile::tempdir().expect("tempdir should work");
        let path = dir.path().join("doc.txt");
        tokio::fs::write(&path, b"hello")
            .await
            .expect("write should work");

        let hash = DuplicateDetector::hash_file(&path)
            .await
            .expect("hash should work");
        assert_eq!(hash, DuplicateDetector::hash_bytes(b"hello"));

        let err = DuplicateDetector::hash_file(&dir.path().join("missing.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
    }
}
