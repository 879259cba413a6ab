//! Document organization: summaries, duplicate detection and folder
//! suggestions over the stored catalogue.

pub mod duplicates;
pub mod folders;
pub mod pipeline;
pub mod summary;
pub mod types;

pub use duplicates::{DocumentInput, DuplicateDetector, DuplicateScan};
pub use folders::FolderSuggester;
pub use pipeline::{BatchReport, DuplicateScanOutcome, OrganizePipeline};
pub use summary::{Completer, ConfiguredCompleter, SummaryService};
pub use types::{
    DetectionType, DocumentSummary, DuplicateGroup, DuplicateRecord, DuplicateStatus,
    FolderSuggestion, GroupMember, SuggestionStatus,
};
