//! Retrieval pipeline.
//!
//! This module provides:
//! - `chunker`: word-window splitting of document text
//! - `VectorStore` implementations (in-memory and SQLite)
//! - `Retriever`: query embedding + exhaustive similarity scan
//! - `prompt`: numbered, citation-ready prompt assembly
//! - `citations`: resolving `[n]` markers back to chunks

pub mod chunker;
pub mod citations;
pub mod memory;
pub mod prompt;
pub mod retriever;
pub mod sqlite;
pub mod store;

pub use citations::{extract_citations, Citation};
pub use memory::MemoryVectorStore;
pub use retriever::Retriever;
pub use sqlite::SqliteVectorStore;
pub use store::{Chunk, SearchResult, StoreStats, VectorStore};
