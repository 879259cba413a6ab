//! Document question-answering engine.
//!
//! The crate turns a local document collection into a question-answering
//! backend: files are converted to markdown, chunked, embedded, and stored;
//! questions retrieve the closest chunks and stream a cited answer from a
//! configurable chat provider. A second set of batch services organizes the
//! collection itself: summaries, duplicate detection, and folder
//! suggestions.
//!
//! [`Engine`] is the entry point. It is wired from an [`EngineConfig`],
//! which the [`core::config`] module loads as a sparse YAML overlay on top
//! of built-in defaults.

pub mod convert;
pub mod core;
pub mod docstore;
pub mod embed;
pub mod engine;
pub mod llm;
pub mod logging;
pub mod organize;
pub mod rag;
pub mod vector;

pub use crate::core::config::{AppPaths, ConfigService, EngineConfig};
pub use crate::core::errors::EngineError;
pub use crate::engine::{Answer, AnswerStream, AskOptions, Engine, IngestMeta};
