//! Provider-facing LLM layer: request building, wire decoding, and the
//! streaming client.

pub mod client;
pub mod types;
pub mod wire;

#[cfg(test)]
mod tests;

pub use client::{collect_answer, CollectedAnswer, LlmClient};
pub use types::{LlmConfig, Provider, StreamEvent};
