//! Wire-format decoding for streamed provider responses.
//!
//! Every provider frames its stream differently: OpenAI-compatible servers
//! send SSE `data:` events with a literal `[DONE]` terminator, Ollama sends
//! one JSON object per line with a `done` flag, Gemini streams a JSON array
//! with one candidate per line and no terminator at all, and Claude sends
//! typed SSE events. This module normalizes all of them into [`Frame`]s so
//! the client pump stays provider-agnostic.

use serde_json::Value;

use crate::core::errors::EngineError;
use crate::llm::types::Provider;

/// One decoded unit from a provider stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A fragment of answer text.
    Token(String),
    /// The provider marked the response finished.
    Done,
}

/// How a provider frames its streaming response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// `data: {json}` events ending with `data: [DONE]`.
    OpenAiSse,
    /// One JSON object per line, `done: true` on the final one. A single
    /// line can carry both a text fragment and the done flag.
    OllamaJsonl,
    /// A streamed JSON array with array punctuation still attached to each
    /// line. No terminator; the body just ends.
    GeminiJsonl,
    /// Typed SSE events. `content_block_delta` carries text,
    /// `message_stop` ends the response, everything else is bookkeeping.
    ClaudeSse,
}

impl WireFormat {
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::LmStudio | Provider::OpenAi => WireFormat::OpenAiSse,
            Provider::Ollama => WireFormat::OllamaJsonl,
            Provider::Gemini => WireFormat::GeminiJsonl,
            Provider::Claude => WireFormat::ClaudeSse,
        }
    }

    /// Decodes one line into zero or more frames.
    ///
    /// Keep-alive, `event:` and framing lines produce nothing. A line that
    /// should carry a payload but does not parse is a hard error: once one
    /// frame is malformed the rest of the stream cannot be trusted.
    pub fn parse_line(&self, line: &str) -> Result<Vec<Frame>, EngineError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            WireFormat::OpenAiSse => parse_openai_sse(line),
            WireFormat::OllamaJsonl => parse_ollama_jsonl(line),
            WireFormat::GeminiJsonl => parse_gemini_jsonl(line),
            WireFormat::ClaudeSse => parse_claude_sse(line),
        }
    }
}

fn parse_payload(kind: &str, payload: &str) -> Result<Value, EngineError> {
    serde_json::from_str(payload)
        .map_err(|err| EngineError::StreamParse(format!("invalid {kind} frame: {err}")))
}

fn token_frame(text: Option<&str>) -> Vec<Frame> {
    match text {
        Some(text) if !text.is_empty() => vec![Frame::Token(text.to_string())],
        _ => Vec::new(),
    }
}

fn parse_openai_sse(line: &str) -> Result<Vec<Frame>, EngineError> {
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(Vec::new());
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(vec![Frame::Done]);
    }
    let value = parse_payload("sse", payload)?;
    Ok(token_frame(
        value
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str),
    ))
}

fn parse_ollama_jsonl(line: &str) -> Result<Vec<Frame>, EngineError> {
    let value = parse_payload("jsonl", line)?;
    let mut frames = token_frame(value.pointer("/message/content").and_then(Value::as_str));
    if value.get("done").and_then(Value::as_bool) == Some(true) {
        frames.push(Frame::Done);
    }
    Ok(frames)
}

fn parse_gemini_jsonl(line: &str) -> Result<Vec<Frame>, EngineError> {
    // The body is one large JSON array; each line is an element with the
    // array punctuation still attached.
    let payload = line
        .trim_start_matches(|c| c == '[' || c == ',')
        .trim_end_matches(|c| c == ']' || c == ',')
        .trim();
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let value = parse_payload("gemini", payload)?;
    Ok(token_frame(
        value
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str),
    ))
}

fn parse_claude_sse(line: &str) -> Result<Vec<Frame>, EngineError> {
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(Vec::new());
    };
    let value = parse_payload("sse", payload.trim())?;
    match value.get("type").and_then(Value::as_str) {
        Some("content_block_delta") => Ok(token_frame(
            value.pointer("/delta/text").and_then(Value::as_str),
        )),
        Some("message_stop") => Ok(vec![Frame::Done]),
        _ => Ok(Vec::new()),
    }
}

/// Reassembles complete lines out of arbitrarily split network chunks.
///
/// Chunks are buffered as raw bytes and only converted to text once a full
/// line is available, so a multi-byte character split across two chunks
/// never gets mangled.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Unterminated data left over when the body ends, if any.
    pub fn finish(self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.buffer).into_owned())
        }
    }
}
