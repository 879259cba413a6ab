//! Streaming chat client covering every supported provider.
//!
//! A call moves through three phases: the request is validated and
//! dispatched, decoded frames are forwarded over a channel while the
//! provider streams, and the channel closes once a terminator frame
//! arrives or the body ends. Dropping the receiver mid-stream aborts the
//! transfer, since the pump task exits on the first failed send and the
//! response body is released with it.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::core::errors::EngineError;
use crate::llm::types::{LlmConfig, Provider, StreamEvent};
use crate::llm::wire::{Frame, LineBuffer, WireFormat};

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const LMSTUDIO_URL: &str = "http://localhost:1234/v1/chat/completions";
const OLLAMA_URL: &str = "http://localhost:11434/api/chat";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const CLAUDE_URL: &str = "https://api.anthropic.com/v1/messages";
const CLAUDE_API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Copy, Default)]
pub struct LlmClient;

impl LlmClient {
    pub fn new() -> Self {
        Self
    }

    /// Opens a streaming answer request and returns the event channel.
    ///
    /// Fails before any network traffic when a hosted provider is missing
    /// its API key. Once the stream is open, mid-stream failures arrive as
    /// `Err` events on the channel.
    pub async fn stream(
        &self,
        prompt: &str,
        config: &LlmConfig,
    ) -> Result<mpsc::Receiver<Result<StreamEvent, EngineError>>, EngineError> {
        let request = build_request(prompt, config, true)?;
        let client = http_client(config)?;
        let wire = WireFormat::for_provider(config.provider);

        tracing::debug!(
            provider = %config.provider,
            model = %config.model,
            "dispatching streaming request"
        );
        let response = request.send(&client).await?;
        let response = check_status(config.provider, response).await?;

        let (tx, rx) = mpsc::channel(64);
        let provider = config.provider;
        tokio::spawn(pump(response, wire, provider, tx));
        Ok(rx)
    }

    /// One-shot, non-streaming answer request.
    pub async fn complete(&self, prompt: &str, config: &LlmConfig) -> Result<String, EngineError> {
        let request = build_request(prompt, config, false)?;
        let client = http_client(config)?;

        tracing::debug!(
            provider = %config.provider,
            model = %config.model,
            "dispatching completion request"
        );
        let response = request
            .send_with_timeout(&client, Duration::from_secs(config.request_timeout_secs))
            .await?;
        let response = check_status(config.provider, response).await?;
        let value: Value = response.json().await?;
        Ok(extract_completion(config.provider, &value))
    }
}

/// Final answer assembled from a drained stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedAnswer {
    pub text: String,
    /// False when the stream ended before its terminator frame.
    pub complete: bool,
}

/// Drains a stream into a final answer.
///
/// A malformed frame ends the stream early but keeps the text received so
/// far, reported with `complete: false`. Any other mid-stream failure is
/// returned as the error it is.
pub async fn collect_answer(
    mut rx: mpsc::Receiver<Result<StreamEvent, EngineError>>,
) -> Result<CollectedAnswer, EngineError> {
    let mut text = String::new();
    while let Some(event) = rx.recv().await {
        match event {
            Ok(event) => {
                text.push_str(&event.text);
                if event.done {
                    return Ok(CollectedAnswer {
                        text,
                        complete: true,
                    });
                }
            }
            Err(EngineError::StreamParse(reason)) => {
                tracing::warn!("stream aborted on malformed frame: {reason}");
                return Ok(CollectedAnswer {
                    text,
                    complete: false,
                });
            }
            Err(err) => return Err(err),
        }
    }
    Ok(CollectedAnswer {
        text,
        complete: false,
    })
}

#[derive(Debug)]
struct PreparedRequest {
    url: String,
    headers: Vec<(&'static str, String)>,
    body: Value,
}

impl PreparedRequest {
    async fn send(&self, client: &reqwest::Client) -> Result<reqwest::Response, EngineError> {
        Ok(self.builder(client).send().await?)
    }

    async fn send_with_timeout(
        &self,
        client: &reqwest::Client,
        timeout: Duration,
    ) -> Result<reqwest::Response, EngineError> {
        Ok(self.builder(client).timeout(timeout).send().await?)
    }

    fn builder(&self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let mut builder = client.post(&self.url).json(&self.body);
        for (name, value) in &self.headers {
            builder = builder.header(*name, value);
        }
        builder
    }
}

fn http_client(config: &LlmConfig) -> Result<reqwest::Client, EngineError> {
    // No overall timeout on the client itself: a healthy stream may run
    // far longer than any sane total bound. The read timeout caps the gap
    // between chunks instead.
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .read_timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .map_err(EngineError::internal)
}

fn required_key(config: &LlmConfig) -> Result<&str, EngineError> {
    config
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| EngineError::Auth(format!("{} requires an API key", config.provider)))
}

fn chat_messages(config: &LlmConfig, prompt: &str) -> Vec<Value> {
    let mut messages = Vec::new();
    if let Some(system) = &config.system_prompt {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": prompt}));
    messages
}

/// Providers without a separate system role get the preamble folded into
/// the user turn.
fn inline_prompt(config: &LlmConfig, prompt: &str) -> String {
    match &config.system_prompt {
        Some(system) => format!("{system}\n\n{prompt}"),
        None => prompt.to_string(),
    }
}

fn build_request(
    prompt: &str,
    config: &LlmConfig,
    streaming: bool,
) -> Result<PreparedRequest, EngineError> {
    match config.provider {
        Provider::LmStudio | Provider::OpenAi => {
            let mut headers = Vec::new();
            let default_url = if config.provider == Provider::OpenAi {
                let key = required_key(config)?;
                headers.push(("Authorization", format!("Bearer {key}")));
                OPENAI_URL
            } else {
                LMSTUDIO_URL
            };
            Ok(PreparedRequest {
                url: config
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| default_url.to_string()),
                headers,
                body: json!({
                    "model": config.model,
                    "messages": chat_messages(config, prompt),
                    "temperature": config.temperature,
                    "max_tokens": config.max_tokens,
                    "stream": streaming,
                }),
            })
        }
        Provider::Ollama => Ok(PreparedRequest {
            url: config
                .endpoint
                .clone()
                .unwrap_or_else(|| OLLAMA_URL.to_string()),
            headers: Vec::new(),
            body: json!({
                "model": config.model,
                "messages": chat_messages(config, prompt),
                "stream": streaming,
                "options": {
                    "temperature": config.temperature,
                    "num_predict": config.max_tokens,
                },
            }),
        }),
        Provider::Gemini => {
            let key = required_key(config)?;
            // The endpoint override replaces the API base; the model and
            // verb segments are always appended.
            let base = config.endpoint.as_deref().unwrap_or(GEMINI_BASE_URL);
            let verb = if streaming {
                "streamGenerateContent"
            } else {
                "generateContent"
            };
            Ok(PreparedRequest {
                url: format!(
                    "{}/models/{}:{}?key={}",
                    base.trim_end_matches('/'),
                    config.model,
                    verb,
                    urlencoding::encode(key),
                ),
                headers: Vec::new(),
                body: json!({
                    "contents": [{"parts": [{"text": inline_prompt(config, prompt)}]}],
                    "generationConfig": {
                        "temperature": config.temperature,
                        "maxOutputTokens": config.max_tokens,
                    },
                }),
            })
        }
        Provider::Claude => {
            let key = required_key(config)?;
            Ok(PreparedRequest {
                url: config
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| CLAUDE_URL.to_string()),
                headers: vec![
                    ("x-api-key", key.to_string()),
                    ("anthropic-version", CLAUDE_API_VERSION.to_string()),
                ],
                body: json!({
                    "model": config.model,
                    "max_tokens": config.max_tokens,
                    "temperature": config.temperature,
                    "stream": streaming,
                    "messages": [{"role": "user", "content": inline_prompt(config, prompt)}],
                }),
            })
        }
    }
}

async fn check_status(
    provider: Provider,
    response: reqwest::Response,
) -> Result<reqwest::Response, EngineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = format!("{provider} returned {status}: {}", body.trim());
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(EngineError::Auth(detail))
    } else {
        Err(EngineError::ProviderUnavailable(detail))
    }
}

fn extract_completion(provider: Provider, value: &Value) -> String {
    let pointer = match provider {
        Provider::LmStudio | Provider::OpenAi => "/choices/0/message/content",
        Provider::Ollama => "/message/content",
        Provider::Gemini => "/candidates/0/content/parts/0/text",
        Provider::Claude => "/content/0/text",
    };
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[derive(PartialEq)]
enum Delivery {
    Continue,
    Stop,
}

async fn pump(
    response: reqwest::Response,
    wire: WireFormat,
    provider: Provider,
    tx: mpsc::Sender<Result<StreamEvent, EngineError>>,
) {
    let mut body = response.bytes_stream();
    let mut lines = LineBuffer::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = tx
                    .send(Err(EngineError::ProviderUnavailable(format!(
                        "{provider} stream failed: {err}"
                    ))))
                    .await;
                return;
            }
        };
        for line in lines.push(&chunk) {
            if deliver_line(wire, &line, &tx).await == Delivery::Stop {
                return;
            }
        }
    }

    if let Some(rest) = lines.finish() {
        if deliver_line(wire, &rest, &tx).await == Delivery::Stop {
            return;
        }
    }
    // The body ended cleanly without a terminator frame, which is normal
    // for Gemini and possible everywhere else. Report completion so the
    // caller is not left waiting.
    let _ = tx.send(Ok(StreamEvent::done())).await;
}

async fn deliver_line(
    wire: WireFormat,
    line: &str,
    tx: &mpsc::Sender<Result<StreamEvent, EngineError>>,
) -> Delivery {
    let frames = match wire.parse_line(line) {
        Ok(frames) => frames,
        Err(err) => {
            let _ = tx.send(Err(err)).await;
            return Delivery::Stop;
        }
    };
    for frame in frames {
        match frame {
            Frame::Token(text) => {
                if tx.send(Ok(StreamEvent::token(text))).await.is_err() {
                    // Receiver dropped; stop pumping and let the response
                    // drop cancel the transfer.
                    return Delivery::Stop;
                }
            }
            Frame::Done => {
                let _ = tx.send(Ok(StreamEvent::done())).await;
                return Delivery::Stop;
            }
        }
    }
    Delivery::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{LlmConfig, Provider};

    fn config(provider: Provider) -> LlmConfig {
        LlmConfig::new(provider, "test-model")
    }

    #[test]
    fn openai_request_carries_bearer_and_stream_flag() {
        let mut cfg = config(Provider::OpenAi);
        cfg.api_key = Some("sk-test".to_string());
        cfg.system_prompt = Some("Answer briefly.".to_string());

        let request = build_request("What is RAG?", &cfg, true).expect("request should build");
        assert_eq!(request.url, OPENAI_URL);
        assert_eq!(
            request.headers,
            vec![("Authorization", "Bearer sk-test".to_string())]
        );
        assert_eq!(request.body["stream"], serde_json::json!(true));
        assert_eq!(request.body["messages"][0]["role"], "system");
        assert_eq!(request.body["messages"][1]["content"], "What is RAG?");

        let request = build_request("What is RAG?", &cfg, false).expect("request should build");
        assert_eq!(request.body["stream"], serde_json::json!(false));
    }

    #[test]
    fn hosted_providers_fail_fast_without_a_key() {
        for provider in [Provider::OpenAi, Provider::Gemini, Provider::Claude] {
            let err = build_request("hi", &config(provider), true).unwrap_err();
            assert!(matches!(err, EngineError::Auth(_)), "{provider} should fail");
        }
        let mut blank = config(Provider::Claude);
        blank.api_key = Some("   ".to_string());
        assert!(matches!(
            build_request("hi", &blank, true),
            Err(EngineError::Auth(_))
        ));
    }

    #[test]
    fn gemini_url_encodes_key_and_picks_verb() {
        let mut cfg = config(Provider::Gemini);
        cfg.api_key = Some("ab c+d".to_string());

        let request = build_request("hi", &cfg, true).expect("request should build");
        assert_eq!(
            request.url,
            format!("{GEMINI_BASE_URL}/models/test-model:streamGenerateContent?key=ab%20c%2Bd")
        );

        let request = build_request("hi", &cfg, false).expect("request should build");
        assert!(request.url.contains(":generateContent?key="));
    }

    #[test]
    fn claude_folds_system_prompt_into_user_turn() {
        let mut cfg = config(Provider::Claude);
        cfg.api_key = Some("key".to_string());
        cfg.system_prompt = Some("Trả lời bằng tiếng Việt.".to_string());

        let request = build_request("Câu hỏi?", &cfg, true).expect("request should build");
        assert_eq!(
            request.body["messages"][0]["content"],
            "Trả lời bằng tiếng Việt.\n\nCâu hỏi?"
        );
        assert!(request
            .headers
            .iter()
            .any(|(name, value)| *name == "anthropic-version" && value == CLAUDE_API_VERSION));
    }

    #[test]
    fn ollama_request_nests_sampling_options() {
        let request =
            build_request("hi", &config(Provider::Ollama), true).expect("request should build");
        assert_eq!(request.url, OLLAMA_URL);
        assert_eq!(request.body["options"]["num_predict"], 2000);
        assert!(request.body.get("max_tokens").is_none());
    }

    #[test]
    fn completion_extraction_follows_provider_shape() {
        let openai = serde_json::json!({"choices":[{"message":{"content":"Four."}}]});
        assert_eq!(extract_completion(Provider::OpenAi, &openai), "Four.");

        let ollama = serde_json::json!({"message":{"content":"Bốn."}});
        assert_eq!(extract_completion(Provider::Ollama, &ollama), "Bốn.");

        let gemini =
            serde_json::json!({"candidates":[{"content":{"parts":[{"text":"Four."}]}}]});
        assert_eq!(extract_completion(Provider::Gemini, &gemini), "Four.");

        let claude = serde_json::json!({"content":[{"type":"text","text":"Four."}]});
        assert_eq!(extract_completion(Provider::Claude, &claude), "Four.");

        assert_eq!(
            extract_completion(Provider::OpenAi, &serde_json::json!({})),
            ""
        );
    }
}
