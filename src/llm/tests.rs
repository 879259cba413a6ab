//! Client tests against in-process stub servers that speak each wire
//! format, plus a couple of live checks against local runtimes.

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;

use crate::core::errors::EngineError;
use crate::llm::{collect_answer, LlmClient, LlmConfig, Provider};

async fn spawn_stub(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("stub listener should bind");
    let addr = listener.local_addr().expect("stub addr should resolve");
    tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("stub server should run");
    });
    addr
}

fn stub_config(provider: Provider, endpoint: String) -> LlmConfig {
    let mut config = LlmConfig::new(provider, "test-model");
    config.endpoint = Some(endpoint);
    if provider.requires_api_key() {
        config.api_key = Some("test-key".to_string());
    }
    config
}

const OPENAI_SPLIT_BODY: &str = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}

data: {"choices":[{"delta":{"content":"lo"}}]}

data: [DONE]

"#;

#[tokio::test]
async fn openai_stream_reassembles_split_tokens() {
    let addr = spawn_stub(Router::new().route(
        "/v1/chat/completions",
        post(|| async { OPENAI_SPLIT_BODY }),
    ))
    .await;
    let config = stub_config(
        Provider::LmStudio,
        format!("http://{addr}/v1/chat/completions"),
    );

    let mut rx = LlmClient::new()
        .stream("greet me", &config)
        .await
        .expect("stream should open");

    let first = rx.recv().await.expect("first event").expect("first ok");
    assert_eq!(first.text, "Hel");
    assert!(!first.done);
    let second = rx.recv().await.expect("second event").expect("second ok");
    assert_eq!(second.text, "lo");
    let last = rx.recv().await.expect("done event").expect("done ok");
    assert!(last.done);
    assert!(rx.recv().await.is_none(), "channel should close after done");
}

const OLLAMA_BODY: &str = r#"{"message":{"content":"Xin "},"done":false}
{"message":{"content":"chào"},"done":true}
"#;

#[tokio::test]
async fn ollama_stream_accepts_done_on_a_content_line() {
    let addr = spawn_stub(Router::new().route("/api/chat", post(|| async { OLLAMA_BODY }))).await;
    let config = stub_config(Provider::Ollama, format!("http://{addr}/api/chat"));

    let rx = LlmClient::new()
        .stream("chào", &config)
        .await
        .expect("stream should open");
    let answer = collect_answer(rx).await.expect("stream should drain");
    assert_eq!(answer.text, "Xin chào");
    assert!(answer.complete);
}

const GEMINI_BODY: &str = r#"[{"candidates":[{"content":{"parts":[{"text":"Hi"}]}}]},
{"candidates":[{"content":{"parts":[{"text":" there"}]}}]}]
"#;

#[tokio::test]
async fn gemini_stream_completes_when_body_ends() {
    // Routed via fallback: the real path has a `:verb` suffix on the
    // model segment.
    let addr = spawn_stub(Router::new().fallback(|| async { GEMINI_BODY })).await;
    let config = stub_config(Provider::Gemini, format!("http://{addr}"));

    let rx = LlmClient::new()
        .stream("hi", &config)
        .await
        .expect("stream should open");
    let answer = collect_answer(rx).await.expect("stream should drain");
    assert_eq!(answer.text, "Hi there");
    assert!(answer.complete, "end of body should count as completion");
}

const CLAUDE_BODY: &str = r#"event: message_start
data: {"type":"message_start"}

event: content_block_delta
data: {"type":"content_block_delta","delta":{"type":"text_delta","text":"Hel"}}

event: content_block_delta
data: {"type":"content_block_delta","delta":{"type":"text_delta","text":"lo"}}

event: message_stop
data: {"type":"message_stop"}

"#;

#[tokio::test]
async fn claude_stream_decodes_typed_events() {
    let addr = spawn_stub(Router::new().route("/v1/messages", post(|| async { CLAUDE_BODY }))).await;
    let config = stub_config(Provider::Claude, format!("http://{addr}/v1/messages"));

    let rx = LlmClient::new()
        .stream("greet me", &config)
        .await
        .expect("stream should open");
    let answer = collect_answer(rx).await.expect("stream should drain");
    assert_eq!(answer.text, "Hello");
    assert!(answer.complete);
}

const BROKEN_BODY: &str = r#"data: {"choices":[{"delta":{"content":"Par"}}]}

data: {broken

data: {"choices":[{"delta":{"content":"never"}}]}

data: [DONE]

"#;

#[tokio::test]
async fn malformed_frame_aborts_but_keeps_partial_answer() {
    let addr = spawn_stub(Router::new().route(
        "/v1/chat/completions",
        post(|| async { BROKEN_BODY }),
    ))
    .await;
    let config = stub_config(
        Provider::LmStudio,
        format!("http://{addr}/v1/chat/completions"),
    );

    let rx = LlmClient::new()
        .stream("hi", &config)
        .await
        .expect("stream should open");
    let answer = collect_answer(rx).await.expect("partial should not error");
    assert_eq!(answer.text, "Par", "text after the bad frame is dropped");
    assert!(!answer.complete);
}

#[tokio::test]
async fn missing_key_fails_before_connecting() {
    // Nothing listens on port 1; an Auth error proves no connection was
    // even attempted.
    let mut config = LlmConfig::new(Provider::Claude, "test-model");
    config.endpoint = Some("http://127.0.0.1:1/v1/messages".to_string());

    let err = LlmClient::new().stream("hi", &config).await.unwrap_err();
    assert!(matches!(err, EngineError::Auth(_)));
}

#[tokio::test]
async fn unauthorized_response_maps_to_auth() {
    let addr = spawn_stub(Router::new().route(
        "/v1/chat/completions",
        post(|| async { (StatusCode::UNAUTHORIZED, "invalid api key") }),
    ))
    .await;
    let config = stub_config(
        Provider::OpenAi,
        format!("http://{addr}/v1/chat/completions"),
    );

    let err = LlmClient::new().stream("hi", &config).await.unwrap_err();
    match err {
        EngineError::Auth(detail) => assert!(detail.contains("401")),
        other => panic!("expected Auth, got {other:?}"),
    }
}

#[tokio::test]
async fn server_error_maps_to_provider_unavailable() {
    let addr = spawn_stub(Router::new().route(
        "/api/chat",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    ))
    .await;
    let config = stub_config(Provider::Ollama, format!("http://{addr}/api/chat"));

    let err = LlmClient::new().stream("hi", &config).await.unwrap_err();
    match err {
        EngineError::ProviderUnavailable(detail) => {
            assert!(detail.contains("500"));
            assert!(detail.contains("boom"));
        }
        other => panic!("expected ProviderUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_server_maps_to_provider_unavailable() {
    let config = stub_config(
        Provider::Ollama,
        "http://127.0.0.1:1/api/chat".to_string(),
    );
    let err = LlmClient::new().stream("hi", &config).await.unwrap_err();
    assert!(matches!(err, EngineError::ProviderUnavailable(_)));
}

#[tokio::test]
async fn completion_returns_full_message() {
    let addr = spawn_stub(Router::new().route(
        "/v1/chat/completions",
        post(|| async { axum::Json(serde_json::json!({"choices":[{"message":{"content":"Four."}}]})) }),
    ))
    .await;
    let config = stub_config(
        Provider::LmStudio,
        format!("http://{addr}/v1/chat/completions"),
    );

    let answer = LlmClient::new()
        .complete("2+2?", &config)
        .await
        .expect("completion should work");
    assert_eq!(answer, "Four.");
}

#[tokio::test]
#[ignore]
async fn live_ollama_stream() {
    let config = LlmConfig::new(Provider::Ollama, "qwen2.5:7b");
    let rx = LlmClient::new()
        .stream("Reply with one short sentence: what is Ollama?", &config)
        .await
        .expect("Ollama should be reachable on localhost:11434");
    let answer = collect_answer(rx).await.expect("stream should drain");
    println!(
        "Ollama answer ({} chars, complete: {}):",
        answer.text.len(),
        answer.complete
    );
    println!("{}", answer.text);
    assert!(!answer.text.is_empty());
}

#[tokio::test]
#[ignore]
async fn live_lmstudio_completion() {
    let config = LlmConfig::new(Provider::LmStudio, "qwen2.5-7b-instruct");
    match LlmClient::new().complete("Say hello in Vietnamese.", &config).await {
        Ok(answer) => println!("LM Studio answer: {answer}"),
        Err(err) => panic!("Failed to reach LM Studio: {err}"),
    }
}
