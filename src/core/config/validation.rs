use serde_json::{Map, Value};

use crate::core::errors::EngineError;

const KNOWN_PROVIDERS: [&str; 5] = ["lmstudio", "ollama", "openai", "gemini", "claude"];

/// Per-field shape and range checks over the raw config tree. Unknown
/// sections and keys pass untouched; cross-field rules live in
/// `EngineConfig::validate`.
pub fn validate_config(config: &Value) -> Result<(), EngineError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(rag) = expect_optional_object(root, "rag")? {
        validate_u64_field(rag, "rag.chunk_size", "chunk_size", 1, 100_000)?;
        validate_u64_field(rag, "rag.chunk_overlap", "chunk_overlap", 0, 100_000)?;
        validate_u64_field(rag, "rag.top_k", "top_k", 1, 1_000)?;
        validate_u64_field(rag, "rag.max_chunks", "max_chunks", 1, 10_000_000)?;
        validate_bool_field(rag, "rag.persistent", "persistent")?;
    }

    if let Some(embedding) = expect_optional_object(root, "embedding")? {
        validate_optional_string_field(embedding, "embedding.base_url", "base_url")?;
        validate_optional_string_field(embedding, "embedding.model", "model")?;
        validate_optional_string_field(embedding, "embedding.api_key", "api_key")?;
        validate_u64_field(embedding, "embedding.timeout_secs", "timeout_secs", 1, 3_600)?;
    }

    if let Some(llm) = expect_optional_object(root, "llm")? {
        validate_provider_field(llm, "llm.provider", "provider")?;
        validate_optional_string_field(llm, "llm.model", "model")?;
        validate_optional_string_field(llm, "llm.endpoint", "endpoint")?;
        validate_optional_string_field(llm, "llm.api_key", "api_key")?;
        validate_optional_string_field(llm, "llm.system_prompt", "system_prompt")?;
        validate_f64_field(llm, "llm.temperature", "temperature", 0.0, 2.0)?;
        validate_u64_field(llm, "llm.max_tokens", "max_tokens", 1, 1_000_000)?;
        validate_u64_field(
            llm,
            "llm.connect_timeout_secs",
            "connect_timeout_secs",
            1,
            86_400,
        )?;
        validate_u64_field(
            llm,
            "llm.request_timeout_secs",
            "request_timeout_secs",
            1,
            86_400,
        )?;
    }

    if let Some(organize) = expect_optional_object(root, "organize")? {
        validate_f64_field(
            organize,
            "organize.similarity_threshold",
            "similarity_threshold",
            0.0,
            1.0,
        )?;
        validate_u64_field(organize, "organize.worker_limit", "worker_limit", 1, 64)?;
        validate_u64_field(
            organize,
            "organize.summary_content_budget",
            "summary_content_budget",
            1,
            1_000_000,
        )?;
    }

    if let Some(convert) = expect_optional_object(root, "convert")? {
        validate_optional_string_field(convert, "convert.script_path", "script_path")?;
        validate_optional_string_field(convert, "convert.python_path", "python_path")?;
        validate_u64_field(convert, "convert.timeout_secs", "timeout_secs", 1, 86_400)?;
        validate_bool_field(convert, "convert.enable_ocr", "enable_ocr")?;
        validate_optional_string_field(convert, "convert.ocr_languages", "ocr_languages")?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, EngineError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), EngineError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), EngineError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(EngineError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), EngineError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if number < min || number > max {
        return Err(EngineError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), EngineError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_str().is_none() {
        return Err(config_type_error(path, "string"));
    }
    Ok(())
}

fn validate_provider_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), EngineError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(name) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if KNOWN_PROVIDERS.contains(&name) {
        return Ok(());
    }
    Err(EngineError::BadRequest(format!(
        "Invalid config at '{}': expected one of {}",
        path,
        KNOWN_PROVIDERS.join(", ")
    )))
}

fn config_type_error(path: &str, expected: &str) -> EngineError {
    EngineError::BadRequest(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}
