use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::defaults::default_config;
use super::paths::AppPaths;
use super::types::EngineConfig;
use super::validation::validate_config;
use crate::core::errors::EngineError;

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 12] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "token_",
    "credential",
    "private_key",
    "auth_",
    "_auth",
    "bearer",
    "access_key",
    "client_secret",
];

const SENSITIVE_WHITELIST: [&str; 4] = ["max_tokens", "total_tokens", "token_count", "tokens"];

/// Reads, validates and writes the YAML configuration.
///
/// The read path prefers a user-level file over the project one; writes
/// always target the user-level file and never materialize defaults, so
/// the file on disk stays a sparse overlay.
#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("DOCQUERY_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    pub fn config_write_path(&self) -> PathBuf {
        if let Ok(path) = env::var("DOCQUERY_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        self.paths.user_data_dir.join("config.yml")
    }

    /// Full effective configuration: defaults with the file merged over
    /// them.
    pub fn load_config(&self) -> Result<Value, EngineError> {
        let file_config = load_yaml_file(&self.config_path());
        Ok(deep_merge(&default_config(), &file_config))
    }

    /// Typed view of the effective configuration, cross-field checked.
    pub fn engine_config(&self) -> Result<EngineConfig, EngineError> {
        let merged = self.load_config()?;
        let config: EngineConfig = serde_json::from_value(merged)
            .map_err(|err| EngineError::BadRequest(format!("invalid config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies an update coming back from a UI. Placeholder values are
    /// swapped for the currently stored secrets before anything is
    /// validated or written.
    pub fn update_config(&self, config_data: Value, merge: bool) -> Result<(), EngineError> {
        let current_file = load_yaml_file(&self.config_path());
        let current_full = deep_merge(&default_config(), &current_file);

        let restored = restore_redacted_values(&config_data, &current_full);
        let to_save = if merge {
            deep_merge(&current_file, &restored)
        } else {
            restored
        };

        validate_config(&to_save)?;
        let effective = deep_merge(&default_config(), &to_save);
        let typed: EngineConfig = serde_json::from_value(effective)
            .map_err(|err| EngineError::BadRequest(format!("invalid config: {err}")))?;
        typed.validate()?;

        save_config_file(&self.config_write_path(), &to_save)
    }

    pub fn redact_sensitive_values(&self, value: &Value) -> Value {
        redact_sensitive_values(value)
    }
}

fn load_yaml_file(path: &Path) -> Value {
    if !path.exists() {
        return Value::Object(Map::new());
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Value>(&contents) {
            Ok(value) => match value {
                Value::Object(_) => value,
                _ => Value::Object(Map::new()),
            },
            Err(_) => Value::Object(Map::new()),
        },
        Err(_) => Value::Object(Map::new()),
    }
}

fn save_config_file(path: &Path, config: &Value) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let yaml = serde_yaml::to_string(config).map_err(EngineError::internal)?;
    fs::write(path, yaml).map_err(EngineError::internal)?;
    Ok(())
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn restore_redacted_values(new_value: &Value, original: &Value) -> Value {
    match new_value {
        Value::Object(map) => {
            let mut restored = Map::new();
            let original_map = original.as_object();

            for (key, value) in map {
                let orig_val = original_map.and_then(|m| m.get(key));
                if value.as_str() == Some(REDACT_PLACEHOLDER) {
                    if let Some(orig) = orig_val {
                        restored.insert(key.clone(), orig.clone());
                    }
                    continue;
                }

                if value.is_object() || value.is_array() {
                    let merged = restore_redacted_values(value, orig_val.unwrap_or(&Value::Null));
                    restored.insert(key.clone(), merged);
                } else {
                    restored.insert(key.clone(), value.clone());
                }
            }

            Value::Object(restored)
        }
        Value::Array(items) => {
            let original_items = original.as_array();
            let restored_items = items
                .iter()
                .enumerate()
                .filter_map(|(idx, item)| {
                    if item.as_str() == Some(REDACT_PLACEHOLDER) {
                        return original_items.and_then(|orig| orig.get(idx)).cloned();
                    }
                    Some(restore_redacted_values(
                        item,
                        original_items
                            .and_then(|orig| orig.get(idx))
                            .unwrap_or(&Value::Null),
                    ))
                })
                .collect();
            Value::Array(restored_items)
        }
        _ => new_value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    if SENSITIVE_WHITELIST
        .iter()
        .any(|allowed| *allowed == key_lower)
    {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;
    use serde_json::json;

    fn temp_service(dir: &tempfile::TempDir) -> ConfigService {
        ConfigService::new(Arc::new(AppPaths {
            project_root: dir.path().to_path_buf(),
            user_data_dir: dir.path().to_path_buf(),
            log_dir: dir.path().join("logs"),
            db_path: dir.path().join("chunks.db"),
        }))
    }

    #[test]
    fn deep_merge_merges_objects_and_overrides_scalars() {
        let base = json!({
            "rag": { "chunk_size": 512, "chunk_overlap": 50 },
            "llm": { "provider": "lmstudio" }
        });
        let override_value = json!({
            "rag": { "chunk_size": 256 },
            "organize": { "worker_limit": 4 }
        });

        let merged = deep_merge(&base, &override_value);

        assert_eq!(
            merged,
            json!({
                "rag": { "chunk_size": 256, "chunk_overlap": 50 },
                "llm": { "provider": "lmstudio" },
                "organize": { "worker_limit": 4 }
            })
        );
    }

    #[test]
    fn redact_sensitive_values_replaces_secrets_only() {
        let input = json!({
            "llm": { "api_key": "sk-real", "max_tokens": 2000 },
            "embedding": { "api_key": null, "model": "nomic" }
        });

        let redacted = redact_sensitive_values(&input);

        assert_eq!(redacted["llm"]["api_key"], "****");
        assert_eq!(redacted["llm"]["max_tokens"], 2000);
        // Null secrets stay null so the UI can tell "unset" from "hidden".
        assert_eq!(redacted["embedding"]["api_key"], Value::Null);
        assert_eq!(redacted["embedding"]["model"], "nomic");
    }

    #[test]
    fn restore_swaps_placeholders_for_stored_secrets() {
        let incoming = json!({
            "llm": { "api_key": "****", "model": "new-model" }
        });
        let current = json!({
            "llm": { "api_key": "sk-real", "model": "old-model" }
        });

        let restored = restore_redacted_values(&incoming, &current);

        assert_eq!(restored["llm"]["api_key"], "sk-real");
        assert_eq!(restored["llm"]["model"], "new-model");
    }

    #[test]
    fn engine_config_is_all_defaults_without_a_file() {
        let dir = tempfile::tempdir().expect("tempdir should work");
        let service = temp_service(&dir);

        let config = service.engine_config().expect("load should work");
        assert_eq!(config.rag.chunk_size, 512);
        assert_eq!(config.llm.provider, Provider::LmStudio);
    }

    #[test]
    fn engine_config_overlays_a_partial_file() {
        let dir = tempfile::tempdir().expect("tempdir should work");
        fs::write(
            dir.path().join("config.yml"),
            "rag:\n  chunk_size: 128\nllm:\n  provider: ollama\n  model: qwen2.5:7b\n",
        )
        .expect("write should work");
        let service = temp_service(&dir);

        let config = service.engine_config().expect("load should work");
        assert_eq!(config.rag.chunk_size, 128);
        assert_eq!(config.rag.chunk_overlap, 50);
        assert_eq!(config.llm.provider, Provider::Ollama);
        assert_eq!(config.llm.model, "qwen2.5:7b");
    }

    #[test]
    fn update_keeps_the_file_sparse_and_restores_secrets() {
        let dir = tempfile::tempdir().expect("tempdir should work");
        fs::write(
            dir.path().join("config.yml"),
            "llm:\n  api_key: sk-real\n",
        )
        .expect("write should work");
        let service = temp_service(&dir);

        service
            .update_config(json!({ "llm": { "api_key": "****", "model": "new-model" } }), true)
            .expect("update should work");

        let saved = load_yaml_file(&dir.path().join("config.yml"));
        assert_eq!(saved["llm"]["api_key"], "sk-real");
        assert_eq!(saved["llm"]["model"], "new-model");
        // Untouched sections are not materialized into the file.
        assert!(saved.get("rag").is_none());
    }

    #[test]
    fn update_rejects_values_the_walker_catches() {
        let dir = tempfile::tempdir().expect("tempdir should work");
        let service = temp_service(&dir);

        let err = service
            .update_config(json!({ "rag": { "chunk_size": 0 } }), true)
            .unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));
        assert!(!dir.path().join("config.yml").exists());
    }

    #[test]
    fn update_rejects_cross_field_violations() {
        let dir = tempfile::tempdir().expect("tempdir should work");
        let service = temp_service(&dir);

        // Each field passes its own range check; together they are invalid.
        let err = service
            .update_config(
                json!({ "rag": { "chunk_size": 100, "chunk_overlap": 100 } }),
                true,
            )
            .unwrap_err();
        match err {
            EngineError::BadRequest(message) => {
                assert!(message.contains("chunk_overlap"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
