use serde_json::{Map, Value};

use super::types::EngineConfig;

/// The effective defaults as a JSON tree. `ConfigService` merges the
/// config file over this, so a missing or partial file always yields a
/// complete configuration.
pub fn default_config() -> Value {
    serde_json::to_value(EngineConfig::default()).unwrap_or_else(|_| Value::Object(Map::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tree_carries_every_section() {
        let defaults = default_config();
        assert_eq!(defaults["rag"]["chunk_size"], 512);
        assert_eq!(defaults["rag"]["chunk_overlap"], 50);
        assert_eq!(defaults["llm"]["provider"], "lmstudio");
        assert_eq!(defaults["embedding"]["timeout_secs"], 30);
        assert_eq!(defaults["organize"]["worker_limit"], 2);
        assert_eq!(defaults["convert"]["enable_ocr"], false);
    }
}
