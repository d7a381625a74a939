//! Backend configuration

use std::collections::HashMap;

use serde::Deserialize;

/// Which backend to use and how to reach it
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackendConfig {
    /// Backend type (e.g., "local", "memory")
    #[serde(rename = "type")]
    pub backend_type: String,
    /// Backend-specific attributes
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl BackendConfig {
    pub fn new(backend_type: impl Into<String>) -> Self {
        Self {
            backend_type: backend_type.into(),
            attributes: HashMap::new(),
        }
    }

    /// Local file backend at `path`
    pub fn local(path: impl Into<String>) -> Self {
        Self::new("local").with_attribute("path", serde_json::Value::String(path.into()))
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Get a string attribute value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_config_carries_path() {
        let config = BackendConfig::local("state/converge.json");
        assert_eq!(config.backend_type, "local");
        assert_eq!(config.get_string("path"), Some("state/converge.json"));
        assert_eq!(config.get_string("bucket"), None);
    }

    #[test]
    fn non_string_attribute_is_not_a_string() {
        let config = BackendConfig::new("local").with_attribute("path", serde_json::json!(42));
        assert_eq!(config.get_string("path"), None);
    }

    #[test]
    fn deserialize_from_json() {
        let config: BackendConfig =
            serde_json::from_str(r#"{"type": "local", "attributes": {"path": "a.json"}}"#).unwrap();
        assert_eq!(config, BackendConfig::local("a.json"));

        let config: BackendConfig = serde_json::from_str(r#"{"type": "memory"}"#).unwrap();
        assert!(config.attributes.is_empty());
    }
}
