//! Engine configuration.
//!
//! `EngineConfig` is the top-level `config.toml` in the data directory. Every
//! field has a default so an empty or missing file is valid.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum steps of one execution in flight at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Step timeout when a step declares none.
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: u64,

    /// Retries when a step declares no retry policy.
    #[serde(default)]
    pub default_max_retries: u32,

    /// Delay before the first retry.
    #[serde(default = "default_backoff_ms")]
    pub default_backoff_ms: u64,

    /// Growth factor between retries.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Cap on a single retry delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Model used by `llm_call` steps that do not name one.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Timeout for the built-in `http` action.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// How long an execution's ownership lease lasts without a heartbeat.
    ///
    /// A `running` execution whose lease has expired is treated as orphaned
    /// by a crashed process and may be resumed or cancelled elsewhere.
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,

    #[serde(default)]
    pub llm: LlmSettings,
}

/// Connection settings for the OpenAI-compatible generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    /// API base URL. Provider default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_lease_ttl_ms() -> u64 {
    30_000
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            default_step_timeout_secs: default_step_timeout_secs(),
            default_max_retries: 0,
            default_backoff_ms: default_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            default_model: default_model(),
            http_timeout_secs: default_http_timeout_secs(),
            lease_ttl_ms: default_lease_ttl_ms(),
            llm: LlmSettings::default(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: default_api_key_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.default_step_timeout_secs, 300);
        assert_eq!(config.default_max_retries, 0);
        assert_eq!(config.lease_ttl_ms, 30_000);
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
max_concurrency = 8
default_max_retries = 2
default_model = "llama3"

[llm]
base_url = "http://localhost:11434/v1"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.default_max_retries, 2);
        assert_eq!(config.default_model, "llama3");
        assert_eq!(config.llm.base_url.as_deref(), Some("http://localhost:11434/v1"));
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.default_backoff_ms, 500);
    }
}
