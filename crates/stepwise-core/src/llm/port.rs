//! LlmPort trait definition.

use serde_json::{Map, Value};
use stepwise_types::error::ProviderError;

/// Parameters forwarded to the model alongside the rendered prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    /// Rendered system prompt, if the step declares one.
    pub system: Option<String>,
    /// Step `parameters` block (temperature, max_tokens, ...), passed through as-is.
    pub extra: Map<String, Value>,
}

impl GenerationParams {
    pub fn temperature(&self) -> Option<f64> {
        self.extra.get("temperature").and_then(Value::as_f64)
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.extra
            .get("max_tokens")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }
}

/// Text generation backend.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition). The call
/// returns the final text; streaming adapters collect before returning.
///
/// Implementations live in stepwise-infra (e.g., `OpenAiCompatGenerator`).
pub trait LlmPort: Send + Sync {
    /// Human-readable backend name (e.g., "openai").
    fn name(&self) -> &str;

    /// Generate text for a rendered prompt.
    fn generate(
        &self,
        model_id: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> impl std::future::Future<Output = Result<String, ProviderError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generation_params_accessors() {
        let mut extra = Map::new();
        extra.insert("temperature".into(), json!(0.2));
        extra.insert("max_tokens".into(), json!(256));
        let params = GenerationParams { system: None, extra };
        assert_eq!(params.temperature(), Some(0.2));
        assert_eq!(params.max_tokens(), Some(256));
        assert_eq!(GenerationParams::default().temperature(), None);
    }
}
