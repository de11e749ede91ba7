//! OpenAI-compatible generator.
//!
//! One [`OpenAiCompatGenerator`] serves any endpoint speaking the OpenAI chat
//! completions protocol (OpenAI itself, or a compatible gateway through
//! `base_url`). Uses [`async_openai`] for request/response types.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
};
use secrecy::{ExposeSecret, SecretString};
use stepwise_core::llm::port::{GenerationParams, LlmPort};
use stepwise_types::config::LlmSettings;
use stepwise_types::error::ProviderError;

/// Default API base when none is configured.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Generator for any OpenAI-compatible chat completions API.
///
/// Does NOT derive Debug: the `async_openai::Client` holds the API key.
pub struct OpenAiCompatGenerator {
    client: Client<OpenAIConfig>,
    name: String,
}

impl OpenAiCompatGenerator {
    pub fn new(name: impl Into<String>, base_url: &str, api_key: &SecretString) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key.expose_secret())
            .with_api_base(base_url);
        Self {
            client: Client::with_config(config),
            name: name.into(),
        }
    }

    /// Build from engine settings, reading the key from `settings.api_key_env`.
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| {
                ProviderError::fatal(format!(
                    "environment variable {} is not set",
                    settings.api_key_env
                ))
            })?;
        let base_url = settings.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);
        let name = if base_url == OPENAI_BASE_URL {
            "openai"
        } else {
            "openai-compatible"
        };
        Ok(Self::new(name, base_url, &api_key))
    }

    fn build_request(
        model_id: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> CreateChatCompletionRequest {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(2);

        if let Some(system) = &params.system {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(system.clone()),
                    name: None,
                },
            ));
        }
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
                name: None,
            },
        ));

        CreateChatCompletionRequest {
            model: model_id.to_string(),
            messages,
            max_completion_tokens: params.max_tokens(),
            temperature: params.temperature().map(|t| t as f32),
            ..Default::default()
        }
    }
}

impl LlmPort for OpenAiCompatGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        model_id: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        let request = Self::build_request(model_id, prompt, params);

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        tracing::debug!(
            provider = %self.name,
            model = %response.model,
            prompt_tokens = response.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens = response.usage.as_ref().map(|u| u.completion_tokens),
            "Completion received"
        );

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ProviderError::retryable("model returned an empty completion"))
    }
}

/// Whether an API error body describes a failure that will not go away on retry.
fn is_fatal_api_error(code: &str, error_type: &str, message: &str) -> bool {
    code == "authentication_error"
        || error_type == "authentication_error"
        || code == "invalid_api_key"
        || error_type == "invalid_request_error"
        || code == "model_not_found"
        || code == "context_length_exceeded"
        || message.contains("Incorrect API key")
        || message.contains("Invalid API key")
        || message.contains("maximum context length")
}

/// Whether an HTTP status from the provider is worth retrying.
fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

/// Map an `async_openai::error::OpenAIError` to a [`ProviderError`].
fn map_openai_error(err: async_openai::error::OpenAIError) -> ProviderError {
    use async_openai::error::OpenAIError;

    match &err {
        OpenAIError::ApiError(api_err) => {
            let code = api_err.code.as_deref().unwrap_or("");
            let error_type = api_err.r#type.as_deref().unwrap_or("");
            if is_fatal_api_error(code, error_type, &api_err.message) {
                ProviderError::fatal(err.to_string())
            } else {
                ProviderError::retryable(err.to_string())
            }
        }
        OpenAIError::Reqwest(reqwest_err) => match reqwest_err.status() {
            Some(status) if !is_retryable_status(status.as_u16()) => {
                ProviderError::fatal(err.to_string())
            }
            _ => ProviderError::retryable(err.to_string()),
        },
        OpenAIError::InvalidArgument(msg) => ProviderError::fatal(msg.clone()),
        _ => ProviderError::retryable(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    #[test]
    fn test_request_carries_system_and_parameters() {
        let mut extra = Map::new();
        extra.insert("temperature".into(), json!(0.5));
        extra.insert("max_tokens".into(), json!(64));
        let params = GenerationParams {
            system: Some("be brief".into()),
            extra,
        };

        let request = OpenAiCompatGenerator::build_request("gpt-4o-mini", "hello", &params);
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.messages.len(), 2);
        assert!(matches!(request.messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(request.messages[1], ChatCompletionRequestMessage::User(_)));
        assert_eq!(request.max_completion_tokens, Some(64));
        assert_eq!(request.temperature, Some(0.5));
    }

    #[test]
    fn test_request_without_system() {
        let request =
            OpenAiCompatGenerator::build_request("m", "hi", &GenerationParams::default());
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.temperature, None);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(is_fatal_api_error("invalid_api_key", "", ""));
        assert!(is_fatal_api_error("", "invalid_request_error", "bad"));
        assert!(is_fatal_api_error("", "", "Incorrect API key provided"));
        assert!(!is_fatal_api_error("rate_limit_exceeded", "", "slow down"));
        assert!(!is_fatal_api_error("server_error", "", "oops"));
    }

    #[test]
    fn test_status_classification() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(408));
        assert!(!is_retryable_status(401));
        assert!(!is_retryable_status(400));
    }

    #[test]
    fn test_from_settings_requires_key() {
        let settings = LlmSettings {
            base_url: None,
            api_key_env: "STEPWISE_TEST_KEY_THAT_IS_NEVER_SET".into(),
        };
        let err = OpenAiCompatGenerator::from_settings(&settings).err().unwrap();
        assert!(!err.is_retryable());
        assert!(err.message.contains("STEPWISE_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn test_name_reflects_endpoint() {
        let key = SecretString::from("sk-test".to_string());
        let generator = OpenAiCompatGenerator::new("gateway", "http://localhost:8080/v1", &key);
        assert_eq!(LlmPort::name(&generator), "gateway");
    }
}
