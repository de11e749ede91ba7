//! BoxLlmPort -- object-safe dynamic dispatch wrapper for LlmPort.
//!
//! 1. `LlmPortDyn` is an object-safe twin of `LlmPort` with boxed futures
//! 2. Blanket impl of `LlmPortDyn` for every `T: LlmPort`
//! 3. `BoxLlmPort` wraps `Box<dyn LlmPortDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use stepwise_types::error::ProviderError;

use super::port::{GenerationParams, LlmPort};

/// Object-safe version of [`LlmPort`] with boxed futures.
pub trait LlmPortDyn: Send + Sync {
    fn name(&self) -> &str;

    fn generate_boxed<'a>(
        &'a self,
        model_id: &'a str,
        prompt: &'a str,
        params: &'a GenerationParams,
    ) -> Pin<Box<dyn Future<Output = Result<String, ProviderError>> + Send + 'a>>;
}

impl<T: LlmPort> LlmPortDyn for T {
    fn name(&self) -> &str {
        LlmPort::name(self)
    }

    fn generate_boxed<'a>(
        &'a self,
        model_id: &'a str,
        prompt: &'a str,
        params: &'a GenerationParams,
    ) -> Pin<Box<dyn Future<Output = Result<String, ProviderError>> + Send + 'a>> {
        Box::pin(self.generate(model_id, prompt, params))
    }
}

/// Type-erased LLM port for runtime backend selection.
pub struct BoxLlmPort {
    inner: Box<dyn LlmPortDyn + Send + Sync>,
}

impl BoxLlmPort {
    pub fn new<T: LlmPort + 'static>(port: T) -> Self {
        Self {
            inner: Box::new(port),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn generate(
        &self,
        model_id: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        self.inner.generate_boxed(model_id, prompt, params).await
    }
}

impl std::fmt::Debug for BoxLlmPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxLlmPort").field("name", &self.name()).finish()
    }
}
