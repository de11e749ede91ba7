use thiserror::Error;

/// Errors from state store operations (used by trait definitions in stepwise-core).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Failure reported by an LLM port implementation.
///
/// Provider failures are retryable unless marked fatal (authentication
/// failures, malformed requests).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    pub fatal: bool,
}

impl ProviderError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !self.fatal
    }
}

/// Failure reported by an action handler.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// Worth retrying (network blip, 5xx, rate limit).
    #[error("transient action failure: {0}")]
    Transient(String),

    /// Will fail the same way again.
    #[error("action failed: {0}")]
    Permanent(String),

    /// The action is unknown or its parameters are unusable.
    #[error("action configuration error: {0}")]
    Configuration(String),
}

impl ActionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_provider_error_retryable_unless_fatal() {
        assert!(ProviderError::retryable("rate limited").is_retryable());
        assert!(!ProviderError::fatal("bad api key").is_retryable());
        assert_eq!(ProviderError::fatal("bad api key").to_string(), "bad api key");
    }

    #[test]
    fn test_action_error_classification() {
        assert!(ActionError::Transient("503".into()).is_retryable());
        assert!(!ActionError::Permanent("404".into()).is_retryable());
        assert!(!ActionError::Configuration("unknown action 'x'".into()).is_retryable());
    }
}
